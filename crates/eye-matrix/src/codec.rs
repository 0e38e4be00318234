//! Matrix frame decoding.

use chrono::{DateTime, SecondsFormat, Utc};
use eye_capture::FrameBuffer;
use eye_ipc::{DataMatrixFormat, ExtensionData, MatrixData, MatrixEvent, MatrixFrame, MatrixSettings};
use serde_json::Value;
use tracing::trace;

use crate::error::MatrixError;
use crate::uptime::boot_time;
use crate::MatrixResult;

/// Samples per line of `Hex` output.
pub const HEX_LINE_LENGTH: usize = 80;

/// Bytes per line of `TextGrid` output.
pub const TEXT_GRID_LINE_LENGTH: usize = 80;

const BYTES_PER_PIXEL: usize = 4;
const TRIPLET: usize = 3;

/// Decode the matrix frame painted into `frame`.
///
/// Returns `Ok(None)` when the frame has no data. Fails only on missing or
/// unusable settings; a malformed payload decodes to default data.
pub fn decode(
    frame: &FrameBuffer,
    settings: Option<&MatrixSettings>,
) -> MatrixResult<Option<MatrixFrame>> {
    let now = Utc::now();
    decode_at(frame, settings, now, boot_time(now))
}

/// [`decode`] with an explicit clock.
///
/// `boot` anchors the `ft` offsets of `MatrixEvents` payloads.
pub fn decode_at(
    frame: &FrameBuffer,
    settings: Option<&MatrixSettings>,
    now: DateTime<Utc>,
    boot: DateTime<Utc>,
) -> MatrixResult<Option<MatrixFrame>> {
    if !frame.has_data() {
        return Ok(None);
    }

    let settings = settings.ok_or(MatrixError::NullSettings)?;
    let map = match settings.map.as_deref() {
        Some(map) if !map.is_empty() && map.len() % 2 == 0 => map,
        _ => {
            return Err(MatrixError::InvalidSettings(
                "the map must hold at least one point pair and an even number of values"
                    .to_string(),
            ))
        }
    };

    let raw = sample(frame, map)?;

    let frame_id_index = settings.frame_id_index();
    let metadata_index = settings.frame_metadata_index();
    let frame_id = triplet(&raw, frame_id_index).map(frame_id_from_triplet);
    let metadata = triplet(&raw, metadata_index);

    let data = match settings.data_format() {
        DataMatrixFormat::Raw => MatrixData::Raw(raw),
        DataMatrixFormat::Hex => MatrixData::Hex(hex_lines(&raw, map.len())),
        DataMatrixFormat::Text => {
            let payload = excise(&raw, frame_id_index, metadata_index);
            let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
            MatrixData::Text(ascii(&payload[..end]))
        }
        DataMatrixFormat::TextGrid => {
            let payload = excise(&raw, frame_id_index, metadata_index);
            let lines: Vec<String> = payload.chunks(TEXT_GRID_LINE_LENGTH).map(ascii).collect();
            MatrixData::TextGrid(lines.join("\n"))
        }
        DataMatrixFormat::Json => {
            let payload = excise(&raw, frame_id_index, metadata_index);
            MatrixData::Json(first_json_value(&payload).unwrap_or(Value::Null))
        }
        DataMatrixFormat::MatrixEvents => {
            let payload = excise(&raw, frame_id_index, metadata_index);
            MatrixData::Events(matrix_events(&payload, now, boot).unwrap_or_default())
        }
    };

    Ok(Some(MatrixFrame {
        frame_id,
        metadata,
        frame_time: now,
        data,
        additional_data: ExtensionData::new(),
    }))
}

/// Frame id of a little-endian triplet, base 255.
pub fn frame_id_from_triplet(triplet: [u8; 3]) -> u32 {
    triplet[0] as u32 + triplet[1] as u32 * 255 + triplet[2] as u32 * 255 * 255
}

/// Read one `[R, G, B]` triplet per map point.
fn sample(frame: &FrameBuffer, map: &[i32]) -> MatrixResult<Vec<u8>> {
    let width = frame.width as usize;
    let mut raw = Vec::with_capacity(map.len() / 2 * TRIPLET);

    for point in map.chunks_exact(2) {
        let (x, y) = (point[0], point[1]);
        let inside = x >= 0 && y >= 0 && (x as u32) < frame.width && (y as u32) < frame.height;
        if !inside {
            return Err(MatrixError::InvalidSettings(format!(
                "sample point ({}, {}) lies outside the {}x{} frame",
                x, y, frame.width, frame.height
            )));
        }

        let offset = (y as usize * width + x as usize) * BYTES_PER_PIXEL;
        let pixel = frame
            .data
            .get(offset..offset + BYTES_PER_PIXEL)
            .ok_or_else(|| MatrixError::InvalidSettings("frame buffer is truncated".to_string()))?;
        raw.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
    }

    Ok(raw)
}

fn triplet(raw: &[u8], index: i32) -> Option<[u8; 3]> {
    let start = usize::try_from(index).ok()? * TRIPLET;
    let bytes = raw.get(start..start + TRIPLET)?;
    Some([bytes[0], bytes[1], bytes[2]])
}

/// Raw bytes without the frame id and metadata triplets.
fn excise(raw: &[u8], frame_id_index: i32, metadata_index: i32) -> Vec<u8> {
    let skipped = |index: usize| {
        [frame_id_index, metadata_index]
            .iter()
            .any(|i| usize::try_from(*i).ok() == Some(index))
    };

    raw.chunks(TRIPLET)
        .enumerate()
        .filter(|(index, _)| !skipped(*index))
        .flat_map(|(_, chunk)| chunk.iter().copied())
        .collect()
}

/// Uppercase hex, one line per 80 samples.
///
/// Line `n` holds up to 80 bytes starting at byte `240 * n`, so only the
/// first third of each line's samples is shown. Existing consumers depend on
/// this layout.
fn hex_lines(raw: &[u8], map_len: usize) -> String {
    let line_count = map_len.div_ceil(HEX_LINE_LENGTH);
    let mut out = String::with_capacity(map_len * TRIPLET);

    for line in 0..line_count {
        let count = (map_len - line * HEX_LINE_LENGTH).min(HEX_LINE_LENGTH);
        let start = (line * HEX_LINE_LENGTH * TRIPLET).min(raw.len());
        let end = (start + count).min(raw.len());

        let pairs: Vec<String> = raw[start..end].iter().map(|b| format!("{b:02X}")).collect();
        out.push_str(&pairs.join(" "));
        out.push('\n');
    }

    out
}

fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| if b.is_ascii() { *b as char } else { '?' })
        .collect()
}

/// Parse the first JSON value, ignoring NUL padding and trailing bytes.
fn first_json_value(payload: &[u8]) -> Option<Value> {
    let end = payload
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);

    serde_json::Deserializer::from_slice(&payload[..end])
        .into_iter::<Value>()
        .next()?
        .ok()
}

/// Parse an event array, rewriting `ft` (seconds since boot) to `et`.
fn matrix_events(
    payload: &[u8],
    now: DateTime<Utc>,
    boot: DateTime<Utc>,
) -> Option<Vec<MatrixEvent>> {
    let Value::Array(items) = first_json_value(payload)? else {
        trace!("Matrix events payload is not an array");
        return None;
    };

    items
        .into_iter()
        .map(|item| {
            let Value::Object(mut fields) = item else {
                return None;
            };
            let event_time = match fields.remove("ft") {
                Some(ft) => offset_time(boot, ft.as_f64()?)?,
                None => now,
            };
            fields.insert(
                "et".to_string(),
                Value::String(event_time.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
            serde_json::from_value(Value::Object(fields)).ok()
        })
        .collect()
}

fn offset_time(boot: DateTime<Utc>, seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    boot.checked_add_signed(chrono::Duration::microseconds(micros))
}
