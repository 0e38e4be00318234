//! The observation worker.
//!
//! One [`Observer`] runs per observation on its own thread. It pulls frames
//! from a capture session and publishes dimensions, thumbnails, pointer
//! state, matrix frames and the results of pending snapshot/align requests.
//! Publish failures are logged and never stop the loop.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use eye_capture::{BackendFactory, CaptureError, DesktopDuplicator, FrameBuffer};
use eye_imaging::{content_hash, pointer_image, snapshot, thumbnail};
use eye_ipc::{
    AlignRequest, DataMatrixFormat, EyeEvent, MatrixSettings, ObservationRegion,
    ObservationRegionKind, ObservationRequest, PointerPosition, SnapshotRequest,
    ThumbnailStreamSettings,
};
use eye_matrix::{decode, generate_alignment_map, AlignmentMap};
use eye_transport::{HubSink, KeyValueCache};
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::slot::RequestSlot;
use crate::stats::ObservationStats;
use crate::{EngineResult, ALIGNMENT_MAP_KEY};

/// Requests set by the command loop and serviced by the worker.
#[derive(Default)]
pub struct PendingRequests {
    pub snapshot: RequestSlot<SnapshotRequest>,
    pub align: RequestSlot<AlignRequest>,
}

impl PendingRequests {
    pub fn clear(&self) {
        self.snapshot.clear();
        self.align.clear();
    }
}

/// The hub and cache an observation publishes to.
#[derive(Clone)]
pub struct Sinks {
    hub: Arc<dyn HubSink>,
    cache: Arc<dyn KeyValueCache>,
    stats: Arc<ObservationStats>,
}

impl Sinks {
    pub fn new(hub: Arc<dyn HubSink>, cache: Arc<dyn KeyValueCache>) -> Self {
        Self::with_stats(hub, cache, Arc::new(ObservationStats::default()))
    }

    pub fn with_stats(
        hub: Arc<dyn HubSink>,
        cache: Arc<dyn KeyValueCache>,
        stats: Arc<ObservationStats>,
    ) -> Self {
        Self { hub, cache, stats }
    }

    pub fn stats(&self) -> &Arc<ObservationStats> {
        &self.stats
    }

    /// Send an event; failures are logged. Returns whether it was sent.
    pub(crate) fn publish(&self, event: EyeEvent) -> bool {
        let report = event.report_type().unwrap_or("message");
        match self.hub.publish(event) {
            Ok(()) => true,
            Err(e) => {
                self.stats.record_sink_failure();
                error!(report, "Unable to publish to the hub: {}", e);
                false
            }
        }
    }

    /// Store a value; failures are logged. Returns whether it was stored.
    fn store(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        match self.cache.set(key, value, ttl) {
            Ok(()) => true,
            Err(e) => {
                self.stats.record_sink_failure();
                error!(key, "Unable to store in the cache: {}", e);
                false
            }
        }
    }
}

/// Per-region decode state.
struct RegionState {
    kind: ObservationRegionKind,
    settings: Option<MatrixSettings>,
    map_from_cache: bool,
    last_frame_id: Option<Option<u32>>,
    decode_error_reported: bool,
}

impl RegionState {
    fn new(region: ObservationRegion) -> Self {
        let settings = match region.kind {
            ObservationRegionKind::MatrixFrame => Some(region.matrix_settings.unwrap_or_default()),
            ObservationRegionKind::Image => region.matrix_settings,
        };

        Self {
            kind: region.kind,
            settings,
            map_from_cache: false,
            last_frame_id: None,
            decode_error_reported: false,
        }
    }

    /// Drop a map that was fetched from the cache so the next frame refetches it.
    fn forget_cached_map(&mut self) {
        if self.map_from_cache {
            if let Some(settings) = self.settings.as_mut() {
                settings.map = None;
            }
            self.map_from_cache = false;
        }
    }

    fn observe(&mut self, index: usize, frame: &FrameBuffer, sinks: &Sinks) {
        if self.kind != ObservationRegionKind::MatrixFrame {
            return;
        }
        let Some(settings) = self.settings.as_mut() else {
            return;
        };

        if settings.map.is_none() {
            match sinks.cache.get(ALIGNMENT_MAP_KEY) {
                Ok(Some(json)) => match serde_json::from_slice::<Option<Vec<i32>>>(&json) {
                    Ok(map) => {
                        self.map_from_cache = map.is_some();
                        settings.map = map;
                    }
                    Err(e) => debug!(region = index, "Ignoring stored alignment map: {}", e),
                },
                Ok(None) => {}
                Err(e) => debug!(region = index, "Alignment map lookup failed: {}", e),
            }
        }

        if settings.data_format.is_none() {
            settings.data_format = Some(DataMatrixFormat::MatrixEvents);
        }

        match decode(frame, Some(&*settings)) {
            Ok(Some(matrix_frame)) => {
                self.decode_error_reported = false;
                if self.last_frame_id == Some(matrix_frame.frame_id) {
                    return;
                }
                self.last_frame_id = Some(matrix_frame.frame_id);
                if sinks.publish(EyeEvent::MatrixFrame(matrix_frame)) {
                    sinks.stats.record_matrix_frame();
                }
            }
            Ok(None) => {}
            Err(e) => {
                if !self.decode_error_reported {
                    warn!(region = index, "Unable to decode matrix frame: {}", e);
                    self.decode_error_reported = true;
                }
            }
        }
    }
}

/// Processes the frames of one observation.
pub struct Observer {
    adapter_index: u32,
    device_index: u32,
    thumbnails: Option<ThumbnailStreamSettings>,
    stream_pointer: bool,
    regions: Vec<RegionState>,
    sinks: Sinks,
    pending: Arc<PendingRequests>,
    config: EngineConfig,
    last_dimensions: (u32, u32),
    last_thumbnail: Option<Instant>,
    last_pointer: Option<PointerPosition>,
}

impl Observer {
    pub fn new(
        request: ObservationRequest,
        sinks: Sinks,
        pending: Arc<PendingRequests>,
        config: EngineConfig,
    ) -> Self {
        let thumbnails = request
            .streams_thumbnails()
            .then(|| request.effective_thumbnail_settings());

        Self {
            adapter_index: request.adapter_index.unwrap_or_default(),
            device_index: request.device_index.unwrap_or_default(),
            thumbnails,
            stream_pointer: request.streams_pointer(),
            regions: request.regions.into_iter().map(RegionState::new).collect(),
            sinks,
            pending,
            config,
            last_dimensions: (0, 0),
            last_thumbnail: None,
            last_pointer: None,
        }
    }

    /// Observe until `stop` is set or the capture fails.
    ///
    /// Access loss recreates the capture session; any other capture error
    /// ends the observation.
    #[instrument(
        name = "observe",
        skip(self, factory, stop),
        fields(adapter = self.adapter_index, device = self.device_index)
    )]
    pub fn run(mut self, factory: &dyn BackendFactory, stop: &AtomicBool) -> EngineResult<()> {
        info!("The cold stare of the Beholder is now focused upon the screen");

        let result = loop {
            let backend = match factory.create(self.adapter_index, self.device_index) {
                Ok(backend) => backend,
                Err(e) => break Err(e.into()),
            };
            self.sinks.stats.record_session();
            let mut duplicator = DesktopDuplicator::new(backend, self.config.acquire_timeout);

            match self.observe_session(&mut duplicator, stop) {
                Ok(()) => break Ok(()),
                Err(CaptureError::AccessLost) => {
                    warn!("Desktop access lost, recreating capture session");
                }
                Err(e) => {
                    error!("Capture session failed: {}", e);
                    break Err(e.into());
                }
            }
        };

        info!("The Beholder has focused its attention elsewhere");
        result
    }

    fn observe_session(
        &mut self,
        duplicator: &mut DesktopDuplicator,
        stop: &AtomicBool,
    ) -> Result<(), CaptureError> {
        for frame in duplicator.frames(stop) {
            self.process(&frame?);
            self.sinks.stats.log_if_due();
        }
        Ok(())
    }

    /// Publish everything one frame warrants.
    pub fn process(&mut self, frame: &FrameBuffer) {
        if frame.width == 0 || frame.height == 0 || !frame.has_data() {
            return;
        }
        self.sinks.stats.record_frame();

        self.publish_dimensions(frame);
        self.publish_thumbnail(frame);
        if self.stream_pointer {
            self.publish_pointer(frame);
        }
        self.service_snapshot(frame);
        self.service_alignment(frame);

        for (index, region) in self.regions.iter_mut().enumerate() {
            region.observe(index, frame, &self.sinks);
        }
    }

    fn publish_dimensions(&mut self, frame: &FrameBuffer) {
        let dimensions = (frame.width, frame.height);
        if dimensions == self.last_dimensions {
            return;
        }
        self.last_dimensions = dimensions;
        self.sinks.publish(EyeEvent::ScreenDimensions {
            width: frame.width,
            height: frame.height,
        });
    }

    fn publish_thumbnail(&mut self, frame: &FrameBuffer) {
        let Some(settings) = &self.thumbnails else {
            return;
        };
        let interval = settings
            .max_fps
            .unwrap_or(ThumbnailStreamSettings::DEFAULT_MAX_FPS);
        let scale = settings
            .scale_factor
            .unwrap_or(ThumbnailStreamSettings::DEFAULT_SCALE_FACTOR);
        let due = self
            .last_thumbnail
            .map_or(true, |last| last.elapsed().as_secs_f64() > interval);
        if !due {
            return;
        }
        self.last_thumbnail = Some(Instant::now());

        let image = match thumbnail(frame, scale) {
            Ok(Some(image)) => image,
            Ok(None) => return,
            Err(e) => {
                error!("Unable to render thumbnail: {}", e);
                return;
            }
        };

        let key = format!("Eye_Thumb_{}.png", timestamp());
        if self
            .sinks
            .store(&key, &image.bytes, Some(self.config.thumbnail_ttl))
            && self.sinks.publish(EyeEvent::Thumbnail {
                key,
                width: image.width,
                height: image.height,
            })
        {
            self.sinks.stats.record_thumbnail();
        }
    }

    fn publish_pointer(&mut self, frame: &FrameBuffer) {
        let position = frame.pointer_position;
        if self.last_pointer != Some(position) {
            self.last_pointer = Some(position);
            if self.sinks.publish(EyeEvent::PointerPosition(position)) {
                self.sinks.stats.record_pointer_update();
            }
        }

        if !position.is_visible() {
            return;
        }
        let image = match pointer_image(frame) {
            Ok(Some(image)) => image,
            Ok(None) => return,
            Err(e) => {
                error!("Unable to render pointer shape: {}", e);
                return;
            }
        };

        let key = format!("Eye_Pointer_{}.png", content_hash(&image.bytes));
        match self.sinks.cache.exists(&key) {
            Ok(true) => {}
            Ok(false) => {
                self.sinks.store(&key, &image.bytes, None);
            }
            Err(e) => {
                self.sinks.stats.record_sink_failure();
                error!(key = %key, "Unable to look up pointer shape: {}", e);
            }
        }

        let shape = frame.pointer_shape.unwrap_or_default();
        self.sinks.publish(EyeEvent::PointerShape { shape, key });
    }

    fn service_snapshot(&self, frame: &FrameBuffer) {
        let sinks = &self.sinks;
        let ttl = Some(self.config.snapshot_ttl);

        self.pending.snapshot.service(|request| {
            request.apply_defaults();
            let scale = request
                .scale_factor
                .unwrap_or(SnapshotRequest::DEFAULT_SCALE_FACTOR);
            let format = request.format.unwrap_or_default();
            debug!(scale, ?format, "Taking snapshot");

            let image = match snapshot(frame, scale, format) {
                Ok(Some(image)) => image,
                Ok(None) => return,
                Err(e) => {
                    error!("Unable to render snapshot: {}", e);
                    return;
                }
            };

            let now = timestamp();
            let key = format!("Eye_Snapshot_{}.{}", now, format.extension());
            if !sinks.store(&key, &image.bytes, ttl) {
                return;
            }

            if let Some(metadata) = &request.metadata {
                match serde_json::to_vec(metadata) {
                    Ok(json) => {
                        sinks.store(&format!("Eye_Snapshot_Metadata_{}", now), &json, ttl);
                    }
                    Err(e) => error!("Unable to serialize snapshot metadata: {}", e),
                }
            }

            if sinks.publish(EyeEvent::Snapshot {
                key,
                width: image.width,
                height: image.height,
            }) {
                sinks.stats.record_snapshot();
            }
        });
    }

    fn service_alignment(&mut self, frame: &FrameBuffer) {
        let sinks = &self.sinks;
        let default_size = self.config.default_alignment_pixel_size;

        let stored = self.pending.align.service(|request| {
            let pixel_size = request.pixel_size_or(default_size);
            let map = generate_alignment_map(frame, pixel_size);
            let flat = map.as_ref().map(AlignmentMap::to_flat);

            let json = match serde_json::to_vec(&flat) {
                Ok(json) => json,
                Err(e) => {
                    error!("Unable to serialize alignment map: {}", e);
                    return false;
                }
            };
            if !sinks.store(ALIGNMENT_MAP_KEY, &json, None) {
                return false;
            }

            info!(
                pixel_size,
                anchors = map.as_ref().map_or(0, AlignmentMap::len),
                "Alignment map updated"
            );
            if sinks.publish(EyeEvent::AlignmentMapUpdated {
                key: ALIGNMENT_MAP_KEY.to_string(),
            }) {
                sinks.stats.record_alignment();
            }
            true
        });

        if stored == Some(true) {
            for region in &mut self.regions {
                region.forget_cached_map();
            }
        }
    }
}

/// RFC 3339 UTC timestamp used in cache keys.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;
    use std::thread;

    use bytes::Bytes;
    use eye_capture::{DuplicationBackend, ReplayBackend, ReplayStep};
    use eye_ipc::{PointerShape, SnapshotFormat};
    use eye_transport::{MemoryCache, RecordingHub, TransportError, TransportResult};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const GREY: [u8; 4] = [40, 40, 40, 255];

    struct Harness {
        hub: Arc<RecordingHub>,
        cache: Arc<MemoryCache>,
        pending: Arc<PendingRequests>,
        sinks: Sinks,
    }

    impl Harness {
        fn new() -> Self {
            let hub = Arc::new(RecordingHub::new());
            let cache = Arc::new(MemoryCache::new());
            let sinks = Sinks::new(hub.clone(), cache.clone());
            Self {
                hub,
                cache,
                pending: Arc::new(PendingRequests::default()),
                sinks,
            }
        }

        fn observer(&self, request: ObservationRequest) -> Observer {
            Observer::new(
                request,
                self.sinks.clone(),
                Arc::clone(&self.pending),
                EngineConfig::default(),
            )
        }
    }

    fn quiet_request() -> ObservationRequest {
        ObservationRequest {
            stream_desktop_thumbnail: Some(false),
            stream_pointer_position: Some(false),
            ..Default::default()
        }
    }

    fn solid(width: u32, height: u32, color: [u8; 4]) -> FrameBuffer {
        FrameBuffer::from_bgra(width, height, color.repeat((width * height) as usize)).unwrap()
    }

    /// A one-row frame whose pixel `i` carries triplet `i` of `bytes`.
    fn matrix_frame(bytes: &[u8]) -> (FrameBuffer, Vec<i32>) {
        let triplets: Vec<&[u8]> = bytes.chunks(3).collect();
        let width = triplets.len() as u32;
        let mut data = Vec::with_capacity(triplets.len() * 4);
        let mut map = Vec::with_capacity(triplets.len() * 2);
        for (x, triplet) in triplets.iter().enumerate() {
            let rgb = [
                triplet[0],
                *triplet.get(1).unwrap_or(&0),
                *triplet.get(2).unwrap_or(&0),
            ];
            data.extend_from_slice(&[rgb[2], rgb[1], rgb[0], 255]);
            map.extend_from_slice(&[x as i32, 0]);
        }
        (FrameBuffer::from_bgra(width, 1, data).unwrap(), map)
    }

    fn events_payload(frame_id: u8) -> Vec<u8> {
        let mut bytes = vec![frame_id, 0, 0, 156, 46, 0x12];
        bytes.extend_from_slice(br#"[{"t":"player","d":{"n":"Sleepyhead"}}]"#);
        bytes
    }

    fn matrix_region(map: Option<Vec<i32>>) -> ObservationRegion {
        ObservationRegion {
            kind: ObservationRegionKind::MatrixFrame,
            matrix_settings: Some(MatrixSettings {
                map,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_dimensions_published_on_change_only() {
        let harness = Harness::new();
        let mut observer = harness.observer(quiet_request());

        observer.process(&solid(4, 4, GREY));
        observer.process(&solid(4, 4, GREY));
        observer.process(&solid(8, 4, GREY));

        let reports = harness.hub.reports("ScreenDimensions");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].arguments[1], json!([8, 4]));
        assert_eq!(harness.sinks.stats().snapshot().frames_observed, 3);
    }

    #[test]
    fn test_empty_frames_are_ignored() {
        let harness = Harness::new();
        let mut observer = harness.observer(ObservationRequest::default());

        observer.process(&FrameBuffer::default());
        observer.process(&solid(4, 4, [0, 0, 0, 0]));

        assert!(harness.hub.invocations().is_empty());
    }

    #[test]
    fn test_thumbnails_are_throttled() {
        let harness = Harness::new();
        let mut observer = harness.observer(ObservationRequest {
            stream_pointer_position: Some(false),
            ..Default::default()
        });

        observer.process(&solid(20, 10, GREY));
        observer.process(&solid(20, 10, GREY));

        let reports = harness.hub.reports("Thumbnail");
        assert_eq!(reports.len(), 1);
        let args = &reports[0].arguments[1];
        let key = args[0].as_str().unwrap();
        assert!(key.starts_with("Eye_Thumb_") && key.ends_with(".png"));
        assert_eq!(args[1], 3);
        assert_eq!(args[2], 2);
        assert!(harness.cache.ttl(key).unwrap() <= Duration::from_secs(30));
    }

    #[test]
    fn test_thumbnail_interval_elapses() {
        let harness = Harness::new();
        let mut request = ObservationRequest::default();
        request.stream_pointer_position = Some(false);
        request.desktop_thumbnail_stream_settings = Some(ThumbnailStreamSettings {
            max_fps: Some(0.01),
            scale_factor: Some(0.5),
        });
        let mut observer = harness.observer(request);

        observer.process(&solid(4, 4, GREY));
        thread::sleep(Duration::from_millis(30));
        observer.process(&solid(4, 4, GREY));

        assert_eq!(harness.hub.reports("Thumbnail").len(), 2);
    }

    fn pointer_frame(x: i32, visible: bool) -> FrameBuffer {
        let mut frame = solid(4, 4, GREY);
        frame.pointer_position = PointerPosition::new(x, 1, visible);
        frame.pointer_shape = Some(PointerShape {
            shape_type: Some(2),
            width: Some(2),
            height: Some(2),
            pitch: Some(8),
            hot_spot_x: Some(0),
            hot_spot_y: Some(0),
        });
        frame.pointer_shape_buffer = Some(Bytes::from(vec![255u8; 16]));
        frame
    }

    #[test]
    fn test_pointer_position_and_shape() {
        let harness = Harness::new();
        let mut observer = harness.observer(ObservationRequest {
            stream_desktop_thumbnail: Some(false),
            ..Default::default()
        });

        observer.process(&pointer_frame(1, true));
        observer.process(&pointer_frame(1, true));
        observer.process(&pointer_frame(2, true));

        assert_eq!(harness.hub.reports("PointerPosition").len(), 2);

        let shapes = harness.hub.reports("PointerShape");
        assert_eq!(shapes.len(), 3);
        let key = shapes[0].arguments[1][1].as_str().unwrap().to_string();
        assert!(key.starts_with("Eye_Pointer_"));
        assert_eq!(shapes[0].arguments[1][0]["width"], 2);
        assert_eq!(harness.cache.keys(), vec![key.clone()]);
        assert_eq!(harness.cache.ttl(&key), None);
    }

    #[test]
    fn test_hidden_pointer_shape_is_not_published() {
        let harness = Harness::new();
        let mut observer = harness.observer(ObservationRequest {
            stream_desktop_thumbnail: Some(false),
            ..Default::default()
        });

        observer.process(&pointer_frame(1, false));

        assert_eq!(harness.hub.reports("PointerPosition").len(), 1);
        assert!(harness.hub.reports("PointerShape").is_empty());
        assert!(harness.cache.keys().is_empty());
    }

    #[test]
    fn test_snapshot_request_is_serviced_once() {
        let harness = Harness::new();
        let mut observer = harness.observer(quiet_request());
        harness.pending.snapshot.set(SnapshotRequest {
            scale_factor: Some(0.5),
            format: Some(SnapshotFormat::Jpeg),
            metadata: Some(json!({"reason": "test"})),
        });

        observer.process(&solid(10, 10, GREY));
        observer.process(&solid(10, 10, GREY));

        let reports = harness.hub.reports("Snapshot");
        assert_eq!(reports.len(), 1);
        let args = &reports[0].arguments[1];
        let key = args[0].as_str().unwrap();
        assert!(key.starts_with("Eye_Snapshot_") && key.ends_with(".jpg"));
        assert_eq!(args[1], 5);
        assert_eq!(args[2], 5);
        assert!(!harness.pending.snapshot.is_pending());

        let metadata_key = harness
            .cache
            .keys()
            .into_iter()
            .find(|k| k.starts_with("Eye_Snapshot_Metadata_"))
            .unwrap();
        let metadata: Value =
            serde_json::from_slice(&harness.cache.get(&metadata_key).unwrap().unwrap()).unwrap();
        assert_eq!(metadata["reason"], "test");
        assert!(harness.cache.ttl(key).unwrap() > Duration::from_secs(7000));
    }

    #[test]
    fn test_alignment_request_stores_map() {
        let harness = Harness::new();
        let mut observer = harness.observer(quiet_request());
        harness.pending.align.set(AlignRequest { pixel_size: None });

        let mut data = GREY.repeat(100);
        for row in 2..6 {
            for col in 3..7 {
                let offset = (row * 10 + col) * 4;
                data[offset..offset + 4].copy_from_slice(&GREEN);
            }
        }
        observer.process(&FrameBuffer::from_bgra(10, 10, data).unwrap());

        let stored = harness.cache.get(ALIGNMENT_MAP_KEY).unwrap().unwrap();
        let map: Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(map, json!([3, 2]));
        assert_eq!(harness.cache.ttl(ALIGNMENT_MAP_KEY), None);

        let reports = harness.hub.reports("AlignmentMapUpdated");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].arguments[1], json!([ALIGNMENT_MAP_KEY]));
        assert!(!harness.pending.align.is_pending());
    }

    #[test]
    fn test_matrix_frames_skip_duplicate_ids() {
        let harness = Harness::new();
        let (first, map) = matrix_frame(&events_payload(119));
        let (second, _) = matrix_frame(&events_payload(120));

        let mut request = quiet_request();
        request.regions = vec![matrix_region(Some(map))];
        let mut observer = harness.observer(request);

        observer.process(&first);
        observer.process(&first);
        observer.process(&second);

        let reports = harness.hub.reports("MatrixFrame");
        assert_eq!(reports.len(), 2);
        let frame = &reports[0].arguments[1][0];
        assert_eq!(frame["id"], 119);
        assert_eq!(frame["d"][0]["t"], "player");
        assert_eq!(frame["d"][0]["d"]["n"], "Sleepyhead");
        assert_eq!(reports[1].arguments[1][0]["id"], 120);
        assert_eq!(harness.sinks.stats().snapshot().matrix_frames_published, 2);
    }

    #[test]
    fn test_matrix_map_comes_from_cache() {
        let harness = Harness::new();
        let (frame, map) = matrix_frame(&events_payload(7));

        let mut request = quiet_request();
        request.regions = vec![ObservationRegion {
            kind: ObservationRegionKind::MatrixFrame,
            ..Default::default()
        }];
        let mut observer = harness.observer(request);

        // No map yet: decoding fails quietly.
        observer.process(&frame);
        assert!(harness.hub.reports("MatrixFrame").is_empty());

        harness
            .cache
            .set(ALIGNMENT_MAP_KEY, &serde_json::to_vec(&map).unwrap(), None)
            .unwrap();
        observer.process(&frame);

        let reports = harness.hub.reports("MatrixFrame");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].arguments[1][0]["id"], 7);
    }

    struct FailingCache;

    impl KeyValueCache for FailingCache {
        fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> TransportResult<()> {
            Err(TransportError::NotConnected)
        }

        fn get(&self, _: &str) -> TransportResult<Option<Vec<u8>>> {
            Err(TransportError::NotConnected)
        }

        fn exists(&self, _: &str) -> TransportResult<bool> {
            Err(TransportError::NotConnected)
        }
    }

    #[test]
    fn test_sink_failures_do_not_stop_observation() {
        let hub = Arc::new(RecordingHub::new());
        let sinks = Sinks::new(hub.clone(), Arc::new(FailingCache));
        let pending = Arc::new(PendingRequests::default());
        let (frame, map) = matrix_frame(&events_payload(3));

        let mut request = ObservationRequest::default();
        request.regions = vec![matrix_region(Some(map)), matrix_region(None)];
        let mut observer = Observer::new(
            request,
            sinks.clone(),
            Arc::clone(&pending),
            EngineConfig::default(),
        );
        pending.snapshot.set(SnapshotRequest::default());
        pending.align.set(AlignRequest::default());

        observer.process(&frame);

        // Requests are consumed even though nothing could be stored.
        assert!(!pending.snapshot.is_pending());
        assert!(!pending.align.is_pending());
        assert!(hub.reports("Thumbnail").is_empty());
        assert!(hub.reports("Snapshot").is_empty());
        assert_eq!(hub.reports("MatrixFrame").len(), 1);
        assert!(sinks.stats().snapshot().sink_failures >= 3);

        hub.set_unavailable(true);
        let (next, _) = matrix_frame(&events_payload(4));
        observer.process(&next);
        assert_eq!(hub.reports("MatrixFrame").len(), 1);
    }

    /// Hands out one scripted backend per session, then idle ones.
    struct ScriptedFactory {
        sessions: Mutex<VecDeque<Vec<ReplayStep>>>,
    }

    impl ScriptedFactory {
        fn new(sessions: Vec<Vec<ReplayStep>>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
            }
        }
    }

    impl BackendFactory for ScriptedFactory {
        fn create(
            &self,
            _adapter_index: u32,
            output_index: u32,
        ) -> Result<Box<dyn DuplicationBackend>, CaptureError> {
            let steps = self.sessions.lock().pop_front().unwrap_or_default();
            Ok(Box::new(ReplayBackend::new(output_index, (4, 4), steps)))
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            acquire_timeout: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_access_loss_recreates_session() {
        let harness = Harness::new();
        let factory = ScriptedFactory::new(vec![
            vec![ReplayStep::frame(solid(4, 4, GREY)), ReplayStep::AccessLost],
            vec![ReplayStep::Timeout, ReplayStep::frame(solid(6, 4, GREY))],
        ]);
        let observer = Observer::new(
            quiet_request(),
            harness.sinks.clone(),
            Arc::clone(&harness.pending),
            fast_config(),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::clone(harness.sinks.stats());

        let worker = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || observer.run(&factory, &stop))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.snapshot().frames_observed < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::SeqCst);

        assert!(worker.join().unwrap().is_ok());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_observed, 2);
        assert_eq!(snapshot.sessions_created, 2);
        assert_eq!(harness.hub.reports("ScreenDimensions").len(), 2);
    }

    #[test]
    fn test_fatal_capture_error_ends_observation() {
        let harness = Harness::new();
        let factory = ScriptedFactory::new(vec![vec![ReplayStep::Fail("device removed".into())]]);
        let observer = harness.observer(quiet_request());

        let result = observer.run(&factory, &AtomicBool::new(false));

        assert!(matches!(
            result,
            Err(crate::EngineError::Capture(CaptureError::Duplication { .. }))
        ));
    }
}
