//! DXGI Desktop Duplication backend.

mod d3d11;

use std::mem;
use std::time::Duration;

use tracing::{info, instrument};
use windows::core::Interface;
use windows::Win32::Foundation::{POINT, RECT};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Texture2D, D3D11_CPU_ACCESS_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource, DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_UNSUPPORTED, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT, DXGI_OUTDUPL_POINTER_SHAPE_INFO,
};

use self::d3d11::D3D11Device;
use crate::backend::{BackendFactory, DuplicationBackend, FrameInfo, PointerShapeInfo};
use crate::error::CaptureError;
use crate::geometry::{MovedRegion, Point, Rect};
use crate::CaptureResult;

/// Desktop duplication of one output via DXGI.
pub struct DxgiBackend {
    d3d: D3D11Device,
    duplication: IDXGIOutputDuplication,
    staging: ID3D11Texture2D,
    held: Option<IDXGIResource>,
    output_index: u32,
    width: u32,
    height: u32,
}

// SAFETY: the COM objects are only used from the thread that owns the backend.
unsafe impl Send for DxgiBackend {}

impl DxgiBackend {
    /// Duplicate output `output_index` of adapter `adapter_index`.
    #[instrument(name = "dxgi_backend_new")]
    pub fn new(adapter_index: u32, output_index: u32) -> CaptureResult<Self> {
        let d3d = D3D11Device::on_adapter(adapter_index)?;

        let output = unsafe { d3d.adapter().EnumOutputs(output_index) }.map_err(|e| {
            CaptureError::duplication(format!(
                "no output at index {} on adapter {}: {}",
                output_index,
                adapter_index,
                e.message()
            ))
        })?;

        let desc = unsafe { output.GetDesc()? };
        let coords = desc.DesktopCoordinates;
        let width = (coords.right - coords.left).unsigned_abs();
        let height = (coords.bottom - coords.top).unsigned_abs();

        let output1: IDXGIOutput1 = output.cast()?;
        let duplication = unsafe { output1.DuplicateOutput(d3d.device()) }.map_err(|e| {
            let code = e.code();
            if code == DXGI_ERROR_UNSUPPORTED {
                CaptureError::duplication("unsupported desktop mode or scenario")
            } else if code == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE {
                CaptureError::duplication(
                    "the maximum number of desktop duplication clients is already running",
                )
            } else {
                CaptureError::from(e)
            }
        })?;

        let staging = create_staging_texture(&d3d, width, height)?;

        info!(
            adapter_index,
            output_index, width, height, "Using output for desktop duplication"
        );

        Ok(Self {
            d3d,
            duplication,
            staging,
            held: None,
            output_index,
            width,
            height,
        })
    }
}

fn create_staging_texture(
    d3d: &D3D11Device,
    width: u32,
    height: u32,
) -> CaptureResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: Default::default(),
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: Default::default(),
    };

    let mut texture = None;
    unsafe {
        d3d.device()
            .CreateTexture2D(&desc, None, Some(&mut texture))?;
    }

    texture.ok_or_else(|| CaptureError::WindowsApi {
        message: "Failed to create staging texture".to_string(),
        source: None,
    })
}

impl DuplicationBackend for DxgiBackend {
    fn output_index(&self) -> u32 {
        self.output_index
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> CaptureResult<FrameInfo> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        let result = unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut info, &mut resource)
        };

        if let Err(e) = result {
            let code = e.code();
            if code == DXGI_ERROR_WAIT_TIMEOUT {
                return Err(CaptureError::Timeout);
            }
            if code == DXGI_ERROR_ACCESS_LOST {
                return Err(CaptureError::AccessLost);
            }
            return Err(CaptureError::duplication(format!(
                "failed to acquire next frame: {}",
                e.message()
            )));
        }

        self.held = resource;

        Ok(FrameInfo {
            last_present_time: info.LastPresentTime,
            last_mouse_update_time: info.LastMouseUpdateTime,
            accumulated_frames: info.AccumulatedFrames,
            rects_coalesced: info.RectsCoalesced.as_bool(),
            protected_content_masked_out: info.ProtectedContentMaskedOut.as_bool(),
            pointer_x: info.PointerPosition.Position.x,
            pointer_y: info.PointerPosition.Position.y,
            pointer_visible: info.PointerPosition.Visible.as_bool(),
            total_metadata_buffer_size: info.TotalMetadataBufferSize,
            pointer_shape_buffer_size: info.PointerShapeBufferSize,
        })
    }

    fn moved_regions(&mut self, metadata_size: u32) -> CaptureResult<Vec<MovedRegion>> {
        let capacity = metadata_size as usize / mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>() + 1;
        let mut rects = vec![DXGI_OUTDUPL_MOVE_RECT::default(); capacity];
        let mut required = 0u32;

        unsafe {
            self.duplication.GetFrameMoveRects(
                (rects.len() * mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>()) as u32,
                rects.as_mut_ptr(),
                &mut required,
            )?;
        }

        rects.truncate(required as usize / mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>());
        Ok(rects
            .iter()
            .map(|r| MovedRegion {
                source: to_point(r.SourcePoint),
                destination: to_rect(r.DestinationRect),
            })
            .collect())
    }

    fn dirty_regions(&mut self, metadata_size: u32) -> CaptureResult<Vec<Rect>> {
        let capacity = metadata_size as usize / mem::size_of::<RECT>() + 1;
        let mut rects = vec![RECT::default(); capacity];
        let mut required = 0u32;

        unsafe {
            self.duplication.GetFrameDirtyRects(
                (rects.len() * mem::size_of::<RECT>()) as u32,
                rects.as_mut_ptr(),
                &mut required,
            )?;
        }

        rects.truncate(required as usize / mem::size_of::<RECT>());
        Ok(rects.iter().copied().map(to_rect).collect())
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo> {
        let mut shape = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        let mut required = 0u32;

        unsafe {
            self.duplication
                .GetFramePointerShape(
                    buffer.len() as u32,
                    buffer.as_mut_ptr().cast(),
                    &mut required,
                    &mut shape,
                )
                .map_err(|e| {
                    CaptureError::duplication(format!(
                        "failed to get frame pointer shape: {}",
                        e.message()
                    ))
                })?;
        }

        Ok(PointerShapeInfo {
            shape_type: shape.Type,
            width: shape.Width,
            height: shape.Height,
            pitch: shape.Pitch,
            hot_spot_x: shape.HotSpot.x,
            hot_spot_y: shape.HotSpot.y,
        })
    }

    fn copy_frame(&mut self, buffer: &mut Vec<u8>) -> CaptureResult<usize> {
        let resource = self
            .held
            .take()
            .ok_or_else(|| CaptureError::duplication("no desktop resource is held"))?;
        let texture: ID3D11Texture2D = resource.cast()?;
        let context = self.d3d.context();

        unsafe {
            context.CopyResource(&self.staging, &texture);
        }

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            context.Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;
        }

        let row_pitch = mapped.RowPitch as usize;
        let len = row_pitch * self.height as usize;
        let source = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        buffer.clear();
        buffer.extend_from_slice(source);

        unsafe {
            context.Unmap(&self.staging, 0);
        }

        Ok(row_pitch)
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        self.held = None;
        unsafe { self.duplication.ReleaseFrame()? };
        Ok(())
    }
}

fn to_point(point: POINT) -> Point {
    Point::new(point.x, point.y)
}

fn to_rect(rect: RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

/// Creates [`DxgiBackend`] sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DxgiBackendFactory;

impl BackendFactory for DxgiBackendFactory {
    fn create(
        &self,
        adapter_index: u32,
        output_index: u32,
    ) -> CaptureResult<Box<dyn DuplicationBackend>> {
        Ok(Box::new(DxgiBackend::new(adapter_index, output_index)?))
    }
}
