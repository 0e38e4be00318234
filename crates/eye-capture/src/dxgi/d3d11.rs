//! Direct3D 11 device creation on a chosen adapter.

use tracing::{debug, instrument};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_UNKNOWN;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIAdapter, IDXGIAdapter1, IDXGIFactory1};

use crate::error::CaptureError;
use crate::CaptureResult;

/// Direct3D 11 device bound to one adapter.
pub struct D3D11Device {
    adapter: IDXGIAdapter1,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3D11Device {
    /// Create a device on the adapter at `adapter_index`.
    #[instrument(name = "d3d11_create_device")]
    pub fn on_adapter(adapter_index: u32) -> CaptureResult<Self> {
        let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1()? };
        let adapter = unsafe { factory.EnumAdapters1(adapter_index) }.map_err(|e| {
            CaptureError::duplication(format!(
                "no adapter at index {}: {}",
                adapter_index,
                e.message()
            ))
        })?;

        let base: IDXGIAdapter = adapter.cast()?;
        let mut device = None;
        let mut context = None;

        unsafe {
            D3D11CreateDevice(
                &base,
                D3D_DRIVER_TYPE_UNKNOWN,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )?;
        }

        let device = device.ok_or_else(|| CaptureError::WindowsApi {
            message: "Failed to create D3D11 device".to_string(),
            source: None,
        })?;

        let context = context.ok_or_else(|| CaptureError::WindowsApi {
            message: "Failed to get D3D11 device context".to_string(),
            source: None,
        })?;

        debug!(adapter_index, "Created D3D11 device for duplication");
        Ok(Self {
            adapter,
            device,
            context,
        })
    }

    pub fn adapter(&self) -> &IDXGIAdapter1 {
        &self.adapter
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }
}
