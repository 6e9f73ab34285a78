//! nusb-based USB transport implementation.

use std::time::Duration;

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{ControlSetup, DeviceConnector, TransportError, UsbTransport};
use crate::protocol::constants::CONTROL_TIMEOUT_MS;

/// nusb-based USB transport.
pub struct NusbTransport {
    device: Device,
    interface: Option<Interface>,
    max_packet_size: usize,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open a device with specific VID/PID and claim `interface`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16, interface: u8) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let claimed = device.claim_interface(interface).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            }
        })?;

        let max_packet_size = device.device_descriptor().max_packet_size_0() as usize;

        info!(max_packet_size, interface, "Device opened successfully");

        Ok(Self {
            device,
            interface: Some(claimed),
            max_packet_size,
            vid,
            pid,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface
            .as_ref()
            .ok_or_else(|| TransportError::WriteFailed("interface released".into()))
    }
}

fn control_type(request_type: u8) -> ControlType {
    match (request_type >> 5) & 0x03 {
        0 => ControlType::Standard,
        1 => ControlType::Class,
        _ => ControlType::Vendor,
    }
}

fn recipient(request_type: u8) -> Recipient {
    match request_type & 0x1F {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        _ => Recipient::Other,
    }
}

fn map_transfer_error(e: TransferError, make: fn(String) -> TransportError) -> TransportError {
    match e {
        TransferError::Disconnected => TransportError::Disconnected,
        other => make(other.to_string()),
    }
}

impl UsbTransport for NusbTransport {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    #[instrument(skip(self))]
    fn reset_device(&self) -> Result<(), TransportError> {
        self.device
            .reset()
            .wait()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        debug!("Port reset complete");
        Ok(())
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<usize, TransportError> {
        let request = ControlOut {
            control_type: control_type(setup.request_type),
            recipient: recipient(setup.request_type),
            request: setup.request,
            value: setup.value,
            index: setup.index,
            data,
        };
        self.interface()?
            .control_out(request, Duration::from_millis(CONTROL_TIMEOUT_MS))
            .wait()
            .map_err(|e| map_transfer_error(e, TransportError::WriteFailed))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self))]
    fn control_in(&self, setup: ControlSetup, length: u16) -> Result<Vec<u8>, TransportError> {
        let request = ControlIn {
            control_type: control_type(setup.request_type),
            recipient: recipient(setup.request_type),
            request: setup.request,
            value: setup.value,
            index: setup.index,
            length,
        };
        let data = self
            .interface()?
            .control_in(request, Duration::from_millis(CONTROL_TIMEOUT_MS))
            .wait()
            .map_err(|e| map_transfer_error(e, TransportError::ReadFailed))?;

        debug!(bytes_read = data.len(), "Read complete");
        Ok(data)
    }

    fn release_interface(&mut self) -> Result<(), TransportError> {
        // nusb releases the claim when the handle is dropped.
        self.interface.take();
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Opens HyISP devices through nusb.
#[derive(Debug, Default, Clone, Copy)]
pub struct NusbConnector;

impl DeviceConnector for NusbConnector {
    type Transport = NusbTransport;

    fn open(&self, vid: u16, pid: u16, interface: u8) -> Result<NusbTransport, TransportError> {
        NusbTransport::open_with_ids(vid, pid, interface)
    }
}
