//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for the control-transfer operations the
//! flashing protocol needs, and `DeviceConnector` for opening a device,
//! allowing different implementations (nusb, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Unusable max packet size {0}")]
    InvalidPacketSize(usize),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Setup packet fields of a control transfer, minus the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
}

/// Abstract USB transport interface over one claimed interface.
///
/// This trait enables:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait UsbTransport: Send {
    /// bMaxPacketSize0 of the device.
    fn max_packet_size(&self) -> usize;

    /// Issue a USB port reset on the open handle.
    fn reset_device(&self) -> Result<(), TransportError>;

    /// Host-to-device control transfer. Returns the number of bytes sent.
    fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<usize, TransportError>;

    /// Device-to-host control transfer of up to `length` bytes.
    fn control_in(&self, setup: ControlSetup, length: u16) -> Result<Vec<u8>, TransportError>;

    /// Release the claimed interface. Further transfers fail.
    fn release_interface(&mut self) -> Result<(), TransportError>;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

/// Opens a device and claims an interface on it.
pub trait DeviceConnector {
    type Transport: UsbTransport;

    fn open(&self, vid: u16, pid: u16, interface: u8) -> Result<Self::Transport, TransportError>;
}
