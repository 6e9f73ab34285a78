//! HyISP-Core: firmware flashing for TG3 keyboard controllers over USB HID.
//!
//! The controllers expose a HyISP bootloader that accepts checksummed command
//! frames through HID feature reports. This crate implements the frame codec,
//! the report transport, the firmware image transform and the flash
//! procedure on top of them.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, opcodes, frame encoding and decoding
//! - **Transport**: USB control transfers (nusb, mock) and report chunking
//! - **Payload**: Firmware image, upload passes, profile scrambling
//! - **State**: Ordering rules of a device session
//! - **Session**: One connection, one command at a time
//! - **Events**: Observer pattern for UI decoupling
//! - **Flasher**: The complete flash procedure across two connections
//!
//! # Example
//!
//! ```no_run
//! use hyisp_core::{FirmwareImage, FlashConfig, FlashOrchestrator, NusbConnector};
//!
//! let image = FirmwareImage::from_path("firmware.bin").expect("bad image");
//! let mut flasher = FlashOrchestrator::new(NusbConnector, FlashConfig::default());
//! flasher.run(&image).expect("flash failed");
//! ```

pub mod events;
pub mod flasher;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{
    FlashEvent, FlashObserver, FlashPhase, LogLevel, NullObserver, PacketDirection,
    TracingObserver,
};
pub use flasher::{FlashConfig, FlashOrchestrator, ObservableTransport};
pub use payload::{FirmwareError, FirmwareImage, UploadPass};
pub use protocol::{Command, Frame, FrameError, Opcode};
pub use session::{DeviceSession, SessionError};
pub use state::SessionState;
pub use transport::{
    DeviceConnector, MockConnector, MockTransport, NusbConnector, NusbTransport, TransportError,
    UsbTransport,
};
