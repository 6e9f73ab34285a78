//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod report;
pub mod traits;

pub use mock::{ControlTransfer, MockConnector, MockTransport, SimulatedDevice};
pub use nusb::{NusbConnector, NusbTransport};
pub use report::{ReportChannel, split_reports};
pub use traits::{ControlSetup, DeviceConnector, TransportError, UsbTransport};
