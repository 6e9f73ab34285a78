//! Event system for UI decoupling.
//!
//! Allows the CLI (or tests) to follow a flash run without tight coupling
//! to the protocol logic.

use std::fmt;

use crate::payload::UploadPass;
use crate::payload::scramble::printable;
use crate::protocol::frame::to_hex;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Phases of a flash run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    /// Opening the device.
    Connecting,
    /// Reading ISP and keyboard versions.
    QueryVersions,
    /// Chip reset before flashing.
    ChipReset,
    /// Waiting for the device to come back after the reset.
    Reenumerating,
    /// Submitting the profile header.
    ProfileCheck,
    /// Erasing the application flash.
    Erase,
    /// Writing the header region.
    HeaderPass,
    /// Writing the full image.
    ImagePass,
    /// Final reset into the new firmware.
    Reboot,
    /// All operations complete.
    Complete,
    /// Error state.
    Error,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Connecting => write!(f, "Connecting"),
            FlashPhase::QueryVersions => write!(f, "Query Versions"),
            FlashPhase::ChipReset => write!(f, "Chip Reset"),
            FlashPhase::Reenumerating => write!(f, "Re-enumerating"),
            FlashPhase::ProfileCheck => write!(f, "Profile Check"),
            FlashPhase::Erase => write!(f, "Erase"),
            FlashPhase::HeaderPass => write!(f, "Header Pass"),
            FlashPhase::ImagePass => write!(f, "Image Pass"),
            FlashPhase::Reboot => write!(f, "Reboot"),
            FlashPhase::Complete => write!(f, "Complete"),
            FlashPhase::Error => write!(f, "Error"),
        }
    }
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted during a flash run.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// Device connected.
    DeviceConnected { vid: u16, pid: u16 },
    /// Device released or dropped off the bus.
    DeviceDisconnected,
    /// Phase changed.
    PhaseChanged { from: FlashPhase, to: FlashPhase },
    /// Firmware versions reported by the device.
    Versions { isp: u8, kbd: u8 },
    /// Profile header of the image, as stored and descrambled.
    ProfileHeader {
        scrambled: Vec<u8>,
        descrambled: Vec<u8>,
    },
    /// A block was written. `current` counts completed blocks in the pass.
    Progress {
        pass: UploadPass,
        current: usize,
        total: usize,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Feature report sent or received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
    /// Error occurred.
    Error { message: String },
    /// Flash completed successfully.
    Complete,
}

/// Observer trait for receiving flash events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            FlashEvent::DeviceDisconnected => {
                tracing::info!("Device disconnected");
            }
            FlashEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            FlashEvent::Versions { isp, kbd } => {
                tracing::info!(isp = isp, kbd = kbd, "Firmware versions");
            }
            FlashEvent::ProfileHeader {
                scrambled,
                descrambled,
            } => {
                tracing::info!(
                    scrambled = %to_hex(scrambled),
                    unscrambled = %to_hex(descrambled),
                    text = %printable(descrambled),
                    "Profile header"
                );
            }
            FlashEvent::Progress {
                pass,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(pass = %pass, block = current, total = total, progress = %format!("{}%", pct), "Progress");
            }
            FlashEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            FlashEvent::Packet {
                direction,
                length,
                data,
            } => {
                tracing::trace!(dir = %direction, len = length, data = %to_hex(data), "USB Packet");
            }
            FlashEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            FlashEvent::Complete => {
                tracing::info!("Flash complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(FlashPhase::HeaderPass.to_string(), "Header Pass");
        assert_eq!(FlashPhase::Reenumerating.to_string(), "Re-enumerating");
        assert_eq!(PacketDirection::Rx.to_string(), "RX");
    }

    #[test]
    fn test_observers_accept_all_events() {
        let events = [
            FlashEvent::DeviceConnected { vid: 0x0F39, pid: 0 },
            FlashEvent::Progress {
                pass: UploadPass::Image,
                current: 0,
                total: 0,
            },
            FlashEvent::ProfileHeader {
                scrambled: vec![0xB3],
                descrambled: vec![0x4C],
            },
            FlashEvent::Complete,
        ];
        for event in &events {
            NullObserver.on_event(event);
            TracingObserver.on_event(event);
        }
    }
}
