//! Flash orchestrator - drives a device through the complete flash procedure.
//!
//! The procedure spans two connections: the first one reads the versions
//! and resets the chip into its bootloader, which makes the device leave the
//! bus. After a fixed re-enumeration wait, the second connection checks the
//! profile, erases, writes both upload passes and reboots the device.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::events::{
    FlashEvent, FlashObserver, FlashPhase, LogLevel, PacketDirection, TracingObserver,
};
use crate::payload::{FirmwareImage, UploadPass};
use crate::protocol::constants::{
    COMMAND_SETTLE_MS, HYISP_INTERFACE, HYISP_PRODUCT_ID, REENUMERATE_MS, TG3_VENDOR_ID,
};
use crate::session::DeviceSession;
use crate::transport::{ControlSetup, DeviceConnector, TransportError, UsbTransport};

/// Timing of a flash run.
///
/// The waits are fixed pauses the device needs, not retry intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Pause before and after the first chip reset, and after erase (ms).
    pub command_settle_ms: u64,
    /// Wait between closing the first connection and reopening (ms).
    pub reenumerate_ms: u64,
    /// USB port reset right after the first connection.
    pub reset_port_on_connect: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            command_settle_ms: COMMAND_SETTLE_MS,
            reenumerate_ms: REENUMERATE_MS,
            reset_port_on_connect: true,
        }
    }
}

impl FlashConfig {
    /// Configuration without any waits.
    pub fn immediate() -> Self {
        Self {
            command_settle_ms: 0,
            reenumerate_ms: 0,
            ..Self::default()
        }
    }

    pub fn command_settle(&self) -> Duration {
        Duration::from_millis(self.command_settle_ms)
    }

    pub fn reenumerate(&self) -> Duration {
        Duration::from_millis(self.reenumerate_ms)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlashConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

type ObservedSession<T, O> = DeviceSession<ObservableTransport<T, O>>;

/// Flash orchestrator - sequences a [`DeviceSession`] through a flash run.
pub struct FlashOrchestrator<C: DeviceConnector, O: FlashObserver> {
    connector: C,
    config: FlashConfig,
    observer: Arc<O>,
    phase: FlashPhase,
}

impl<C: DeviceConnector> FlashOrchestrator<C, TracingObserver> {
    /// Create a new orchestrator with default tracing observer.
    pub fn new(connector: C, config: FlashConfig) -> Self {
        Self::with_observer(connector, config, Arc::new(TracingObserver))
    }
}

impl<C: DeviceConnector, O: FlashObserver + 'static> FlashOrchestrator<C, O> {
    /// Create a new orchestrator with a custom observer.
    pub fn with_observer(connector: C, config: FlashConfig, observer: Arc<O>) -> Self {
        Self {
            connector,
            config,
            observer,
            phase: FlashPhase::Connecting,
        }
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    pub fn phase(&self) -> FlashPhase {
        self.phase
    }

    fn emit(&self, event: FlashEvent) {
        self.observer.on_event(&event);
    }

    /// Status line for the user.
    fn status(&self, message: impl Into<String>) {
        self.emit(FlashEvent::Log {
            level: LogLevel::Info,
            message: message.into(),
        });
    }

    fn set_phase(&mut self, to: FlashPhase) {
        self.emit(FlashEvent::PhaseChanged {
            from: self.phase,
            to,
        });
        self.phase = to;
    }

    /// Flash `image` onto the device.
    #[instrument(skip_all, fields(image_len = image.len()))]
    pub fn run(&mut self, image: &FirmwareImage) -> Result<()> {
        let result = self.flash(image);
        self.finish(&result);
        result
    }

    /// Read both firmware versions without touching the flash.
    #[instrument(skip_all)]
    pub fn query_versions(&mut self) -> Result<(u8, u8)> {
        let result = self.versions_only();
        self.finish(&result);
        result
    }

    fn finish<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => {
                self.set_phase(FlashPhase::Complete);
                self.emit(FlashEvent::Complete);
            }
            Err(e) => {
                self.set_phase(FlashPhase::Error);
                self.emit(FlashEvent::Error {
                    message: format!("{:#}", e),
                });
            }
        }
    }

    fn versions_only(&mut self) -> Result<(u8, u8)> {
        self.set_phase(FlashPhase::Connecting);
        let mut session = self.connect()?;
        self.set_phase(FlashPhase::QueryVersions);
        let versions = self.read_versions(&mut session)?;
        session.close()?;
        self.emit(FlashEvent::DeviceDisconnected);
        Ok(versions)
    }

    fn flash(&mut self, image: &FirmwareImage) -> Result<()> {
        info!(
            size = image.len(),
            header_blocks = image.block_count(UploadPass::Header),
            image_blocks = image.block_count(UploadPass::Image),
            "Starting flash"
        );

        // First connection: identify, then reset into the bootloader.
        self.set_phase(FlashPhase::Connecting);
        let mut session = self.connect()?;
        if self.config.reset_port_on_connect {
            session.reset_port().context("USB port reset failed")?;
        }

        self.set_phase(FlashPhase::QueryVersions);
        self.read_versions(&mut session)?;

        self.set_phase(FlashPhase::ChipReset);
        self.settle(self.config.command_settle());
        session.reset_chip().context("Chip reset failed")?;
        self.settle(self.config.command_settle());
        session.close()?;
        self.emit(FlashEvent::DeviceDisconnected);

        self.wait_for_reenumeration();

        // Second connection: the device now runs the bootloader.
        self.set_phase(FlashPhase::Connecting);
        let mut session = self
            .connect()
            .context("Device did not come back after chip reset")?;

        self.set_phase(FlashPhase::ProfileCheck);
        self.emit(FlashEvent::ProfileHeader {
            scrambled: image.profile_header().to_vec(),
            descrambled: image.descrambled_profile_header(),
        });
        session
            .check_profile(image.profile_header())
            .context("Profile check failed")?;

        self.set_phase(FlashPhase::Erase);
        self.status("Erasing chip");
        session.erase_chip().context("Erase failed")?;
        self.settle(self.config.command_settle());

        // The header region goes first, then the whole image. The vendor
        // flasher does the same; do not merge or reorder the passes.
        self.status(format!(
            "Starting firmware write: {} + {} blocks",
            image.block_count(UploadPass::Header),
            image.block_count(UploadPass::Image)
        ));
        self.set_phase(FlashPhase::HeaderPass);
        self.upload_pass(&mut session, image, UploadPass::Header)?;
        self.set_phase(FlashPhase::ImagePass);
        self.upload_pass(&mut session, image, UploadPass::Image)?;

        self.set_phase(FlashPhase::Reboot);
        self.status("Rebooting into new firmware");
        session.reset_chip().context("Final reset failed")?;
        session.close()?;
        self.emit(FlashEvent::DeviceDisconnected);

        info!("Firmware written");
        Ok(())
    }

    fn connect(&self) -> Result<ObservedSession<C::Transport, O>> {
        let transport = self
            .connector
            .open(TG3_VENDOR_ID, HYISP_PRODUCT_ID, HYISP_INTERFACE)
            .context("Failed to open HyISP device")?;
        self.emit(FlashEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });

        let observed = ObservableTransport {
            inner: transport,
            observer: Arc::clone(&self.observer),
        };
        Ok(DeviceSession::open(observed)?)
    }

    fn read_versions<T: UsbTransport>(&self, session: &mut DeviceSession<T>) -> Result<(u8, u8)> {
        let isp = session.isp_version().context("ISP version query failed")?;
        let kbd = session
            .kbd_version()
            .context("Keyboard version query failed")?;
        self.emit(FlashEvent::Versions { isp, kbd });
        self.status(format!("ISP version: 0x{:02X}", isp));
        self.status(format!("Keyboard version: 0x{:02X}", kbd));
        Ok((isp, kbd))
    }

    /// Fixed wait for the device to drop off the bus and come back.
    fn wait_for_reenumeration(&mut self) {
        self.set_phase(FlashPhase::Reenumerating);
        info!(
            wait_ms = self.config.reenumerate_ms,
            "Waiting for device to re-enumerate"
        );
        self.settle(self.config.reenumerate());
    }

    fn settle(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        debug!(ms = duration.as_millis() as u64, "Settling");
        thread::sleep(duration);
    }

    fn upload_pass<T: UsbTransport>(
        &self,
        session: &mut DeviceSession<T>,
        image: &FirmwareImage,
        pass: UploadPass,
    ) -> Result<()> {
        let total = image.block_count(pass);
        info!(pass = %pass, blocks = total, "Uploading");

        for (i, block) in image.blocks(pass).enumerate() {
            session
                .upload_block(block.seq, block.data)
                .with_context(|| format!("{} pass failed at block {}/{}", pass, i, total))?;
            self.emit(FlashEvent::Progress {
                pass,
                current: i + 1,
                total,
            });
        }
        Ok(())
    }
}

/// Transport wrapper that emits packet events.
pub struct ObservableTransport<T: UsbTransport, O: FlashObserver> {
    inner: T,
    observer: Arc<O>,
}

impl<T: UsbTransport, O: FlashObserver> UsbTransport for ObservableTransport<T, O> {
    fn max_packet_size(&self) -> usize {
        self.inner.max_packet_size()
    }

    fn reset_device(&self) -> Result<(), TransportError> {
        self.inner.reset_device()
    }

    fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.control_out(setup, data);
        if res.is_ok() {
            self.observer.on_event(&FlashEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
                data: data.to_vec(),
            });
        }
        res
    }

    fn control_in(&self, setup: ControlSetup, length: u16) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.control_in(setup, length);
        if let Ok(data) = &res {
            self.observer.on_event(&FlashEvent::Packet {
                direction: PacketDirection::Rx,
                length: data.len(),
                data: data.clone(),
            });
        }
        res
    }

    fn release_interface(&mut self) -> Result<(), TransportError> {
        self.inner.release_interface()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}
