//! Mock USB transport for testing.
//!
//! Records every control transfer and answers GET_REPORT from a response
//! queue. With a [`SimulatedDevice`] attached, the mock reassembles the
//! outbound reports into command frames and queues the response a HyISP
//! controller would give, which lets the whole flash sequence run without
//! hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{ControlSetup, DeviceConnector, TransportError, UsbTransport};
use crate::protocol::constants::{HOST_FRAME_MARKER, HYISP_PRODUCT_ID, TG3_VENDOR_ID};
use crate::protocol::frame::{encode_response, parse_command};
use crate::protocol::{Opcode, REPORT_ID};

/// One recorded host-to-device control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTransfer {
    pub setup: ControlSetup,
    pub data: Vec<u8>,
}

/// Behaviour of the simulated controller.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub isp_version: u8,
    pub kbd_version: u8,
    /// Answer GET_FW_PROFILE with the error status.
    pub reject_profile: bool,
    /// Report a failed erase.
    pub fail_erase: bool,
    /// Report a failed write for this sequence number.
    pub fail_block: Option<u16>,
    /// Drop off the bus once the RESET_CHIP response has been read.
    pub disconnect_on_reset: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            isp_version: 0x11,
            kbd_version: 0x18,
            reject_profile: false,
            fail_erase: false,
            fail_block: None,
            disconnect_on_reset: true,
        }
    }
}

impl SimulatedDevice {
    fn respond(&self, opcode: u8, payload: &[u8]) -> (Vec<u8>, bool) {
        const OK: u8 = 0x01;
        const REJECT: u8 = 0x00;

        let frame = match Opcode::from_u8(opcode) {
            Some(Opcode::GetFwVersionIsp) => encode_response(OK, &[0x00, self.isp_version]),
            Some(Opcode::GetFwVersionKbd) => encode_response(OK, &[0x00, self.kbd_version]),
            Some(Opcode::EraseChip) => encode_response(OK, &[u8::from(self.fail_erase)]),
            Some(Opcode::WriteBlock) => {
                let seq = payload
                    .get(..2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]));
                let failed = seq.is_some() && seq == self.fail_block;
                encode_response(OK, &[u8::from(failed)])
            }
            Some(Opcode::GetFwProfile) if self.reject_profile => encode_response(REJECT, &[0x00]),
            Some(_) => encode_response(OK, &[0x00]),
            None => encode_response(REJECT, &[0x00]),
        };
        let drops = opcode == Opcode::ResetChip.as_u8() && self.disconnect_on_reset;
        (frame.unwrap_or_default(), drops)
    }
}

/// Mock transport for unit testing the session and orchestrator.
///
/// Clones share state, so a test can keep a handle while the session owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued GET_REPORT responses.
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured SET_REPORT transfers.
    transfers: Arc<Mutex<Vec<ControlTransfer>>>,
    /// Captured GET_REPORT requests.
    reads: Arc<Mutex<Vec<(ControlSetup, u16)>>>,
    /// Command frames reassembled from the transfers.
    commands: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    /// Partially received command frame.
    pending: Arc<Mutex<Vec<u8>>>,
    device: Option<SimulatedDevice>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Disconnect after the next GET_REPORT.
    drop_after_read: Arc<Mutex<bool>>,
    released: Arc<Mutex<bool>>,
    port_resets: Arc<Mutex<usize>>,
    max_packet_size: usize,
    vid: u16,
    pid: u16,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_max_packet_size(64)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            transfers: Arc::new(Mutex::new(Vec::new())),
            reads: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
            device: None,
            connected: Arc::new(Mutex::new(true)),
            drop_after_read: Arc::new(Mutex::new(false)),
            released: Arc::new(Mutex::new(false)),
            port_resets: Arc::new(Mutex::new(0)),
            max_packet_size,
            vid: TG3_VENDOR_ID,
            pid: HYISP_PRODUCT_ID,
        }
    }

    /// Mock that answers commands like a real controller.
    pub fn simulated(device: SimulatedDevice, max_packet_size: usize) -> Self {
        Self {
            device: Some(device),
            ..Self::with_max_packet_size(max_packet_size)
        }
    }

    /// Queue a raw response to be returned on next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        lock(&self.responses).push_back(bytes.to_vec());
    }

    /// Queue a well-formed device frame.
    pub fn queue_frame(&self, status: u8, payload: &[u8]) {
        if let Ok(frame) = encode_response(status, payload) {
            self.queue_response(&frame);
        }
    }

    /// Get all captured SET_REPORT transfers.
    pub fn get_transfers(&self) -> Vec<ControlTransfer> {
        lock(&self.transfers).clone()
    }

    /// Get all captured GET_REPORT requests.
    pub fn get_reads(&self) -> Vec<(ControlSetup, u16)> {
        lock(&self.reads).clone()
    }

    /// Get every complete command frame as `(opcode, payload)`.
    pub fn get_commands(&self) -> Vec<(u8, Vec<u8>)> {
        lock(&self.commands).clone()
    }

    /// Total number of control transfers in either direction.
    pub fn transfer_count(&self) -> usize {
        lock(&self.transfers).len() + lock(&self.reads).len()
    }

    pub fn port_resets(&self) -> usize {
        *lock(&self.port_resets)
    }

    pub fn is_released(&self) -> bool {
        *lock(&self.released)
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device re-enumeration: connected and not claimed by anyone.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
        *lock(&self.released) = false;
        *lock(&self.drop_after_read) = false;
    }

    pub fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }

    fn check_usable(&self) -> Result<(), TransportError> {
        if !*lock(&self.connected) {
            return Err(TransportError::Disconnected);
        }
        if *lock(&self.released) {
            return Err(TransportError::WriteFailed("interface released".into()));
        }
        Ok(())
    }

    fn absorb_report(&self, report: &[u8]) {
        if report.first() != Some(&REPORT_ID) {
            return;
        }
        let mut pending = lock(&self.pending);
        pending.extend_from_slice(&report[1..]);

        if pending.first() != Some(&HOST_FRAME_MARKER) {
            pending.clear();
            return;
        }
        let Some(&length) = pending.get(1) else {
            return;
        };
        let total = length as usize + 2;
        if pending.len() < total {
            return;
        }

        let raw: Vec<u8> = pending.drain(..).take(total).collect();
        let Ok(frame) = parse_command(&raw) else {
            return;
        };
        lock(&self.commands).push((frame.code(), frame.payload().to_vec()));

        if let Some(device) = &self.device {
            let (response, drops) = device.respond(frame.code(), frame.payload());
            lock(&self.responses).push_back(response);
            if drops {
                *lock(&self.drop_after_read) = true;
            }
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn reset_device(&self) -> Result<(), TransportError> {
        self.check_usable()?;
        *lock(&self.port_resets) += 1;
        Ok(())
    }

    fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<usize, TransportError> {
        self.check_usable()?;
        lock(&self.transfers).push(ControlTransfer {
            setup,
            data: data.to_vec(),
        });
        self.absorb_report(data);
        Ok(data.len())
    }

    fn control_in(&self, setup: ControlSetup, length: u16) -> Result<Vec<u8>, TransportError> {
        self.check_usable()?;
        lock(&self.reads).push((setup, length));

        let mut data = lock(&self.responses)
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 1000 })?;
        data.resize(length as usize, 0);

        let mut drop_after_read = lock(&self.drop_after_read);
        if *drop_after_read {
            *drop_after_read = false;
            *lock(&self.connected) = false;
        }
        Ok(data)
    }

    fn release_interface(&mut self) -> Result<(), TransportError> {
        if !*lock(&self.connected) {
            return Err(TransportError::Disconnected);
        }
        *lock(&self.released) = true;
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Connector that hands out clones of one mock device.
#[derive(Clone)]
pub struct MockConnector {
    device: MockTransport,
    opens: Arc<Mutex<usize>>,
    present: Arc<Mutex<bool>>,
}

impl MockConnector {
    pub fn new(device: MockTransport) -> Self {
        Self {
            device,
            opens: Arc::new(Mutex::new(0)),
            present: Arc::new(Mutex::new(true)),
        }
    }

    /// Number of successful `open` calls.
    pub fn opens(&self) -> usize {
        *lock(&self.opens)
    }

    /// Simulate the device being unplugged (or never showing up).
    pub fn set_present(&self, present: bool) {
        *lock(&self.present) = present;
    }

    pub fn device(&self) -> &MockTransport {
        &self.device
    }
}

impl DeviceConnector for MockConnector {
    type Transport = MockTransport;

    fn open(&self, vid: u16, pid: u16, _interface: u8) -> Result<MockTransport, TransportError> {
        if !*lock(&self.present) || vid != self.device.vid || pid != self.device.pid {
            return Err(TransportError::DeviceNotFound { vid, pid });
        }
        self.device.reconnect();
        *lock(&self.opens) += 1;
        Ok(self.device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{decode, encode};
    use crate::transport::report::{GET_FEATURE_REPORT, SET_FEATURE_REPORT};

    #[test]
    fn test_mock_response_queue() {
        let mock = MockTransport::with_max_packet_size(16);
        mock.queue_frame(0x01, &[0x00, 0x05]);

        let data = mock.control_in(GET_FEATURE_REPORT, 16).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(decode(&data).unwrap().byte(4), Some(0x05));

        // Queue is empty now
        assert!(matches!(
            mock.control_in(GET_FEATURE_REPORT, 16),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_reassembles_commands() {
        let mock = MockTransport::with_max_packet_size(4);
        let frame = encode(0xA1, &[0x01, 0x00, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        for chunk in frame.chunks(3) {
            let mut report = vec![REPORT_ID];
            report.extend_from_slice(chunk);
            mock.control_out(SET_FEATURE_REPORT, &report).unwrap();
        }

        let commands = mock.get_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, 0xA1);
        assert_eq!(commands[0].1, vec![0x01, 0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_simulated_device_drops_after_reset() {
        let mock = MockTransport::simulated(SimulatedDevice::default(), 64);
        let frame = encode(Opcode::ResetChip.as_u8(), &[]).unwrap();
        let mut report = vec![REPORT_ID];
        report.extend_from_slice(&frame);
        mock.control_out(SET_FEATURE_REPORT, &report).unwrap();

        assert!(mock.is_connected());
        let data = mock.control_in(GET_FEATURE_REPORT, 64).unwrap();
        assert!(decode(&data).is_ok());
        assert!(!mock.is_connected());

        let mut handle = mock.clone();
        assert!(matches!(
            handle.release_interface(),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.control_out(SET_FEATURE_REPORT, b"test").is_err());
    }

    #[test]
    fn test_connector_counts_opens() {
        let connector = MockConnector::new(MockTransport::new());
        assert!(connector.open(TG3_VENDOR_ID, HYISP_PRODUCT_ID, 0).is_ok());
        assert_eq!(connector.opens(), 1);

        connector.set_present(false);
        assert!(matches!(
            connector.open(TG3_VENDOR_ID, HYISP_PRODUCT_ID, 0),
            Err(TransportError::DeviceNotFound { .. })
        ));
        assert_eq!(connector.opens(), 1);
    }
}
