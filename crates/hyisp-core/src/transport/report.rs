//! HID feature report framing.
//!
//! Outbound frames are cut into reports of `max_packet_size` bytes, each
//! starting with the report ID. Responses always fit in a single report and
//! are read back with one GET_REPORT.

use tracing::{debug, trace};

use super::traits::{ControlSetup, TransportError, UsbTransport};
use crate::protocol::constants::{
    FEATURE_REPORT_VALUE, HID_GET_REPORT, HID_SET_REPORT, HYISP_INTERFACE,
    REQUEST_TYPE_CLASS_INTERFACE_IN, REQUEST_TYPE_CLASS_INTERFACE_OUT, REPORT_ID,
};
use crate::protocol::frame::to_hex;

/// SET_REPORT setup for feature report 1 on the HyISP interface.
pub const SET_FEATURE_REPORT: ControlSetup = ControlSetup {
    request_type: REQUEST_TYPE_CLASS_INTERFACE_OUT,
    request: HID_SET_REPORT,
    value: FEATURE_REPORT_VALUE,
    index: HYISP_INTERFACE as u16,
};

/// GET_REPORT setup for feature report 1 on the HyISP interface.
pub const GET_FEATURE_REPORT: ControlSetup = ControlSetup {
    request_type: REQUEST_TYPE_CLASS_INTERFACE_IN,
    request: HID_GET_REPORT,
    value: FEATURE_REPORT_VALUE,
    index: HYISP_INTERFACE as u16,
};

/// Split a frame into feature reports.
///
/// Each report carries `max_packet_size - 1` frame bytes after the report
/// ID; the last one only carries what is left.
pub fn split_reports(frame: &[u8], max_packet_size: usize) -> Result<Vec<Vec<u8>>, TransportError> {
    if max_packet_size < 2 {
        return Err(TransportError::InvalidPacketSize(max_packet_size));
    }
    let chunk = max_packet_size - 1;
    let (mut count, remainder) = (frame.len() / chunk, frame.len() % chunk);
    if remainder != 0 {
        count += 1;
    }

    let reports = (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = (start + chunk).min(frame.len());
            let mut report = Vec::with_capacity(end - start + 1);
            report.push(REPORT_ID);
            report.extend_from_slice(&frame[start..end]);
            report
        })
        .collect();
    Ok(reports)
}

/// Feature report channel over a claimed transport.
pub struct ReportChannel<T: UsbTransport> {
    transport: T,
    max_packet_size: usize,
}

impl<T: UsbTransport> ReportChannel<T> {
    pub fn new(transport: T) -> Result<Self, TransportError> {
        let max_packet_size = transport.max_packet_size();
        if max_packet_size < 2 {
            return Err(TransportError::InvalidPacketSize(max_packet_size));
        }
        Ok(Self {
            transport,
            max_packet_size,
        })
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Write a frame as a sequence of SET_REPORT transfers.
    pub fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        debug!(pkt = %to_hex(frame), "Sending frame");
        for report in split_reports(frame, self.max_packet_size)? {
            trace!(report = %to_hex(&report), "->");
            let written = self.transport.control_out(SET_FEATURE_REPORT, &report)?;
            if written != report.len() {
                return Err(TransportError::ShortWrite {
                    written,
                    expected: report.len(),
                });
            }
        }
        Ok(())
    }

    /// Read one feature report, unmodified.
    pub fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let data = self
            .transport
            .control_in(GET_FEATURE_REPORT, self.max_packet_size as u16)?;
        trace!(report = %to_hex(&data), "<-");
        Ok(data)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_split_report_counts_and_reassembly() {
        for mps in 2..=70usize {
            for len in 1..=300usize {
                let frame: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let reports = split_reports(&frame, mps).unwrap();

                assert_eq!(reports.len(), len.div_ceil(mps - 1), "mps {} len {}", mps, len);

                let mut rebuilt = Vec::new();
                for report in &reports {
                    assert_eq!(report[0], REPORT_ID);
                    assert!(report.len() - 1 <= mps - 1);
                    rebuilt.extend_from_slice(&report[1..]);
                }
                assert_eq!(rebuilt, frame);
            }
        }
    }

    #[test]
    fn test_split_report_sizes() {
        // 12 byte frame over 8 byte reports: 7 + 5.
        let frame = [0xAAu8; 12];
        let reports = split_reports(&frame, 8).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].len(), 8);
        assert_eq!(reports[1].len(), 6);

        // Exact multiple: every report is full size.
        let frame = [0x55u8; 14];
        let reports = split_reports(&frame, 8).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.len() == 8));
    }

    #[test]
    fn test_split_rejects_tiny_packet_size() {
        assert!(matches!(
            split_reports(&[1, 2, 3], 1),
            Err(TransportError::InvalidPacketSize(1))
        ));
    }

    #[test]
    fn test_send_uses_set_report() {
        let mock = MockTransport::with_max_packet_size(8);
        let channel = ReportChannel::new(mock.clone()).unwrap();
        let frame: Vec<u8> = (0..10).collect();
        channel.send(&frame).unwrap();

        let transfers = mock.get_transfers();
        assert_eq!(transfers.len(), 2);
        for t in &transfers {
            assert_eq!(t.setup, SET_FEATURE_REPORT);
            assert_eq!(t.setup.request_type, 0x21);
            assert_eq!(t.setup.request, 0x09);
            assert_eq!(t.setup.value, 0x0301);
            assert_eq!(t.setup.index, 0);
        }
        assert_eq!(transfers[0].data, vec![0x01, 0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(transfers[1].data, vec![0x01, 7, 8, 9]);
    }

    #[test]
    fn test_receive_reads_full_report() {
        let mock = MockTransport::with_max_packet_size(32);
        mock.queue_response(&[0xED, 0x02, 0x01, 0xEE]);
        let channel = ReportChannel::new(mock.clone()).unwrap();

        let data = channel.receive().unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(&data[..4], &[0xED, 0x02, 0x01, 0xEE]);

        let reads = mock.get_reads();
        assert_eq!(reads, vec![(GET_FEATURE_REPORT, 32)]);
    }

    #[test]
    fn test_channel_rejects_tiny_packet_size() {
        let mock = MockTransport::with_max_packet_size(1);
        assert!(matches!(
            ReportChannel::new(mock),
            Err(TransportError::InvalidPacketSize(1))
        ));
    }
}
