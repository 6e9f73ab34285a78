//! Device session - command/response exchange with one connected controller.
//!
//! A session owns one claimed interface. Every command is written as a
//! sequence of feature reports and followed by exactly one response read
//! before the method returns. Commands are checked against the
//! [`SessionState`] before anything is sent.

use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::protocol::constants::{BLOCK_SIZE, PROFILE_HEADER_LEN};
use crate::protocol::frame::{Frame, FrameError, decode, to_hex};
use crate::protocol::{Command, Opcode, ResponseShape};
use crate::state::SessionState;
use crate::transport::{ReportChannel, TransportError, UsbTransport};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chip erase failed (result 0x{result:02X})")]
    EraseFailed { result: u8 },

    #[error("Block write failed at 0x{seq:04X} (result 0x{result:02X})")]
    BlockWriteFailed { seq: u16, result: u8 },

    #[error("Profile header must be {} bytes, got {len}", PROFILE_HEADER_LEN)]
    ProfileLengthInvalid { len: usize },

    #[error("Block too long: {len} bytes, maximum {}", BLOCK_SIZE)]
    BlockTooLong { len: usize },

    #[error("{opcode} not allowed in state {state}")]
    OutOfOrder { opcode: Opcode, state: SessionState },

    #[error("Response to {opcode} too short: {}", to_hex(.frame))]
    ShortResponse { opcode: Opcode, frame: Vec<u8> },
}

/// An open connection to a HyISP controller.
pub struct DeviceSession<T: UsbTransport> {
    channel: ReportChannel<T>,
    state: SessionState,
    released: bool,
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Start a session on a transport whose interface is already claimed.
    pub fn open(transport: T) -> Result<Self, SessionError> {
        let channel = ReportChannel::new(transport)?;
        info!(
            vid = %format!("{:04X}", channel.transport().vendor_id()),
            pid = %format!("{:04X}", channel.transport().product_id()),
            max_packet_size = channel.max_packet_size(),
            "Session opened"
        );
        Ok(Self {
            channel,
            state: SessionState::Connected,
            released: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    fn goto_state(&mut self, new_state: SessionState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// USB port reset of the open handle. Not a protocol command.
    pub fn reset_port(&mut self) -> Result<(), SessionError> {
        info!("Resetting USB port");
        self.channel.transport().reset_device()?;
        Ok(())
    }

    /// Version of the ISP firmware.
    pub fn isp_version(&mut self) -> Result<u8, SessionError> {
        let frame = self.execute(Command::bare(Opcode::GetFwVersionIsp))?;
        Ok(version_byte(&frame))
    }

    /// Version of the keyboard firmware.
    pub fn kbd_version(&mut self) -> Result<u8, SessionError> {
        let frame = self.execute(Command::bare(Opcode::GetFwVersionKbd))?;
        Ok(version_byte(&frame))
    }

    pub fn enter_isp_mode(&mut self) -> Result<(), SessionError> {
        info!("Entering ISP mode");
        self.execute(Command::bare(Opcode::EnterIspMode))?;
        Ok(())
    }

    pub fn enter_bl_isp_mode(&mut self) -> Result<(), SessionError> {
        info!("Entering bootloader ISP mode");
        self.execute(Command::bare(Opcode::EnterBlIspMode))?;
        Ok(())
    }

    /// Reboot the controller.
    ///
    /// Unless the session is flashing, the device disconnects afterwards and
    /// the session has to be closed and a new one opened.
    pub fn reset_chip(&mut self) -> Result<(), SessionError> {
        info!("Resetting chip");
        self.execute(Command::bare(Opcode::ResetChip))?;
        Ok(())
    }

    /// Submit the scrambled profile header.
    pub fn check_profile(&mut self, profile: &[u8]) -> Result<(), SessionError> {
        if profile.len() != PROFILE_HEADER_LEN {
            return Err(SessionError::ProfileLengthInvalid { len: profile.len() });
        }
        info!(profile = %to_hex(profile), "Checking profile");
        self.execute(Command::new(Opcode::GetFwProfile, profile)?)?;
        Ok(())
    }

    pub fn erase_chip(&mut self) -> Result<(), SessionError> {
        info!("Erasing chip");
        self.execute(Command::bare(Opcode::EraseChip))?;
        Ok(())
    }

    /// Write one block at absolute image offset `seq`.
    pub fn upload_block(&mut self, seq: u16, block: &[u8]) -> Result<(), SessionError> {
        if block.len() > BLOCK_SIZE {
            return Err(SessionError::BlockTooLong { len: block.len() });
        }
        let mut payload = Vec::with_capacity(2 + block.len());
        payload.write_u16::<BigEndian>(seq)?;
        payload.extend_from_slice(block);
        self.execute(Command::new(Opcode::WriteBlock, payload)?)?;
        Ok(())
    }

    /// Release the interface.
    ///
    /// A device that already left the bus (after a chip reset) is not an
    /// error.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), SessionError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match self.channel.transport_mut().release_interface() {
            Ok(()) => {
                debug!("Interface released");
                Ok(())
            }
            Err(TransportError::Disconnected) => {
                debug!("Device already gone, nothing to release");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, command), fields(opcode = %command.opcode()))]
    fn execute(&mut self, command: Command) -> Result<Frame, SessionError> {
        let opcode = command.opcode();
        if !self.state.permits(opcode) {
            return Err(SessionError::OutOfOrder {
                opcode,
                state: self.state,
            });
        }

        match self.transact(&command) {
            Ok(frame) => {
                let next = self.state.after(opcode);
                if next != self.state {
                    self.goto_state(next);
                }
                Ok(frame)
            }
            Err(e) => {
                warn!(error = %e, "Command failed");
                self.goto_state(SessionState::Error);
                Err(e)
            }
        }
    }

    fn transact(&self, command: &Command) -> Result<Frame, SessionError> {
        self.channel.send(&command.to_frame())?;
        let raw = self.channel.receive()?;
        let frame = decode(&raw)?;
        debug!(frame = %to_hex(frame.as_bytes()), "Response");
        check_response(command, frame)
    }
}

impl<T: UsbTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release interface");
        }
    }
}

/// Version responses carry the version as the second payload byte.
fn version_byte(frame: &Frame) -> u8 {
    frame.payload()[1]
}

fn check_response(command: &Command, frame: Frame) -> Result<Frame, SessionError> {
    let opcode = command.opcode();
    let needed = match opcode.response_shape() {
        ResponseShape::Ack => 0,
        ResponseShape::Version => 2,
        ResponseShape::Checked => 1,
    };
    if frame.payload().len() < needed {
        return Err(SessionError::ShortResponse {
            opcode,
            frame: frame.as_bytes().to_vec(),
        });
    }

    if opcode.response_shape() == ResponseShape::Checked {
        let result = frame.payload()[0];
        if result != 0 {
            return Err(match opcode {
                Opcode::WriteBlock => SessionError::BlockWriteFailed {
                    seq: block_seq(command.payload()),
                    result,
                },
                _ => SessionError::EraseFailed { result },
            });
        }
    }
    Ok(frame)
}

fn block_seq(payload: &[u8]) -> u16 {
    match payload {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    }
}
