//! Protocol module - HyISP command set and frame codec.

pub mod command;
pub mod constants;
pub mod frame;

pub use command::{Command, Opcode, ResponseShape};
pub use constants::*;
pub use frame::{Frame, FrameError, decode, encode, encode_response, parse_command};
