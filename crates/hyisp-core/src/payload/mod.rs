//! Payload handling module.
//!
//! Provides the firmware image, its upload passes, and the profile header
//! scrambling transform.

pub mod firmware;
pub mod scramble;

pub use firmware::{Block, FirmwareError, FirmwareImage, UploadPass};
pub use scramble::{descramble, descramble_block, scramble, swap_nibbles};
