//! Firmware image handling and block iteration.
//!
//! Handles HyISP application images including:
//! - profile header extraction from the 14-byte tail
//! - the two block-upload passes the bootloader expects

use std::fmt;
use std::path::Path;

use thiserror::Error;

use super::scramble::descramble_block;
use crate::protocol::constants::{
    BLOCK_SIZE, HEADER_PASS_BLOCKS, HEADER_PASS_OFFSET, IMAGE_TAIL_LEN, PROFILE_HEADER_LEN,
};

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("File too small: {actual} bytes, minimum {minimum}")]
    FileTooSmall { actual: usize, minimum: usize },
    #[error("Image too large: {actual} bytes, block offsets must fit in 16 bits")]
    TooLarge { actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The two upload passes, in the order the bootloader requires them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPass {
    /// Fixed region starting at 0x100, written first.
    Header,
    /// Whole image from offset 0, plus one trailing block.
    Image,
}

impl fmt::Display for UploadPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPass::Header => write!(f, "header"),
            UploadPass::Image => write!(f, "image"),
        }
    }
}

/// One block-write: absolute image offset and up to 8 data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    pub seq: u16,
    pub data: &'a [u8],
}

/// Raw application image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FirmwareError> {
        if data.len() < IMAGE_TAIL_LEN {
            return Err(FirmwareError::FileTooSmall {
                actual: data.len(),
                minimum: IMAGE_TAIL_LEN,
            });
        }
        let image = Self { data };
        let last = image.block_start(UploadPass::Image, image.block_count(UploadPass::Image) - 1);
        if last > u16::MAX as usize {
            return Err(FirmwareError::TooLarge {
                actual: image.data.len(),
            });
        }
        Ok(image)
    }

    /// Read an image file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// The scrambled profile header, bytes `[len-14, len-4)`.
    pub fn profile_header(&self) -> &[u8] {
        let start = self.data.len() - IMAGE_TAIL_LEN;
        &self.data[start..start + PROFILE_HEADER_LEN]
    }

    /// Human readable profile header. Never sent to the device.
    pub fn descrambled_profile_header(&self) -> Vec<u8> {
        descramble_block(self.profile_header())
    }

    /// Number of block writes in a pass.
    pub fn block_count(&self, pass: UploadPass) -> usize {
        match pass {
            UploadPass::Header => HEADER_PASS_BLOCKS,
            // The vendor flasher writes one block past the end of the image.
            UploadPass::Image => self.data.len().div_ceil(BLOCK_SIZE) + 1,
        }
    }

    fn block_start(&self, pass: UploadPass, index: usize) -> usize {
        let base = match pass {
            UploadPass::Header => HEADER_PASS_OFFSET,
            UploadPass::Image => 0,
        };
        base + index * BLOCK_SIZE
    }

    /// Iterate the blocks of one pass.
    ///
    /// Blocks past the end of the image carry fewer than 8 bytes, possibly
    /// none.
    pub fn blocks(&self, pass: UploadPass) -> impl Iterator<Item = Block<'_>> + '_ {
        (0..self.block_count(pass)).map(move |i| {
            let start = self.block_start(pass, i);
            let from = start.min(self.data.len());
            let to = (start + BLOCK_SIZE).min(self.data.len());
            Block {
                seq: start as u16,
                data: &self.data[from..to],
            }
        })
    }

    /// Get raw data.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Get total size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::scramble::scramble;

    fn image(len: usize) -> FirmwareImage {
        FirmwareImage::from_bytes((0..len).map(|i| i as u8).collect()).unwrap()
    }

    #[test]
    fn test_rejects_short_image() {
        let err = FirmwareImage::from_bytes(vec![0; 13]).unwrap_err();
        assert!(matches!(
            err,
            FirmwareError::FileTooSmall {
                actual: 13,
                minimum: 14
            }
        ));
        assert!(FirmwareImage::from_bytes(vec![0; 14]).is_ok());
    }

    #[test]
    fn test_rejects_image_beyond_16_bit_offsets() {
        // Last block start is ceil(len/8)*8, which must fit in a u16.
        assert!(FirmwareImage::from_bytes(vec![0; 0xFFF8 - 8]).is_ok());
        assert!(FirmwareImage::from_bytes(vec![0; 0xFFF8]).is_ok());
        assert!(matches!(
            FirmwareImage::from_bytes(vec![0; 0xFFF9]),
            Err(FirmwareError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_profile_header_location() {
        let mut data = vec![0u8; 100];
        let header: Vec<u8> = b"L1943V18\x01\x02".iter().map(|&b| scramble(b)).collect();
        data[86..96].copy_from_slice(&header);
        let fw = FirmwareImage::from_bytes(data).unwrap();

        assert_eq!(fw.profile_header(), header.as_slice());
        assert_eq!(fw.descrambled_profile_header(), b"L1943V18\x01\x02".to_vec());
    }

    #[test]
    fn test_header_pass_layout() {
        let fw = image(0x1000);
        let blocks: Vec<_> = fw.blocks(UploadPass::Header).collect();
        assert_eq!(blocks.len(), 127);
        assert_eq!(blocks[0].seq, 0x100);
        assert_eq!(blocks[1].seq, 0x108);
        assert_eq!(blocks[126].seq, 0x100 + 126 * 8);
        assert!(blocks.iter().all(|b| b.data.len() == 8));
        assert_eq!(blocks[0].data, &fw.raw_data()[0x100..0x108]);
    }

    #[test]
    fn test_image_pass_runs_one_block_past_the_end() {
        for len in [14usize, 15, 16, 17, 100, 1024, 1025] {
            let fw = image(len);
            let blocks: Vec<_> = fw.blocks(UploadPass::Image).collect();
            assert_eq!(blocks.len(), len.div_ceil(8) + 1, "len {}", len);

            let last = blocks[blocks.len() - 1];
            assert_eq!(last.seq as usize, len.div_ceil(8) * 8);
            assert!(last.data.is_empty());

            let rebuilt: Vec<u8> = blocks.iter().flat_map(|b| b.data.iter().copied()).collect();
            assert_eq!(rebuilt, fw.raw_data());
        }
    }

    #[test]
    fn test_header_pass_on_small_image_yields_empty_blocks() {
        let fw = image(0x104);
        let blocks: Vec<_> = fw.blocks(UploadPass::Header).collect();
        assert_eq!(blocks.len(), 127);
        assert_eq!(blocks[0].data.len(), 4);
        assert!(blocks[1..].iter().all(|b| b.data.is_empty()));
    }
}
