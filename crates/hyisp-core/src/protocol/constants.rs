//! Protocol constants for the HyISP flashing protocol.
//!
//! Derived from USB captures of the vendor flasher.

// ============================================================================
// Device Identification
// ============================================================================

/// TG3 Electronics Vendor ID
pub const TG3_VENDOR_ID: u16 = 0x0F39;

/// HyISP in-system-programming Product ID
pub const HYISP_PRODUCT_ID: u16 = 0x0000;

/// The device exposes a single HID interface.
pub const HYISP_INTERFACE: u8 = 0;

// ============================================================================
// Frame Layout
// ============================================================================

/// Marker of a host -> device frame.
pub const HOST_FRAME_MARKER: u8 = 0xEA;

/// Marker of a device -> host frame.
pub const DEVICE_FRAME_MARKER: u8 = 0xED;

/// Largest payload a frame can carry (length byte is payload + 2).
pub const MAX_PAYLOAD_LEN: usize = 255 - 2;

/// Marker, length, opcode/status and checksum.
pub const FRAME_OVERHEAD: usize = 4;

/// Offset of the opcode (host frames) or status byte (device frames).
pub const FRAME_CODE_OFFSET: usize = 2;

/// Offset of the result byte in erase / block-write responses.
pub const FRAME_RESULT_OFFSET: usize = 3;

/// Offset of the version byte in version responses.
pub const FRAME_VERSION_OFFSET: usize = 4;

/// Status value the device uses to reject a command.
pub const STATUS_ERROR: u8 = 0x00;

// ============================================================================
// HID Feature Reports
// ============================================================================

/// Report ID prefixed to every outbound report.
pub const REPORT_ID: u8 = 0x01;

/// bmRequestType: host-to-device, class, interface.
pub const REQUEST_TYPE_CLASS_INTERFACE_OUT: u8 = 0x21;

/// bmRequestType: device-to-host, class, interface.
pub const REQUEST_TYPE_CLASS_INTERFACE_IN: u8 = 0xA1;

/// HID GET_REPORT request.
pub const HID_GET_REPORT: u8 = 0x01;

/// HID SET_REPORT request.
pub const HID_SET_REPORT: u8 = 0x09;

/// wValue: report type Feature (3) in the high byte, report ID 1 in the low byte.
pub const FEATURE_REPORT_VALUE: u16 = 0x0301;

/// Timeout applied to each control transfer.
pub const CONTROL_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Firmware Image Layout
// ============================================================================

/// Bytes reserved at the end of every firmware image.
pub const IMAGE_TAIL_LEN: usize = 14;

/// Size of the scrambled profile header inside the tail.
pub const PROFILE_HEADER_LEN: usize = 10;

/// Bytes written per block-write command.
pub const BLOCK_SIZE: usize = 8;

/// Start of the header region re-sent before the full image.
pub const HEADER_PASS_OFFSET: usize = 0x100;

/// Number of blocks in the header region pass.
pub const HEADER_PASS_BLOCKS: usize = 0x7F;

// ============================================================================
// Timing
// ============================================================================

/// Pause around chip reset and after erase.
pub const COMMAND_SETTLE_MS: u64 = 300;

/// Wait for the device to re-enumerate after a chip reset.
pub const REENUMERATE_MS: u64 = 2000;
