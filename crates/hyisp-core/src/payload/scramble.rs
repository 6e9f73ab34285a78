//! Profile header scrambling.
//!
//! The vendor stores the profile header nibble-swapped and inverted.
//! `swap_nibbles` is linear over XOR and leaves `0xFF` unchanged, so
//! `swap(0xFF ^ x) == 0xFF ^ swap(x)` and applying [`descramble`] twice gives
//! back the input. The same function therefore scrambles and descrambles.

/// Exchange the high and low 4-bit halves.
pub const fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}

/// `0xFF ^ swap_nibbles(b)`.
pub const fn descramble(b: u8) -> u8 {
    0xFF ^ swap_nibbles(b)
}

/// Inverse of [`descramble`], which is the same transform.
pub const fn scramble(b: u8) -> u8 {
    descramble(b)
}

/// Descramble a whole header for display.
pub fn descramble_block(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|&b| descramble(b)).collect()
}

/// Printable rendering of a descrambled header, `.` for anything else.
pub fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
