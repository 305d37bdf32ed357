use std::fmt::{self, Display};

/// How many bytes a single [`HexLine`] covers.
pub const HEX_LINE_WIDTH: usize = 16;

/// Wrapper type formatting one classic hex dump line: an 8-digit offset, up to
/// 16 hex byte columns, and an ASCII gutter with `.` standing in for anything
/// non-printable.
///
/// ## Example
/// ```
/// # use binscan_utils::HexLine;
/// let line = HexLine::new(0x10, b"hi\x00").to_string();
/// assert!(line.starts_with("00000010  68 69 00"));
/// assert!(line.ends_with("|hi.|"));
/// ```
pub struct HexLine<'a> {
    offset: u64,
    bytes: &'a [u8],
}

impl<'a> HexLine<'a> {
    /// ## Panics
    /// Panics if more than [`HEX_LINE_WIDTH`] bytes are given.
    pub fn new(offset: u64, bytes: &'a [u8]) -> Self {
        assert!(bytes.len() <= HEX_LINE_WIDTH, "too many bytes for one line");
        Self { offset, bytes }
    }
}

impl<'a> Display for HexLine<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x} ", self.offset)?;

        for column in 0..HEX_LINE_WIDTH {
            if column % 8 == 0 {
                write!(f, " ")?;
            }
            match self.bytes.get(column) {
                Some(byte) => write!(f, "{byte:02x} ")?,
                None => write!(f, "   ")?,
            }
        }

        write!(f, " |")?;
        for &byte in self.bytes {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, ".")?;
            }
        }
        write!(f, "|")
    }
}

#[cfg(test)]
mod tests {
    use super::{HexLine, HEX_LINE_WIDTH};

    #[test]
    fn full_line_layout() {
        let bytes: Vec<u8> = (0u8..16).collect();
        let line = HexLine::new(0, &bytes).to_string();
        assert!(line.starts_with("00000000  00 01 02 03 04 05 06 07  08 09 0a 0b"));
        assert!(line.ends_with("|................|"));
    }

    #[test]
    fn partial_line_pads_columns() {
        let a = HexLine::new(0, b"a").to_string();
        let b = HexLine::new(0, &[0u8; HEX_LINE_WIDTH]).to_string();
        // The ASCII gutter starts at the same column regardless of byte count
        assert_eq!(a.find('|'), b.find('|'));
    }
}
