//! Read-only random access views over scanned bytes
//!
//! An [`Input`] is what the decode and render drivers read from. It is a cheap
//! clonable handle over shared backing storage, addressed by absolute byte
//! positions, and can be narrowed with [`Input::slice`] or replaced wholesale
//! by a decoded stream (see the codec bridge).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::{
    fmt,
    io::{self, Read},
    sync::Arc,
};

/// Byte order applied to multi-byte reads from an [`Input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(buf),
            Endian::Big => BigEndian::read_u64(buf),
        }
    }
}

/// Backing storage of an [`Input`].
///
/// The engine only ever reads; implementations must tolerate concurrent
/// readers. The provided in-memory store covers decoded streams and tests;
/// file-backed stores live outside this crate.
pub trait InputStore: Send + Sync {
    fn len(&self) -> u64;

    /// Reads into `buf` starting at `pos`, returning how many bytes were
    /// available. Positions past the end read as zero bytes.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize>;
}

impl InputStore for Vec<u8> {
    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = Vec::len(self) as u64;
        if pos >= len {
            return Ok(0);
        }
        let available = &self[pos as usize..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

struct InputInner {
    path: String,
    order: Endian,
    store: Arc<dyn InputStore>,
    /// Window into `store`; slices narrow it, everything else spans it whole.
    start: u64,
    end: u64,
}

/// A named, read-only window of bytes.
#[derive(Clone)]
pub struct Input(Arc<InputInner>);

impl Input {
    pub fn new(path: impl Into<String>, order: Endian, store: Arc<dyn InputStore>) -> Self {
        let end = store.len();
        Self(Arc::new(InputInner {
            path: path.into(),
            order,
            store,
            start: 0,
            end,
        }))
    }

    pub fn from_bytes(path: impl Into<String>, order: Endian, bytes: Vec<u8>) -> Self {
        Self::new(path, order, Arc::new(bytes))
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    pub fn order(&self) -> Endian {
        self.0.order
    }

    pub fn len(&self) -> u64 {
        self.0.end - self.0.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same underlying view.
    pub fn ptr_eq(a: &Input, b: &Input) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Reads into `buf` at `pos`, clamped to this input's window. Returns the
    /// byte count actually read; 0 past the end.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if pos >= self.len() {
            return Ok(0);
        }
        let available = (self.len() - pos).min(buf.len() as u64) as usize;
        self.0.store.read_at(self.0.start + pos, &mut buf[..available])
    }

    /// Reads exactly `len` bytes at `pos`. A short read surfaces as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn read_exact_at(&self, pos: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        let n = self.read_at(pos, &mut buf)?;
        if n < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {len} bytes at {pos} ran past the end of {}", self.path()),
            ));
        }
        Ok(buf)
    }

    /// Derived view over `[start, end)` of this input, sharing backing storage.
    ///
    /// ## Panics
    /// Panics on an inverted or out-of-bounds range; a spec producing one is
    /// broken, not unlucky.
    pub fn slice(&self, start: u64, end: u64, path: impl Into<String>) -> Input {
        assert!(start <= end, "inverted slice range");
        assert!(end <= self.len(), "slice range escapes the input");
        Self(Arc::new(InputInner {
            path: path.into(),
            order: self.0.order,
            store: self.0.store.clone(),
            start: self.0.start + start,
            end: self.0.start + end,
        }))
    }

    /// A reader over the whole window, mainly for feeding decoders.
    pub fn reader_at(&self, pos: u64) -> InputReader {
        InputReader {
            input: self.clone(),
            pos,
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("path", &self.0.path)
            .field("order", &self.0.order)
            .field("len", &self.len())
            .finish()
    }
}

/// Sequential [`Read`] adapter over an [`Input`].
pub struct InputReader {
    input: Input,
    pos: u64,
}

impl InputReader {
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for InputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.input.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::{Endian, Input};
    use std::io::Read;

    fn sample() -> Input {
        Input::from_bytes("sample.bin", Endian::Little, (0u8..32).collect())
    }

    #[test]
    fn exact_reads_and_eof() {
        let input = sample();
        assert_eq!(input.len(), 32);
        assert_eq!(input.read_exact_at(4, 4).unwrap(), vec![4, 5, 6, 7]);

        let err = input.read_exact_at(30, 4).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn slices_nest() {
        let input = sample();
        let outer = input.slice(8, 24, "outer");
        let inner = outer.slice(4, 8, "inner");
        assert_eq!(inner.len(), 4);
        assert_eq!(inner.read_exact_at(0, 4).unwrap(), vec![12, 13, 14, 15]);
        assert_eq!(inner.path(), "inner");
    }

    #[test]
    #[should_panic]
    fn slice_escape_panics() {
        sample().slice(0, 33, "bad");
    }

    #[test]
    fn reader_walks_forward() {
        let input = sample().slice(0, 4, "head");
        let mut reader = input.reader_at(0);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 1, 2, 3]);
    }

    #[test]
    fn endian_switch() {
        assert_eq!(Endian::Little.read_u16(&[0x34, 0x12]), 0x1234);
        assert_eq!(Endian::Big.read_u16(&[0x12, 0x34]), 0x1234);
    }
}
