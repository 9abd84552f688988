use log::trace;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::fs::File;
use std::io::{BufReader, Bytes, ErrorKind, Read};
use std::path::{Path, PathBuf};

/// A forward-only byte reader with one byte of lookahead. Tracks the number of bytes consumed and
/// supports a soft end-of-data limit so that chunked formats can be parsed without over-reading.
pub(crate) struct ByteIter<R: Read> {
    iter: Bytes<R>,
    /// The number of bytes consumed so far.
    position: u64,
    peeked: Option<u8>,
    position_limit: Option<u64>,
}

#[derive(Debug, Snafu)]
pub(crate) enum ByteError {
    #[snafu(display("io error around byte {}: {}", position, source))]
    Io {
        position: u64,
        source: std::io::Error,
    },

    #[snafu(display("unexpected end reached around byte {}", position))]
    End { position: u64 },

    #[snafu(display(
        "expected tag '{}' but found '{}' near position {}",
        expected,
        found,
        position
    ))]
    Tag {
        expected: String,
        found: String,
        position: u64,
    },

    #[snafu(display("too many bytes while reading vlq around {}", position))]
    VlqTooBig { position: u64 },

    #[snafu(display("unable to open '{}': {}", path.display(), source,))]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub(crate) type ByteResult<T> = std::result::Result<T, ByteError>;

const BUF_CAPACITY: usize = 1024 * 1024;

/// The high bit of a vlq byte signals that more bytes follow.
const VLQ_CONTINUE: u8 = 0b1000_0000;

impl ByteIter<BufReader<File>> {
    pub(crate) fn new_file<P: AsRef<Path>>(path: P) -> ByteResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).context(FileOpenSnafu { path })?;
        let buf = BufReader::with_capacity(BUF_CAPACITY, f);
        Self::new(buf.bytes())
    }
}

impl<R: Read> ByteIter<R> {
    pub(crate) fn new(mut iter: Bytes<R>) -> ByteResult<Self> {
        let peeked = Self::next_impl(&mut iter, 0)?;
        Ok(Self {
            iter,
            position: 0,
            peeked,
            position_limit: None,
        })
    }

    fn next_impl(iter: &mut Bytes<R>, position: u64) -> ByteResult<Option<u8>> {
        match iter.next() {
            None => Ok(None),
            Some(result) => match result {
                Ok(val) => Ok(Some(val)),
                Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
                Err(e) => Err(e).context(IoSnafu { position }),
            },
        }
    }

    /// Read a single byte and advance the iter. Returns `None` at the end of the data or when the
    /// size limit has been reached.
    pub(crate) fn read(&mut self) -> ByteResult<Option<u8>> {
        if let Some(limit) = self.position_limit {
            if self.position >= limit {
                return Ok(None);
            }
        }
        let value = match self.peeked {
            None => return Ok(None),
            Some(value) => value,
        };
        self.position += 1;
        self.peeked = Self::next_impl(&mut self.iter, self.position)?;
        trace!("read {:#x} at position {}", value, self.position - 1);
        Ok(Some(value))
    }

    pub(crate) fn read_or_die(&mut self) -> ByteResult<u8> {
        self.read()?.context(EndSnafu {
            position: self.position,
        })
    }

    pub(crate) fn read2(&mut self) -> ByteResult<[u8; 2]> {
        Ok([self.read_or_die()?, self.read_or_die()?])
    }

    pub(crate) fn read4(&mut self) -> ByteResult<[u8; 4]> {
        Ok([
            self.read_or_die()?,
            self.read_or_die()?,
            self.read_or_die()?,
            self.read_or_die()?,
        ])
    }

    pub(crate) fn read_u16_be(&mut self) -> ByteResult<u16> {
        Ok(u16::from_be_bytes(self.read2()?))
    }

    pub(crate) fn read_u32_be(&mut self) -> ByteResult<u32> {
        Ok(u32::from_be_bytes(self.read4()?))
    }

    pub(crate) fn read_u16_le(&mut self) -> ByteResult<u16> {
        Ok(u16::from_le_bytes(self.read2()?))
    }

    pub(crate) fn read_i16_le(&mut self) -> ByteResult<i16> {
        Ok(i16::from_le_bytes(self.read2()?))
    }

    pub(crate) fn read_i16_be(&mut self) -> ByteResult<i16> {
        Ok(i16::from_be_bytes(self.read2()?))
    }

    /// Decode a MIDI variable-length quantity. At most four bytes are consumed.
    pub(crate) fn read_vlq_u32(&mut self) -> ByteResult<u32> {
        let mut value: u32 = 0;
        let mut byte_count = 0u8;
        loop {
            ensure!(
                byte_count < 4,
                VlqTooBigSnafu {
                    position: self.position
                }
            );
            let byte = self.read_or_die()?;
            byte_count += 1;
            value = (value << 7) | u32::from(byte & 0x7f);
            if byte & VLQ_CONTINUE == 0 {
                break;
            }
        }
        trace!("decoded vlq value {} from {} bytes", value, byte_count);
        Ok(value)
    }

    /// Get the next value without advancing the iterator.
    pub(crate) fn peek(&self) -> Option<u8> {
        self.peeked
    }

    /// The number of bytes consumed so far.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn is_end(&self) -> bool {
        if let Some(limit) = self.position_limit {
            if self.position >= limit {
                return true;
            }
        }
        self.peeked.is_none()
    }

    /// Read and match an arbitrary-length signature, e.g. `WOPL3-BANK\0`.
    pub(crate) fn expect_bytes(&mut self, expected: &[u8], name: &str) -> ByteResult<()> {
        let found = self.read_n(expected.len())?;
        ensure!(
            expected == found.as_slice(),
            TagSnafu {
                expected: name,
                found: String::from_utf8_lossy(&found),
                position: self.position
            }
        );
        Ok(())
    }

    /// When this is set, the iter reports that it is at the end once `size` more bytes have been
    /// read.
    pub(crate) fn set_size_limit(&mut self, size: u64) {
        self.position_limit = Some(self.position + size)
    }

    pub(crate) fn clear_size_limit(&mut self) {
        self.position_limit = None
    }

    pub(crate) fn read_n(&mut self, num_bytes: usize) -> ByteResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(num_bytes);
        for _ in 0..num_bytes {
            bytes.push(self.read_or_die()?)
        }
        Ok(bytes)
    }

    /// Discard `num_bytes` bytes.
    pub(crate) fn skip(&mut self, num_bytes: u64) -> ByteResult<()> {
        for _ in 0..num_bytes {
            self.read_or_die()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn byte_iter_test() {
        let bytes = [0x00u8, 0x01, 0x02, 0x03, 0x04, 0x10, 0x20, 0x30, 0x40];
        let cursor = Cursor::new(bytes);
        let mut iter = ByteIter::new(cursor.bytes()).unwrap();
        assert_eq!(Some(0x00), iter.peek());
        assert_eq!(0x00, iter.read().unwrap().unwrap());
        assert_eq!(Some(0x01), iter.peek());
        assert_eq!([0x01, 0x02], iter.read2().unwrap());
        assert_eq!(3, iter.position());
        iter.set_size_limit(2);
        assert!(!iter.is_end());
        assert_eq!(0x03, iter.read().unwrap().unwrap());
        assert_eq!(0x04, iter.read().unwrap().unwrap());
        assert!(iter.read().unwrap().is_none());
        assert!(iter.is_end());
        iter.clear_size_limit();
        assert_eq!(0x10, iter.read().unwrap().unwrap());
    }

    #[test]
    fn endian_reads() {
        let bytes = [0x01u8, 0x02, 0x01, 0x02, 0xff, 0xfe, 0xfe, 0xff];
        let mut iter = ByteIter::new(Cursor::new(bytes).bytes()).unwrap();
        assert_eq!(0x0102, iter.read_u16_be().unwrap());
        assert_eq!(0x0201, iter.read_u16_le().unwrap());
        assert_eq!(-2, iter.read_i16_be().unwrap());
        assert_eq!(-2, iter.read_i16_le().unwrap());
    }

    #[test]
    fn vlq_single_byte() {
        let mut iter = ByteIter::new(Cursor::new([0x00u8, 0x40, 0x7f]).bytes()).unwrap();
        assert_eq!(0x00, iter.read_vlq_u32().unwrap());
        assert_eq!(0x40, iter.read_vlq_u32().unwrap());
        assert_eq!(0x7f, iter.read_vlq_u32().unwrap());
    }

    #[test]
    fn vlq_multi_byte() {
        let bytes = [0x81u8, 0x00, 0xc0, 0x00, 0xff, 0x7f, 0x81, 0x80, 0x00, 0xff, 0xff, 0xff, 0x7f];
        let mut iter = ByteIter::new(Cursor::new(bytes).bytes()).unwrap();
        assert_eq!(0x80, iter.read_vlq_u32().unwrap());
        assert_eq!(0x2000, iter.read_vlq_u32().unwrap());
        assert_eq!(0x3fff, iter.read_vlq_u32().unwrap());
        assert_eq!(0x4000, iter.read_vlq_u32().unwrap());
        assert_eq!(0x0fff_ffff, iter.read_vlq_u32().unwrap());
    }

    #[test]
    fn vlq_too_long() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0x7f];
        let mut iter = ByteIter::new(Cursor::new(bytes).bytes()).unwrap();
        assert!(iter.read_vlq_u32().is_err());
    }

    #[test]
    fn signature_test() {
        let mut iter = ByteIter::new(Cursor::new(*b"#OPL_II#XY").bytes()).unwrap();
        iter.expect_bytes(b"#OPL_II#", "#OPL_II#").unwrap();
        assert!(iter.expect_bytes(b"MTrk", "MTrk").is_err());
    }
}
