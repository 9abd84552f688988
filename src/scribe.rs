use crate::error::LibResult;
use snafu::ResultExt;
use std::io::Write;

/// A wrapper for any `Write` that provides the little-endian primitives the IMF wire format is
/// made of.
pub(crate) struct Scribe<W: Write> {
    w: W,
}

impl<W: Write> Scribe<W> {
    pub(crate) fn new(w: W) -> Self {
        Self { w }
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> LibResult<()> {
        self.w.write_all(&[value]).context(wr!())
    }

    pub(crate) fn write_u16_le(&mut self, value: u16) -> LibResult<()> {
        self.w.write_all(&value.to_le_bytes()).context(wr!())
    }

    /// Write up to `limit` ASCII bytes of `text` followed by a NUL terminator. Non-ASCII
    /// characters are dropped.
    pub(crate) fn write_cstr(&mut self, text: &str, limit: usize) -> LibResult<()> {
        let bytes: Vec<u8> = text.bytes().filter(|b| b.is_ascii()).take(limit).collect();
        self.w.write_all(&bytes).context(wr!())?;
        self.write_u8(0)
    }

    /// Write `text` padded with NULs (or truncated) to exactly `width` bytes, then a NUL
    /// terminator.
    pub(crate) fn write_padded_str(&mut self, text: &str, width: usize) -> LibResult<()> {
        let mut bytes: Vec<u8> = text.bytes().filter(|b| b.is_ascii()).take(width).collect();
        bytes.resize(width, 0);
        self.w.write_all(&bytes).context(wr!())?;
        self.write_u8(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scribe_primitives() {
        let mut out = Vec::new();
        {
            let mut scribe = Scribe::new(&mut out);
            scribe.write_u8(0xab).unwrap();
            scribe.write_u16_le(0x1234).unwrap();
            scribe.write_cstr("hi", 255).unwrap();
            scribe.write_padded_str("abc", 8).unwrap();
        }
        assert_eq!(
            out,
            vec![
                0xab, 0x34, 0x12, b'h', b'i', 0, b'a', b'b', b'c', 0, 0, 0, 0, 0, 0
            ]
        );
    }

    #[test]
    fn padded_str_truncates() {
        let mut out = Vec::new();
        Scribe::new(&mut out)
            .write_padded_str("overlong-program", 8)
            .unwrap();
        assert_eq!(out, b"overlong\x00");
    }
}
