//! Low-level seekable byte cursor.
//!
//! The cursor works over either a borrowed buffer (a memory-mapped file, a
//! slice handed in by a format layer) or an owned one. Writing into a borrowed
//! cursor transparently copies it first. All values are little endian.
//!
//! Besides typed reads and writes, the cursor offers a deferred UTF-16 string
//! table: [`ByteCursor::write_string_offset`] reserves an 8-byte offset slot
//! immediately, and [`ByteCursor::flush_string_table`] later emits the strings
//! and patches every slot.

use std::borrow::Cow;

use crate::error::{RszError, Result};

#[derive(Debug, Clone)]
struct PendingString {
    slot: usize,
    text: String,
}

/// A seekable little-endian byte cursor.
#[derive(Debug, Clone, Default)]
pub struct ByteCursor<'a> {
    data: Cow<'a, [u8]>,
    pos: usize,
    pending_strings: Vec<PendingString>,
}

macro_rules! primitive_io {
    ($($read:ident, $write:ident, $ty:ty, $size:literal);* $(;)?) => {
        $(
            #[doc = concat!("Reads a little-endian `", stringify!($ty), "` and advances the cursor.")]
            pub fn $read(&mut self) -> Result<$ty> {
                let bytes = self.read_array::<$size>()?;
                Ok(<$ty>::from_le_bytes(bytes))
            }

            #[doc = concat!("Writes a little-endian `", stringify!($ty), "` and advances the cursor.")]
            pub fn $write(&mut self, value: $ty) {
                self.write_bytes(&value.to_le_bytes());
            }
        )*
    };
}

impl ByteCursor<'static> {
    /// Creates an empty, owned cursor for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an owned buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Cow::Owned(data),
            pos: 0,
            pending_strings: Vec::new(),
        }
    }
}

impl<'a> ByteCursor<'a> {
    /// Wraps a borrowed buffer. Nothing is copied until the first write.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(data),
            pos: 0,
            pending_strings: Vec::new(),
        }
    }

    /// Consumes the cursor and returns the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_owned()
    }

    /// Returns the whole underlying buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Total length of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current position.
    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    /// Moves to an absolute position. Seeking past the end is allowed; a later
    /// write zero-fills the gap and a later read fails.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = usize::try_from(pos)
            .map_err(|_| RszError::Format(format!("seek target {pos} does not fit in memory")))?;
        Ok(())
    }

    /// Moves the cursor by a relative amount.
    pub fn skip(&mut self, delta: i64) -> Result<()> {
        let target = i64::try_from(self.pos)
            .ok()
            .and_then(|p| p.checked_add(delta))
            .filter(|p| *p >= 0)
            .ok_or_else(|| RszError::Format(format!("skip of {delta} from {} underflows", self.pos)))?;
        self.seek(target as u64)
    }

    /// Advances the read position to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        if alignment > 1 {
            let rem = self.pos % alignment;
            if rem != 0 {
                self.pos += alignment - rem;
            }
        }
    }

    /// Pads with zero bytes up to the next multiple of `alignment`.
    pub fn align_write(&mut self, alignment: usize) {
        if alignment > 1 {
            let rem = self.pos % alignment;
            if rem != 0 {
                let padding = vec![0u8; alignment - rem];
                self.write_bytes(&padding);
            }
        }
    }

    /// Reads `len` bytes and advances the cursor.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                RszError::Format(format!(
                    "unexpected end of data: need {len} bytes at {}, buffer is {}",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let start = self.pos;
        self.pos = end;
        Ok(&self.data[start..end])
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Writes raw bytes at the current position, overwriting or extending the
    /// buffer as needed.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let buf = self.data.to_mut();
        let end = self.pos + bytes.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    primitive_io! {
        read_u8, write_u8, u8, 1;
        read_i8, write_i8, i8, 1;
        read_u16, write_u16, u16, 2;
        read_i16, write_i16, i16, 2;
        read_u32, write_u32, u32, 4;
        read_i32, write_i32, i32, 4;
        read_u64, write_u64, u64, 8;
        read_i64, write_i64, i64, 8;
        read_f32, write_f32, f32, 4;
        read_f64, write_f64, f64, 8;
    }

    /// Reads `count` consecutive `i32` values.
    pub fn read_i32_seq(&mut self, count: usize) -> Result<Vec<i32>> {
        (0..count).map(|_| self.read_i32()).collect()
    }

    /// Writes a sequence of `i32` values.
    pub fn write_i32_seq(&mut self, values: &[i32]) {
        for v in values {
            self.write_i32(*v);
        }
    }

    /// Runs `f` with the cursor at `pos`, then restores the previous position
    /// regardless of the outcome.
    pub fn read_at<T>(&mut self, pos: u64, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.pos;
        self.seek(pos)?;
        let result = f(self);
        self.pos = saved;
        result
    }

    /// Reads `units` UTF-16 code units. A trailing NUL is stripped.
    pub fn read_utf16(&mut self, units: usize) -> Result<String> {
        let bytes = self.read_bytes(units * 2)?;
        let mut chars: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if chars.last() == Some(&0) {
            chars.pop();
        }
        String::from_utf16(&chars).map_err(|e| RszError::Format(format!("invalid UTF-16: {e}")))
    }

    /// Writes `text` as UTF-16 followed by a NUL unit. Returns the number of
    /// code units written, terminator included.
    pub fn write_utf16(&mut self, text: &str) -> usize {
        let mut units = 0;
        for unit in text.encode_utf16().chain(std::iter::once(0)) {
            self.write_u16(unit);
            units += 1;
        }
        units
    }

    /// Reads a NUL-terminated UTF-16 string at an absolute position, leaving the
    /// cursor where it was.
    pub fn read_utf16z_at(&mut self, pos: u64) -> Result<String> {
        self.read_at(pos, |c| {
            let mut chars = Vec::new();
            loop {
                let unit = c.read_u16()?;
                if unit == 0 {
                    break;
                }
                chars.push(unit);
            }
            String::from_utf16(&chars).map_err(|e| RszError::Format(format!("invalid UTF-16: {e}")))
        })
    }

    /// Reads `len` bytes of ASCII. A trailing NUL is stripped.
    pub fn read_ascii(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        let bytes = bytes.strip_suffix(&[0u8]).unwrap_or(bytes);
        if !bytes.is_ascii() {
            return Err(RszError::Format("non-ASCII bytes in ASCII string".into()));
        }
        Ok(bytes.iter().map(|b| char::from(*b)).collect())
    }

    /// Writes `text` followed by a NUL byte. Returns the byte count written.
    pub fn write_ascii(&mut self, text: &str) -> Result<usize> {
        if !text.is_ascii() {
            return Err(RszError::Write(format!("string {text:?} is not ASCII")));
        }
        self.write_bytes(text.as_bytes());
        self.write_u8(0);
        Ok(text.len() + 1)
    }

    /// Reserves an 8-byte offset slot for `text` in the deferred string table.
    pub fn write_string_offset(&mut self, text: &str) {
        self.pending_strings.push(PendingString {
            slot: self.pos,
            text: text.to_owned(),
        });
        self.write_u64(0);
    }

    /// Emits every pending string at the current position and patches their
    /// slots with offsets relative to `base`. Identical strings share storage.
    pub fn flush_string_table(&mut self, base: u64) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_strings);
        let mut written: Vec<(String, u64)> = Vec::new();
        for entry in pending {
            let offset = match written.iter().find(|(text, _)| *text == entry.text) {
                Some((_, offset)) => *offset,
                None => {
                    let offset = self.tell().checked_sub(base).ok_or_else(|| {
                        RszError::Internal("string table written before its base".into())
                    })?;
                    self.write_utf16(&entry.text);
                    written.push((entry.text, offset));
                    offset
                }
            };
            let resume = self.tell();
            self.seek(entry.slot as u64)?;
            self.write_u64(offset);
            self.seek(resume)?;
        }
        Ok(())
    }

    /// Number of strings waiting for [`ByteCursor::flush_string_table`].
    pub fn pending_string_count(&self) -> usize {
        self.pending_strings.len()
    }
}
