//! Growable byte area with boundary-checked reads, writes and seeks.
//!
//! A [`Buffer`] has a current `position`, a `size` and a `reserved`
//! capacity, with `position <= size <= reserved`. Reads and writes start at
//! the current position and advance it; writes grow the reservation in
//! whole chunks to avoid frequent reallocation. Primitive values are
//! encoded fixed-width little-endian; strings are a `u32` length followed
//! by raw bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, WireError};

/// Default chunk size for new buffers.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// A memory area for reading and writing raw bytes, with boundary checking.
#[derive(Debug)]
pub struct Buffer {
    /// Backing storage; `data.len()` is the reserved capacity.
    data: Vec<u8>,
    position: usize,
    size: usize,
    chunk: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Creates an empty buffer with the default chunk size. Nothing is
    /// allocated until the first write or reservation.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Creates an empty buffer growing in multiples of `chunk_size` bytes.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Buffer {
            data: Vec::new(),
            position: 0,
            size: 0,
            chunk: chunk_size.max(1),
        }
    }

    /// Wraps an existing byte vector; position starts at 0 and both size
    /// and reserved equal the vector length.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let size = data.len();
        Buffer {
            data,
            position: 0,
            size,
            chunk: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Current read/write position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of valid bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Reserved capacity; always at least `size`.
    pub fn reserved(&self) -> usize {
        self.data.len()
    }

    /// The valid bytes, `0..size`.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Sets the current position. Fails when `pos` is past the size.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.size {
            return Err(WireError::SeekPastEnd {
                target: pos,
                size: self.size,
            });
        }
        self.position = pos;
        Ok(())
    }

    /// Sets both position and size, possibly past the current size but
    /// within the reserved capacity. Needed after writing directly into
    /// the backing storage.
    pub fn seek_resize(&mut self, new_size: usize) -> Result<()> {
        if new_size > self.data.len() {
            return Err(WireError::SeekPastReserved {
                target: new_size,
                reserved: self.data.len(),
            });
        }
        self.position = new_size;
        self.size = new_size;
        Ok(())
    }

    /// Ensures `write_size` bytes can be written at the current position
    /// without further reallocation. Position and size are unchanged;
    /// the reservation grows in whole chunks.
    pub fn reserve_for_write(&mut self, write_size: usize) {
        let needed = self.position + write_size;
        if needed > self.data.len() {
            let chunks = needed.div_ceil(self.chunk);
            self.data.resize(chunks * self.chunk, 0);
        }
    }

    /// Checks that `read_size` bytes are available at the current position.
    pub fn check_for_read(&self, read_size: usize) -> Result<()> {
        if self.position + read_size > self.size {
            return Err(WireError::ReadPastEnd {
                position: self.position,
                requested: read_size,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Writes raw bytes at the current position, growing the reservation if
    /// necessary. The size becomes the new position.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve_for_write(bytes.len());
        self.data[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        self.size = self.position;
    }

    /// Reads `out.len()` raw bytes from the current position.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        self.check_for_read(out.len())?;
        out.copy_from_slice(&self.data[self.position..self.position + out.len()]);
        self.position += out.len();
        Ok(())
    }

    /// Writes a string as a `u32` length followed by its bytes.
    pub fn write_str(&mut self, s: &str) {
        self.reserve_for_write(4 + s.len());
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    /// Reads a string written by [`Buffer::write_str`].
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        self.check_for_read(len)?;
        let bytes = self.data[self.position..self.position + len].to_vec();
        self.position += len;
        Ok(String::from_utf8(bytes)?)
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    /// Writes a single signed byte.
    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    /// Reads a single signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }
}

// Little-endian fixed-width accessors for the remaining primitives.
macro_rules! primitive_codec {
    ($write:ident, $read:ident, $ty:ty, $size:expr, $put:path, $get:path) => {
        impl Buffer {
            #[doc = concat!("Writes a `", stringify!($ty), "` little-endian.")]
            pub fn $write(&mut self, v: $ty) {
                let mut b = [0u8; $size];
                $put(&mut b, v);
                self.write_bytes(&b);
            }

            #[doc = concat!("Reads a `", stringify!($ty), "` little-endian.")]
            pub fn $read(&mut self) -> Result<$ty> {
                let mut b = [0u8; $size];
                self.read_bytes(&mut b)?;
                Ok($get(&b))
            }
        }
    };
}

primitive_codec!(write_u16, read_u16, u16, 2, LittleEndian::write_u16, LittleEndian::read_u16);
primitive_codec!(write_i16, read_i16, i16, 2, LittleEndian::write_i16, LittleEndian::read_i16);
primitive_codec!(write_u32, read_u32, u32, 4, LittleEndian::write_u32, LittleEndian::read_u32);
primitive_codec!(write_i32, read_i32, i32, 4, LittleEndian::write_i32, LittleEndian::read_i32);
primitive_codec!(write_u64, read_u64, u64, 8, LittleEndian::write_u64, LittleEndian::read_u64);
primitive_codec!(write_i64, read_i64, i64, 8, LittleEndian::write_i64, LittleEndian::read_i64);
primitive_codec!(write_f32, read_f32, f32, 4, LittleEndian::write_f32, LittleEndian::read_f32);
primitive_codec!(write_f64, read_f64, f64, 8, LittleEndian::write_f64, LittleEndian::read_f64);
