//! Square grids of fixed-size texel cells (height maps, blend maps)

use super::{TerrainError, TerrainResult};

#[derive(Debug)]
enum Storage<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a mut [u8]),
}

/// A `width × width` grid of cells, each `channels` bytes wide.
///
/// The buffer either owns its bytes or is a view into memory owned by someone
/// else; a view borrows that memory and therefore cannot outlive it. The byte
/// length is fixed at construction.
#[derive(Debug)]
pub struct TerrainBuffer<'a> {
    width: u32,
    channels: u32,
    data: Storage<'a>,
}

impl TerrainBuffer<'static> {
    /// Allocate a zero-filled buffer
    pub fn new(width: u32, channels: u32) -> Self {
        let size = Self::byte_len(width, channels);
        Self {
            width,
            channels,
            data: Storage::Owned(vec![0; size]),
        }
    }
}

impl<'a> TerrainBuffer<'a> {
    /// Wrap existing memory without copying it.
    ///
    /// `data` must be exactly `width² × channels` bytes long.
    pub fn from_slice(width: u32, channels: u32, data: &'a mut [u8]) -> TerrainResult<Self> {
        let expected = Self::byte_len(width, channels);
        if data.len() != expected {
            return Err(TerrainError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            channels,
            data: Storage::Borrowed(data),
        })
    }

    fn byte_len(width: u32, channels: u32) -> usize {
        width as usize * width as usize * channels as usize
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Size of the buffer in bytes
    pub fn size(&self) -> usize {
        Self::byte_len(self.width, self.channels)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.data, Storage::Owned(_))
    }

    pub fn data(&self) -> &[u8] {
        match &self.data {
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(bytes) => bytes,
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(bytes) => bytes,
        }
    }

    /// Zero every byte in place
    pub fn reset(&mut self) {
        self.data_mut().fill(0);
    }

    /// Bytes of the cell at (x, y), `None` when out of range
    pub fn texel(&self, x: u32, y: u32) -> Option<&[u8]> {
        let range = self.texel_range(x, y)?;
        Some(&self.data()[range])
    }

    pub fn texel_mut(&mut self, x: u32, y: u32) -> Option<&mut [u8]> {
        let range = self.texel_range(x, y)?;
        Some(&mut self.data_mut()[range])
    }

    fn texel_range(&self, x: u32, y: u32) -> Option<std::ops::Range<usize>> {
        if x >= self.width || y >= self.width {
            return None;
        }
        let channels = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * channels;
        Some(start..start + channels)
    }
}

impl PartialEq for TerrainBuffer<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.channels == other.channels && self.data() == other.data()
    }
}
