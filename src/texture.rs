use std::fmt;

use thiserror::Error;

/// Texel layout of the destination texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// One byte per voxel.
    R8,
    Rgb8,
    Rgba8,
    /// Normalized value and its alpha copy.
    Rg32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            Self::R8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
            Self::Rg32Float => 8,
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
#[error("cannot allocate a {}x{}x{} {format} texture: {reason}", .dim[0], .dim[1], .dim[2])]
pub struct AllocationError {
    pub dim: [usize; 3],
    pub format: TextureFormat,
    pub reason: String,
}

/// Host side of the 3D texture a volume is uploaded to.
///
/// Asked once for the padded grid before any voxel is decoded. A rejected
/// request ends the load, no other format is tried.
pub trait TextureAllocator {
    fn allocate(&mut self, dim: [usize; 3], format: TextureFormat) -> Result<(), AllocationError>;
}

impl<A: TextureAllocator + ?Sized> TextureAllocator for &mut A {
    fn allocate(&mut self, dim: [usize; 3], format: TextureFormat) -> Result<(), AllocationError> {
        (**self).allocate(dim, format)
    }
}

/// Host memory allocator with an upper bound on every texture edge,
/// in the manner of GPU 3D texture limits.
#[derive(Debug, Clone)]
pub struct MemoryAllocator {
    pub max_edge: usize,
    allocated: Vec<([usize; 3], TextureFormat)>,
}

impl MemoryAllocator {
    pub const DEFAULT_MAX_EDGE: usize = 2048;

    pub fn new(max_edge: usize) -> Self {
        Self {
            max_edge,
            allocated: Vec::new(),
        }
    }

    /// Requests granted so far.
    pub fn allocations(&self) -> &[([usize; 3], TextureFormat)] {
        &self.allocated
    }
}

impl Default for MemoryAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_EDGE)
    }
}

impl TextureAllocator for MemoryAllocator {
    fn allocate(&mut self, dim: [usize; 3], format: TextureFormat) -> Result<(), AllocationError> {
        if dim.iter().any(|&edge| edge == 0 || edge > self.max_edge) {
            return Err(AllocationError {
                dim,
                format,
                reason: format!("every edge must lie within 1..={}", self.max_edge),
            });
        }
        self.allocated.push((dim, format));
        Ok(())
    }
}
