use crate::enums::Orientation;
use crate::info::PixelFormat;
use crate::texture::TextureFormat;

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use ndarray::{Array4, ArrayView3, Axis, s};
use rayon::prelude::*;

/// Voxel storage, indexed `[z, y, x, channel]`.
#[derive(Debug, Clone, PartialEq)]
pub enum VoxelData {
    /// One, three or four bytes per voxel.
    Bytes(Array4<u8>),
    /// Normalized value followed by its alpha copy.
    Float(Array4<f32>),
}

/// A view of one plane of the grid, indexed `[row, column, channel]`.
#[derive(Debug, Clone)]
pub enum VoxelSlice<'a> {
    Bytes(ArrayView3<'a, u8>),
    Float(ArrayView3<'a, f32>),
}

/// Padded voxel grid.
///
/// Every edge is rounded up to a power of two. The decoded data occupies
/// the centered box starting at [`Volume::start`]; voxels outside of it
/// keep their zero initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: VoxelData,
    /// Decoded extent `[nx, ny, nz]`.
    pub true_dim: [usize; 3],
    /// Physical spacing `[dx, dy, dz]`.
    pub spacing: [f64; 3],
    pub format: PixelFormat,
    /// Extremes of the raw samples, for normalized formats.
    pub value_range: Option<(f64, f64)>,
}

impl Volume {
    pub fn new(true_dim: [usize; 3], spacing: [f64; 3], format: PixelFormat) -> Self {
        let [px, py, pz] = Self::padded_dim(true_dim);
        let data = if format.is_normalized() {
            VoxelData::Float(Array4::zeros((pz, py, px, 2)))
        } else {
            VoxelData::Bytes(Array4::zeros((pz, py, px, format.channels())))
        };
        Self {
            data,
            true_dim,
            spacing,
            format,
            value_range: None,
        }
    }

    pub fn padded_dim(true_dim: [usize; 3]) -> [usize; 3] {
        true_dim.map(usize::next_power_of_two)
    }

    /// Get the padded dimensions of the grid `[nx, ny, nz]`
    pub fn dim(&self) -> [usize; 3] {
        Self::padded_dim(self.true_dim)
    }

    /// First voxel of the decoded box along each axis
    pub fn start(&self) -> [usize; 3] {
        let padded = self.dim();
        [0, 1, 2].map(|axis| (padded[axis] - self.true_dim[axis]) / 2)
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.format.texture_format()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut VoxelData {
        &mut self.data
    }

    /// Byte channel of a voxel, for byte formats.
    pub fn byte(&self, x: usize, y: usize, z: usize, channel: usize) -> Option<u8> {
        match &self.data {
            VoxelData::Bytes(data) => data.get([z, y, x, channel]).copied(),
            VoxelData::Float(_) => None,
        }
    }

    /// Float channel of a voxel, for normalized formats.
    pub fn value(&self, x: usize, y: usize, z: usize, channel: usize) -> Option<f32> {
        match &self.data {
            VoxelData::Float(data) => data.get([z, y, x, channel]).copied(),
            VoxelData::Bytes(_) => None,
        }
    }

    #[inline]
    fn normalize_to_u8(value: f32) -> u8 {
        (value * 255.0).clamp(0.0, 255.0) as u8
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<VoxelSlice<'_>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match &self.data {
            VoxelData::Bytes(data) => VoxelSlice::Bytes(match orientation {
                Orientation::Axial => data.slice(s![index, .., .., ..]),
                Orientation::Coronal => data.slice(s![.., index, .., ..]),
                Orientation::Sagittal => data.slice(s![.., .., index, ..]),
            }),
            VoxelData::Float(data) => VoxelSlice::Float(match orientation {
                Orientation::Axial => data.slice(s![index, .., .., ..]),
                Orientation::Coronal => data.slice(s![.., index, .., ..]),
                Orientation::Sagittal => data.slice(s![.., .., index, ..]),
            }),
        };
        Some(slice)
    }

    // Rows of the image follow the first axis of the slice
    pub fn slice_to_image(slice: &VoxelSlice<'_>) -> Option<DynamicImage> {
        match slice {
            VoxelSlice::Bytes(view) => {
                let (height, width, channels) = view.dim();
                let pixels: Vec<u8> = view.iter().copied().collect();
                let (width, height) = (width as u32, height as u32);
                match channels {
                    1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
                    3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
                    4 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
                    _ => None,
                }
            }
            VoxelSlice::Float(view) => {
                let (height, width, _) = view.dim();
                let pixels: Vec<u8> = view
                    .index_axis(Axis(2), 0)
                    .into_par_iter()
                    .map(|&v| Self::normalize_to_u8(v))
                    .collect();
                GrayImage::from_raw(width as u32, height as u32, pixels)
                    .map(DynamicImage::ImageLuma8)
            }
        }
    }

    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<DynamicImage> {
        let slice = self.get_slice_from_axis(index, orientation)?;
        Self::slice_to_image(&slice)
    }

    /// Index of the middle of the decoded box along the axis normal to `orientation`
    pub fn center_index(&self, orientation: Orientation) -> usize {
        let axis = Self::normal_axis(orientation);
        self.start()[axis] + self.true_dim[axis] / 2
    }

    fn normal_axis(orientation: Orientation) -> usize {
        match orientation {
            Orientation::Axial => 2,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 0,
        }
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        index < self.dim()[Self::normal_axis(orientation)]
    }
}
