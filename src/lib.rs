//! # DICOM voxels library
//!
//! This crate reads uncompressed DICOM images into padded voxel grids
//! ready to be uploaded as 3D textures.
//!
//! Headers are read by a lightweight scanner which flattens the data set
//! into a map of attribute names to decoded strings and stops at the pixel
//! data. Only the location of the pixel data is recorded; the voxels are
//! decoded afterwards slice by slice, so hosts can report progress, cancel
//! between slices or interleave the load with other work.
//!
//! A multi-frame file is decoded on its own. A single-frame file is the
//! lead of a series: its directory is searched for the files of the same
//! series, which are ordered and decoded one slice per file. Supported
//! images are assumed to have the following attributes:
//!  - Implicit or explicit VR little endian transfer syntax
//!  - One 8, 16 or 32 bit integer or 32 bit float channel, or 8 bit RGB(A)
//!  - The same pixel data size in every file of a series
//!
//! Every edge of the decoded grid is rounded up to a power of two and the
//! data is centered in it. Single channel formats wider than 8 bits are
//! normalized to `[0, 1]` over the whole volume.
//!
//! # Examples
//!
//! ## Loading a series and saving its middle slice
//!
//! ```no_run
//! # use dicom_voxels::{CancellationToken, LoaderConfig, MemoryAllocator, NoProgress, Orientation, VolumeLoader};
//! let loader = VolumeLoader::new(LoaderConfig::default()).expect("should build the default dictionary");
//! let loaded = loader
//!     .load_from_file(
//!         "dicom/IM0001.dcm",
//!         &mut MemoryAllocator::default(),
//!         &mut NoProgress,
//!         &CancellationToken::new(),
//!     )
//!     .expect("should have loaded the series");
//! let volume = loaded.volume;
//! let image = volume
//!     .get_image_from_axis(volume.center_index(Orientation::Axial), Orientation::Axial)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png").expect("should have written the image");
//! ```

pub mod codec;
pub mod config;
pub mod decoder;
pub mod dictionary;
pub mod enums;
pub mod info;
pub mod progress;
pub mod scanner;
pub mod series;
pub mod texture;
pub mod volume;
pub mod volume_loader;

#[cfg(test)]
mod testing;

pub use config::LoaderConfig;
pub use dictionary::{StandardTagDictionary, TagDictionary};
pub use enums::Orientation;
pub use info::DcmInfo;
pub use progress::{CancellationToken, NoProgress, ProgressSink};
pub use scanner::{AttributeMap, scan_file};
pub use texture::{MemoryAllocator, TextureAllocator};
pub use volume::Volume;
pub use volume_loader::{LoadedVolume, VolumeLoader, VolumeLoaderError};
