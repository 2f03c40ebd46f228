use crate::{
    config::{ConfigError, LoaderConfig},
    decoder::VolumeDecoder,
    dictionary::TagDictionary,
    info::DcmInfo,
    progress::{CancellationToken, ProgressSink},
    scanner::{ScanError, scan_file},
    series::assemble_series,
    texture::{AllocationError, TextureAllocator},
    volume::Volume,
};

use log::{debug, error, info};
use std::path::{Path, PathBuf};
use thiserror::Error;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("{} is not a DICOM file", .0.display())]
    NotDicom(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed DICOM file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: ScanError,
    },

    #[error("unsupported transfer syntax `{0}`")]
    UnsupportedTransferSyntax(String),

    #[error("missing required attribute {0}")]
    MissingRequiredAttribute(&'static str),

    #[error("unsupported pixel format: {channels} channel(s), {bytes_per_voxel} byte(s) per voxel, signed: {signed}")]
    UnsupportedFormat {
        channels: u16,
        bytes_per_voxel: u32,
        signed: bool,
    },

    /// The host refused the texture for an otherwise supported format.
    #[error("unsupported format: {0}")]
    AllocationRejected(#[from] AllocationError),

    #[error("pixel data holds {length} bytes, less than one {slice_bytes} byte slice")]
    InsufficientPixelData { length: u64, slice_bytes: u64 },

    #[error("no sort key available to order the series")]
    MissingSortKey,

    #[error("load cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VolumeLoaderError {
    pub fn from_scan(path: &Path, error: ScanError) -> Self {
        let path = path.to_path_buf();
        match error {
            ScanError::NotFound => Self::NotFound(path),
            ScanError::NotDicom => Self::NotDicom(path),
            ScanError::Io(source) => Self::Io { path, source },
            source @ ScanError::Truncated { .. } => Self::Malformed { path, source },
        }
    }
}

/// A decoded volume together with the header it was decoded from.
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    pub volume: Volume,
    /// Header of the lead file, `nz` counting every decoded slice.
    pub info: DcmInfo,
    /// Source files in slice order.
    pub files: Vec<PathBuf>,
}

pub struct VolumeLoader {
    config: LoaderConfig,
    dictionary: Box<dyn TagDictionary>,
}

impl VolumeLoader {
    /// Loader using the dictionary described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if a configured dictionary entry is invalid
    pub fn new(config: LoaderConfig) -> Result<Self, VolumeLoaderError> {
        let dictionary = config.tag_dictionary()?;
        Ok(Self { config, dictionary })
    }

    pub fn with_dictionary(config: LoaderConfig, dictionary: impl TagDictionary + 'static) -> Self {
        Self {
            config,
            dictionary: Box::new(dictionary),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &dyn TagDictionary {
        self.dictionary.as_ref()
    }

    /// Read the header of `path`, gather its series when the file holds a
    /// single frame and reserve the texture.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or described, or if the
    /// allocator rejects the padded grid. No texture is requested for a
    /// file that fails before that point.
    pub fn prepare(
        &self,
        path: impl AsRef<Path>,
        allocator: &mut dyn TextureAllocator,
    ) -> Result<VolumeDecoder, VolumeLoaderError> {
        let path = path.as_ref();
        let attributes = scan_file(path, self.dictionary())
            .map_err(|e| VolumeLoaderError::from_scan(path, e))?;
        let info = DcmInfo::from_attributes(attributes)?;

        let series = if info.nz == 1 {
            Some(assemble_series(
                path,
                &info.attributes,
                self.dictionary(),
                &self.config,
            )?)
        } else {
            None
        };
        let nz = series.as_ref().map_or(info.nz, Vec::len);
        let dim = Volume::padded_dim([info.nx, info.ny, nz]);
        let texture_format = info.format.texture_format();
        allocator.allocate(dim, texture_format)?;
        info!(
            "decoding {}x{}x{} {} voxels into a {}x{}x{} {texture_format} texture ({} bytes)",
            info.nx,
            info.ny,
            nz,
            info.format,
            dim[0],
            dim[1],
            dim[2],
            dim.iter().product::<usize>() * texture_format.bytes_per_texel()
        );

        let decoder = match series {
            Some(entries) => VolumeDecoder::series(info, entries),
            None => VolumeDecoder::frames(path, info)?,
        };
        debug!(
            "{} slice(s) in {} pass(es), transfer syntax {}",
            nz,
            decoder.passes(),
            decoder.info().transfer_syntax.uid()
        );
        Ok(decoder)
    }

    /// Load a volume, blocking until every slice is decoded
    ///
    /// # Arguments
    ///
    /// * `path` - A multi-frame file, or any single-frame file of a series
    /// * `allocator` - Receives the padded grid size before decoding
    /// * `progress` - Receives the fraction completed after each slice
    /// * `cancel` - Polled before each slice
    ///
    /// # Errors
    ///
    /// Returns error if the file is not a supported DICOM image, or if the
    /// load was cancelled. No partial volume is returned.
    pub fn load_from_file(
        &self,
        path: impl AsRef<Path>,
        allocator: &mut dyn TextureAllocator,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let path = path.as_ref();
        let start = Instant::now();
        let result = self
            .prepare(path, allocator)
            .and_then(|decoder| decoder.run(progress, cancel));
        Self::report(path, start, result)
    }

    /// Load a volume, yielding to the runtime after each slice
    pub async fn load_from_file_async(
        &self,
        path: impl AsRef<Path>,
        allocator: &mut dyn TextureAllocator,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let path = path.as_ref();
        let start = Instant::now();
        let result = match self.prepare(path, allocator) {
            Ok(decoder) => decoder.run_async(progress, cancel).await,
            Err(e) => Err(e),
        };
        Self::report(path, start, result)
    }

    fn report(
        path: &Path,
        start: Instant,
        result: Result<LoadedVolume, VolumeLoaderError>,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        match &result {
            Ok(loaded) => info!(
                "loaded {} slices from {} in {:?}",
                loaded.info.nz,
                path.display(),
                start.elapsed()
            ),
            Err(e) => error!("failed to load {}: {e}", path.display()),
        }
        result
    }
}
