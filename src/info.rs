use std::fmt;
use std::path::Path;

use crate::codec::HOST_NEEDS_SWAP;
use crate::dictionary::TagDictionary;
use crate::scanner::{AttributeMap, PixelDataKind, PixelDataLocator, scan_file};
use crate::texture::TextureFormat;
use crate::volume_loader::VolumeLoaderError;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
}

impl TransferSyntax {
    /// Only the two uncompressed little endian syntaxes are accepted.
    pub fn from_uid(uid: &str) -> Option<Self> {
        match uid.trim_end_matches(['\0', ' ']) {
            IMPLICIT_VR_LITTLE_ENDIAN => Some(Self::ImplicitVrLittleEndian),
            EXPLICIT_VR_LITTLE_ENDIAN => Some(Self::ExplicitVrLittleEndian),
            _ => None,
        }
    }

    pub fn uid(self) -> &'static str {
        match self {
            Self::ImplicitVrLittleEndian => IMPLICIT_VR_LITTLE_ENDIAN,
            Self::ExplicitVrLittleEndian => EXPLICIT_VR_LITTLE_ENDIAN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PhotometricInterpretation {
    Monochrome1,
    #[default]
    Monochrome2,
    Rgb,
    PaletteColor,
    YbrFull,
    YbrFull422,
    Other(String),
}

impl PhotometricInterpretation {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "MONOCHROME1" => Self::Monochrome1,
            "MONOCHROME2" => Self::Monochrome2,
            "RGB" => Self::Rgb,
            "PALETTE COLOR" => Self::PaletteColor,
            "YBR_FULL" => Self::YbrFull,
            "YBR_FULL_422" => Self::YbrFull422,
            other => Self::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanarConfiguration {
    /// `R1 G1 B1 R2 G2 B2 ...`
    #[default]
    Interleaved,
    /// `R1 R2 ... G1 G2 ... B1 B2 ...`, one plane per channel and slice.
    Separated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelRepresentation {
    #[default]
    Unsigned,
    Signed,
}

/// Encoding of the decoded voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    pub fn resolve(
        channels: u16,
        bytes_per_voxel: u32,
        representation: PixelRepresentation,
        kind: PixelDataKind,
    ) -> Option<Self> {
        let signed = representation == PixelRepresentation::Signed;
        match (kind, channels, bytes_per_voxel) {
            (PixelDataKind::FloatPixelData, 1, 4) => Some(Self::Float32),
            (PixelDataKind::PixelData, 1, 1) if signed => Some(Self::Int8),
            (PixelDataKind::PixelData, 1, 1) => Some(Self::UInt8),
            (PixelDataKind::PixelData, 1, 2) if signed => Some(Self::Int16),
            (PixelDataKind::PixelData, 1, 2) => Some(Self::UInt16),
            (PixelDataKind::PixelData, 1, 4) if signed => Some(Self::Int32),
            (PixelDataKind::PixelData, 1, 4) => Some(Self::UInt32),
            (PixelDataKind::PixelData, 3, 3) => Some(Self::Rgb24),
            (PixelDataKind::PixelData, 4, 4) => Some(Self::Rgba32),
            _ => None,
        }
    }

    /// Single channel numeric formats, normalized to `[0, 1]` after decoding.
    pub fn is_normalized(self) -> bool {
        matches!(
            self,
            Self::UInt16 | Self::Int16 | Self::UInt32 | Self::Int32 | Self::Float32
        )
    }

    pub fn channels(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
            _ => 1,
        }
    }

    pub fn texture_format(self) -> TextureFormat {
        match self {
            Self::UInt8 | Self::Int8 => TextureFormat::R8,
            Self::Rgb24 => TextureFormat::Rgb8,
            Self::Rgba32 => TextureFormat::Rgba8,
            _ => TextureFormat::Rg32Float,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt8 => "UINT8",
            Self::Int8 => "INT8",
            Self::UInt16 => "UINT16",
            Self::Int16 => "INT16",
            Self::UInt32 => "UINT32",
            Self::Int32 => "INT32",
            Self::Float32 => "FLOAT32",
            Self::Rgb24 => "RGB24",
            Self::Rgba32 => "RGBA32",
        };
        f.write_str(name)
    }
}

/// Header of the file a volume is loaded from.
#[derive(Debug, Clone)]
pub struct DcmInfo {
    pub nx: usize,
    pub ny: usize,
    /// Frames in this file; the series slice count once assembled.
    pub nz: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub num_channels: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub bytes_per_channel: u32,
    pub bytes_per_voxel: u32,
    pub pixel_representation: PixelRepresentation,
    pub pixel_data: PixelDataLocator,
    pub transfer_syntax: TransferSyntax,
    pub photometric_interpretation: PhotometricInterpretation,
    pub planar_configuration: PlanarConfiguration,
    pub format: PixelFormat,
    pub modality: Option<String>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    pub attributes: AttributeMap,
}

impl DcmInfo {
    pub fn from_file(
        path: impl AsRef<Path>,
        dict: &dyn TagDictionary,
    ) -> Result<Self, VolumeLoaderError> {
        let path = path.as_ref();
        let attributes =
            scan_file(path, dict).map_err(|e| VolumeLoaderError::from_scan(path, e))?;
        Self::from_attributes(attributes)
    }

    pub fn from_attributes(attributes: AttributeMap) -> Result<Self, VolumeLoaderError> {
        let uid = attributes.get("TransferSyntaxUID").unwrap_or_default();
        let transfer_syntax = TransferSyntax::from_uid(uid)
            .ok_or_else(|| VolumeLoaderError::UnsupportedTransferSyntax(uid.to_owned()))?;

        let bits_allocated = required_u16(&attributes, "BitsAllocated")?;
        let nx = required_u16(&attributes, "Columns")? as usize;
        let ny = required_u16(&attributes, "Rows")? as usize;

        let num_channels = optional_u16(&attributes, "SamplesPerPixel").unwrap_or(1);
        let bits_stored = optional_u16(&attributes, "BitsStored").unwrap_or(bits_allocated);
        let pixel_representation = match optional_u16(&attributes, "PixelRepresentation") {
            Some(1) => PixelRepresentation::Signed,
            _ => PixelRepresentation::Unsigned,
        };
        let photometric_interpretation = attributes
            .get("PhotometricInterpretation")
            .map(PhotometricInterpretation::parse)
            .unwrap_or_default();
        let planar_configuration = match optional_u16(&attributes, "PlanarConfiguration") {
            Some(1) => PlanarConfiguration::Separated,
            _ => PlanarConfiguration::Interleaved,
        };

        let (dy, dx) = match attributes.get_multi_f64("PixelSpacing").as_deref() {
            Some([row, column, ..]) => (*row, *column),
            Some([both]) => (*both, *both),
            _ => (1.0, 1.0),
        };
        let dz = attributes.get_f64("SliceThickness").unwrap_or(1.0);

        let bytes_per_channel = u32::from(bits_allocated).div_ceil(8);
        let bytes_per_voxel = bytes_per_channel * u32::from(num_channels);

        let pixel_data = attributes.pixel_data().ok_or(
            VolumeLoaderError::InsufficientPixelData {
                length: 0,
                slice_bytes: (nx * ny) as u64 * u64::from(bytes_per_voxel),
            },
        )?;

        let format = PixelFormat::resolve(
            num_channels,
            bytes_per_voxel,
            pixel_representation,
            pixel_data.kind,
        )
        .ok_or(VolumeLoaderError::UnsupportedFormat {
            channels: num_channels,
            bytes_per_voxel,
            signed: pixel_representation == PixelRepresentation::Signed,
        })?;

        let slice_bytes = (nx * ny) as u64 * u64::from(bytes_per_voxel);
        let nz = pixel_data.length.checked_div(slice_bytes).unwrap_or(0) as usize;
        if nz < 1 {
            return Err(VolumeLoaderError::InsufficientPixelData {
                length: pixel_data.length,
                slice_bytes,
            });
        }

        Ok(Self {
            nx,
            ny,
            nz,
            dx,
            dy,
            dz,
            num_channels,
            bits_allocated,
            bits_stored,
            bytes_per_channel,
            bytes_per_voxel,
            pixel_representation,
            pixel_data,
            transfer_syntax,
            photometric_interpretation,
            planar_configuration,
            format,
            modality: attributes.get("Modality").map(str::to_owned),
            rescale_slope: attributes.get_f64("RescaleSlope").unwrap_or(1.0),
            rescale_intercept: attributes.get_f64("RescaleIntercept").unwrap_or(0.0),
            window_center: attributes.get_f64("WindowCenter"),
            window_width: attributes.get_f64("WindowWidth"),
            attributes,
        })
    }

    pub fn voxels_per_slice(&self) -> usize {
        self.nx * self.ny
    }

    /// Raw bytes of one slice.
    pub fn slice_len(&self) -> usize {
        self.voxels_per_slice() * self.bytes_per_voxel as usize
    }

    pub fn needs_swap(&self) -> bool {
        HOST_NEEDS_SWAP && self.bytes_per_channel > 1
    }

    pub fn needs_masking(&self) -> bool {
        self.format != PixelFormat::Float32
            && u32::from(self.bits_stored) < self.bytes_per_channel * 8
    }

    pub fn dim(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn spacing(&self) -> [f64; 3] {
        [self.dx, self.dy, self.dz]
    }
}

fn optional_u16(attributes: &AttributeMap, key: &str) -> Option<u16> {
    attributes
        .get_u32(key)
        .and_then(|value| u16::try_from(value).ok())
}

fn required_u16(attributes: &AttributeMap, key: &'static str) -> Result<u16, VolumeLoaderError> {
    optional_u16(attributes, key).ok_or(VolumeLoaderError::MissingRequiredAttribute(key))
}
