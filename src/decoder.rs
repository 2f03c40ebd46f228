//! Slice by slice decoding of pixel data into a padded [`Volume`].
//!
//! Decoding is driven one slice per [`VolumeDecoder::step`], so a host can
//! interleave it with other work, report progress and cancel between
//! slices. Normalized formats take a second pass over every slice once
//! the value range of the whole volume is known.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use log::{debug, trace};
use ndarray::{Array4, Axis, s};

use crate::codec::{invert_bytes, mask_bits8, mask_bits16, mask_bits32, swap_bytes};
use crate::info::{DcmInfo, PhotometricInterpretation, PixelFormat, PlanarConfiguration};
use crate::progress::{CancellationToken, ProgressSink};
use crate::series::SeriesEntry;
use crate::volume::{Volume, VoxelData};
use crate::volume_loader::{LoadedVolume, VolumeLoaderError};

/// Outcome of one decoding step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// A slice was processed, the value is the fraction of the load completed.
    Progress(f32),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Decode,
    Normalize,
    Done,
}

enum SliceSource {
    /// Consecutive frames of one file, read through a single handle.
    Frames {
        path: PathBuf,
        reader: BufReader<File>,
    },
    /// One file per slice, in series order.
    Series(Vec<SeriesEntry>),
}

pub struct VolumeDecoder {
    info: DcmInfo,
    files: Vec<PathBuf>,
    source: Option<SliceSource>,
    volume: Volume,
    phase: Phase,
    z: usize,
    min: f64,
    max: f64,
    raw: Vec<u8>,
}

impl VolumeDecoder {
    /// Decode the `info.nz` frames stored in the pixel data of `path`.
    pub fn frames(path: impl AsRef<Path>, info: DcmInfo) -> Result<Self, VolumeLoaderError> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| VolumeLoaderError::Io {
            path: path.clone(),
            source,
        };
        let mut reader = BufReader::new(File::open(&path).map_err(io_error)?);
        reader
            .seek(SeekFrom::Start(info.pixel_data.offset))
            .map_err(io_error)?;
        let files = vec![path.clone()];
        Ok(Self::new(info, files, SliceSource::Frames { path, reader }))
    }

    /// Decode one slice from each entry; `info` describes the lead file.
    pub fn series(mut info: DcmInfo, entries: Vec<SeriesEntry>) -> Self {
        info.nz = entries.len();
        let files = entries.iter().map(|entry| entry.path.clone()).collect();
        Self::new(info, files, SliceSource::Series(entries))
    }

    fn new(info: DcmInfo, files: Vec<PathBuf>, source: SliceSource) -> Self {
        let volume = Volume::new(info.dim(), info.spacing(), info.format);
        Self {
            raw: vec![0; info.slice_len()],
            info,
            files,
            source: Some(source),
            volume,
            phase: Phase::Decode,
            z: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn info(&self) -> &DcmInfo {
        &self.info
    }

    /// Passes over the slices: two when the format is normalized.
    pub fn passes(&self) -> usize {
        if self.info.format.is_normalized() { 2 } else { 1 }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Process the next slice.
    pub fn step(&mut self) -> Result<Step, VolumeLoaderError> {
        let nz = self.info.nz;
        let passes = self.passes() as f32;
        match self.phase {
            Phase::Decode => {
                self.read_slice()?;
                preprocess_slice(&mut self.raw, &self.info);
                self.decode_slice();
                self.z += 1;
                let fraction = self.z as f32 / nz as f32 / passes;
                if self.z == nz {
                    // all reads are done, release the file handle
                    self.source = None;
                    self.z = 0;
                    if self.info.format.is_normalized() {
                        debug!("value range [{}, {}]", self.min, self.max);
                        self.volume.value_range = Some((self.min, self.max));
                        self.phase = Phase::Normalize;
                    } else {
                        self.phase = Phase::Done;
                    }
                }
                Ok(Step::Progress(fraction))
            }
            Phase::Normalize => {
                self.normalize_slice();
                self.z += 1;
                if self.z == nz {
                    self.phase = Phase::Done;
                }
                Ok(Step::Progress((1.0 + self.z as f32 / nz as f32) / passes))
            }
            Phase::Done => Ok(Step::Done),
        }
    }

    /// The decoded volume, once every step has run.
    pub fn finish(self) -> Option<LoadedVolume> {
        self.is_done().then(|| LoadedVolume {
            volume: self.volume,
            info: self.info,
            files: self.files,
        })
    }

    /// Step until done, checking `cancel` before each slice.
    pub fn run(
        mut self,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        while !self.is_done() {
            if cancel.is_cancelled() {
                return Err(VolumeLoaderError::Cancelled);
            }
            if let Step::Progress(fraction) = self.step()? {
                progress.on_progress(fraction);
            }
        }
        self.finish().ok_or(VolumeLoaderError::Cancelled)
    }

    /// Like [`VolumeDecoder::run`], yielding to the runtime after each slice.
    pub async fn run_async(
        mut self,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        while !self.is_done() {
            if cancel.is_cancelled() {
                return Err(VolumeLoaderError::Cancelled);
            }
            if let Step::Progress(fraction) = self.step()? {
                progress.on_progress(fraction);
            }
            tokio::task::yield_now().await;
        }
        self.finish().ok_or(VolumeLoaderError::Cancelled)
    }

    fn read_slice(&mut self) -> Result<(), VolumeLoaderError> {
        let (path, result) = match &mut self.source {
            Some(SliceSource::Frames { path, reader }) => {
                (path.as_path(), reader.read_exact(&mut self.raw))
            }
            Some(SliceSource::Series(entries)) => {
                let entry = &entries[self.z];
                (
                    entry.path.as_path(),
                    read_at(&entry.path, entry.locator.offset, &mut self.raw),
                )
            }
            None => return Ok(()),
        };
        trace!("read slice {} from {}", self.z, path.display());
        result.map_err(|source| VolumeLoaderError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn decode_slice(&mut self) {
        let [sx, sy, sz] = self.volume.start();
        let (nx, ny) = (self.info.nx, self.info.ny);
        let z = sz + self.z;
        let raw = &self.raw;
        match (&mut self.volume.data, self.info.format) {
            (VoxelData::Bytes(grid), PixelFormat::UInt8 | PixelFormat::Int8) => {
                let signed = self.info.format == PixelFormat::Int8;
                let mut dest = grid.slice_mut(s![z, sy..sy + ny, sx..sx + nx, 0]);
                for ((y, x), voxel) in dest.indexed_iter_mut() {
                    let v = raw[y * nx + x];
                    *voxel = if !signed {
                        v
                    } else if v > 127 {
                        v - 128
                    } else {
                        v + 128
                    };
                }
            }
            (VoxelData::Bytes(grid), PixelFormat::Rgb24 | PixelFormat::Rgba32) => {
                let channels = self.info.num_channels as usize;
                let planar = self.info.planar_configuration == PlanarConfiguration::Separated;
                let plane = nx * ny;
                let mut dest = grid.slice_mut(s![z, sy..sy + ny, sx..sx + nx, ..]);
                for ((y, x, c), voxel) in dest.indexed_iter_mut() {
                    let i = y * nx + x;
                    *voxel = if planar {
                        raw[c * plane + i]
                    } else {
                        raw[i * channels + c]
                    };
                }
            }
            (VoxelData::Float(grid), format) => {
                let range = match format {
                    PixelFormat::UInt16 => write_samples::<u16>(grid, raw, [sx, sy, z], nx, ny),
                    PixelFormat::Int16 => write_samples::<i16>(grid, raw, [sx, sy, z], nx, ny),
                    PixelFormat::UInt32 => write_samples::<u32>(grid, raw, [sx, sy, z], nx, ny),
                    PixelFormat::Int32 => write_samples::<i32>(grid, raw, [sx, sy, z], nx, ny),
                    _ => write_samples::<f32>(grid, raw, [sx, sy, z], nx, ny),
                };
                self.min = self.min.min(range.0);
                self.max = self.max.max(range.1);
            }
            (VoxelData::Bytes(_), format) => {
                debug!("no byte layout for {format}, slice {} left empty", self.z);
            }
        }
    }

    fn normalize_slice(&mut self) {
        let [sx, sy, sz] = self.volume.start();
        let VoxelData::Float(grid) = &mut self.volume.data else {
            return;
        };
        let (nx, ny) = (self.info.nx, self.info.ny);
        let (min, range) = (self.min, self.max - self.min);
        let mut dest = grid.slice_mut(s![sz + self.z, sy..sy + ny, sx..sx + nx, ..]);
        for mut lane in dest.lanes_mut(Axis(2)) {
            let v = if range > 0.0 {
                ((f64::from(lane[0]) - min) / range) as f32
            } else {
                0.0
            };
            lane[0] = v;
            lane[1] = v;
        }
    }
}

fn read_at(path: &Path, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Byte order, photometric inversion and stored bit masking, in that order.
pub fn preprocess_slice(raw: &mut [u8], info: &DcmInfo) {
    let width = info.bytes_per_channel as usize;
    let count = raw.len() / width.max(1);
    if info.needs_swap() {
        swap_bytes(raw, 0, width, count);
    }
    if info.photometric_interpretation == PhotometricInterpretation::Monochrome1 {
        invert_bytes(raw);
    }
    if info.needs_masking() {
        match width {
            1 => mask_bits8(info.bits_stored, count, raw, 0),
            2 => mask_bits16(info.bits_stored, count, raw, 0),
            4 => mask_bits32(info.bits_stored, count, raw, 0),
            _ => {}
        }
    }
}

/// Write host order samples of type `T` into channel 0 of the slice at
/// `start`, returning their extremes.
fn write_samples<T: Pod + Into<f64>>(
    grid: &mut Array4<f32>,
    raw: &[u8],
    [sx, sy, z]: [usize; 3],
    nx: usize,
    ny: usize,
) -> (f64, f64) {
    let width = size_of::<T>();
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    let mut dest = grid.slice_mut(s![z, sy..sy + ny, sx..sx + nx, 0]);
    for ((y, x), voxel) in dest.indexed_iter_mut() {
        let at = (y * nx + x) * width;
        let v: f64 = bytemuck::pod_read_unaligned::<T>(&raw[at..at + width]).into();
        min = min.min(v);
        max = max.max(v);
        *voxel = v as f32;
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::StandardTagDictionary;
    use crate::progress::NoProgress;
    use crate::testing::{DicomWriter, EXPLICIT_VR_LE, IMPLICIT_VR_LE, le_f32, le_i16, le_u16};

    fn decoder(bytes: Vec<u8>) -> (tempfile::TempDir, VolumeDecoder) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.dcm");
        std::fs::write(&path, bytes).unwrap();
        let info = DcmInfo::from_file(&path, &StandardTagDictionary).unwrap();
        let decoder = VolumeDecoder::frames(&path, info).unwrap();
        (dir, decoder)
    }

    fn decode(bytes: Vec<u8>) -> LoadedVolume {
        let (_dir, decoder) = decoder(bytes);
        decoder
            .run(&mut NoProgress, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn decodes_and_normalizes_16_bit_frames() {
        // 2x2 pixels, 3 frames
        let samples: Vec<u16> = vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110];
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(2, 2, 1, 16, 16, 0, "MONOCHROME2")
                .pixel_data(&le_u16(&samples))
                .finish(),
        );
        let volume = loaded.volume;
        assert_eq!(volume.dim(), [2, 2, 4]);
        assert_eq!(volume.start(), [0, 0, 0]);
        assert_eq!(volume.value_range, Some((0.0, 110.0)));

        assert_eq!(volume.value(0, 0, 0, 0), Some(0.0));
        assert_eq!(volume.value(1, 1, 2, 0), Some(1.0));
        let v = volume.value(1, 0, 1, 0).unwrap();
        assert!((v - 50.0 / 110.0).abs() < 1e-6);
        assert_eq!(volume.value(1, 0, 1, 1), Some(v));
        // padding slice
        assert_eq!(volume.value(1, 1, 3, 0), Some(0.0));
    }

    #[test]
    fn decodes_into_the_centered_box() {
        let samples: Vec<u16> = (1..=75).collect();
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(5, 5, 1, 16, 16, 0, "MONOCHROME2")
                .pixel_data(&le_u16(&samples))
                .finish(),
        );
        let volume = loaded.volume;
        assert_eq!(volume.dim(), [8, 8, 4]);
        assert_eq!(volume.start(), [1, 1, 0]);
        assert_eq!(volume.value_range, Some((1.0, 75.0)));

        for z in 0..3 {
            for y in 0..5 {
                for x in 0..5 {
                    let raw = (z * 25 + y * 5 + x + 1) as f32;
                    let expected = (raw - 1.0) / 74.0;
                    let value = volume.value(x + 1, y + 1, z, 0).unwrap();
                    assert!((value - expected).abs() < 1e-6, "({x}, {y}, {z})");
                    assert_eq!(volume.value(x + 1, y + 1, z, 1), Some(value));
                }
            }
        }

        let VoxelData::Float(grid) = volume.data() else {
            panic!("16-bit volumes store floats");
        };
        let inside = |x: usize, y: usize, z: usize| {
            (1..6).contains(&x) && (1..6).contains(&y) && z < 3
        };
        for ((z, y, x, _), &v) in grid.indexed_iter() {
            if !inside(x, y, z) {
                assert_eq!(v, 0.0, "padding voxel ({x}, {y}, {z})");
            }
        }
    }

    #[test]
    fn signed_8_bit_samples_are_rebiased() {
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 4, 1, 8, 8, 1, "MONOCHROME2")
                .pixel_data(&[0x00, 0x7F, 0x80, 0xFF])
                .finish(),
        );
        let bytes: Vec<u8> = (0..4)
            .map(|x| loaded.volume.byte(x, 0, 0, 0).unwrap())
            .collect();
        assert_eq!(bytes, vec![128, 255, 0, 127]);
    }

    #[test]
    fn monochrome1_is_inverted_before_masking() {
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 2, 1, 8, 8, 0, "MONOCHROME1")
                .pixel_data(&[0x10, 0xFF])
                .finish(),
        );
        assert_eq!(loaded.volume.byte(0, 0, 0, 0), Some(0xEF));
        assert_eq!(loaded.volume.byte(1, 0, 0, 0), Some(0x00));
    }

    #[test]
    fn stored_bits_are_masked() {
        let loaded = decode(
            DicomWriter::new(IMPLICIT_VR_LE)
                .implicit()
                .image(1, 3, 1, 16, 12, 0, "MONOCHROME2")
                .pixel_data(&le_u16(&[0xF000, 0xF800, 0x0400]))
                .finish(),
        );
        let volume = loaded.volume;
        // 0xF000 -> 0, 0xF800 -> 0x800, 0x0400 -> 0x400
        assert_eq!(volume.value_range, Some((0.0, 2048.0)));
        assert_eq!(volume.value(0, 0, 0, 0), Some(0.0));
        assert_eq!(volume.value(1, 0, 0, 0), Some(1.0));
        assert_eq!(volume.value(2, 0, 0, 0), Some(0.5));
    }

    #[test]
    fn constant_volume_normalizes_to_zero() {
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 2, 1, 16, 16, 1, "MONOCHROME2")
                .pixel_data(&le_i16(&[-5, -5]))
                .finish(),
        );
        assert_eq!(loaded.volume.value_range, Some((-5.0, -5.0)));
        assert_eq!(loaded.volume.value(1, 0, 0, 0), Some(0.0));
    }

    #[test]
    fn float_pixel_data_is_normalized() {
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 3, 1, 32, 32, 0, "MONOCHROME2")
                .float_pixel_data(&le_f32(&[-1.0, 0.0, 3.0]))
                .finish(),
        );
        let volume = loaded.volume;
        assert_eq!(volume.format, PixelFormat::Float32);
        // 3 columns pad to 4, data starts at x = 0
        assert_eq!(volume.value(0, 0, 0, 0), Some(0.0));
        assert_eq!(volume.value(1, 0, 0, 0), Some(0.25));
        assert_eq!(volume.value(2, 0, 0, 0), Some(1.0));
    }

    #[test]
    fn planar_rgb_is_interleaved_per_voxel() {
        let loaded = decode(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 2, 3, 8, 8, 0, "RGB")
                .us(0x0028, 0x0006, 1)
                .pixel_data(&[1, 2, 10, 20, 100, 200])
                .finish(),
        );
        let volume = loaded.volume;
        assert_eq!(volume.format, PixelFormat::Rgb24);
        let voxel = |x| -> Vec<u8> { (0..3).map(|c| volume.byte(x, 0, 0, c).unwrap()).collect() };
        assert_eq!(voxel(0), vec![1, 10, 100]);
        assert_eq!(voxel(1), vec![2, 20, 200]);
    }

    #[test]
    fn progress_spans_both_passes() {
        let (_dir, mut decoder) = decoder(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 1, 1, 16, 16, 0, "MONOCHROME2")
                .pixel_data(&le_u16(&[1, 2]))
                .finish(),
        );
        let mut steps = Vec::new();
        while let Step::Progress(fraction) = decoder.step().unwrap() {
            steps.push(fraction);
        }
        assert_eq!(steps, vec![0.25, 0.5, 0.75, 1.0]);
        assert!(decoder.finish().is_some());
    }

    #[test]
    fn cancelled_decode_yields_nothing() {
        let (_dir, decoder) = decoder(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(2, 2, 1, 8, 8, 0, "MONOCHROME2")
                .pixel_data(&[0; 8])
                .finish(),
        );
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let mut sink = |_: f32| {
            calls += 1;
            cancel.cancel();
        };
        assert!(matches!(
            decoder.run(&mut sink, &cancel),
            Err(VolumeLoaderError::Cancelled)
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn unfinished_decoder_has_no_volume() {
        let (_dir, mut decoder) = decoder(
            DicomWriter::new(EXPLICIT_VR_LE)
                .image(1, 1, 1, 8, 8, 0, "MONOCHROME2")
                .pixel_data(&[7, 8])
                .finish(),
        );
        assert_eq!(decoder.step().unwrap(), Step::Progress(0.5));
        assert!(decoder.finish().is_none());
    }
}
