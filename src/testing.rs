use std::path::{Path, PathBuf};

use dicom::core::VR;

pub(crate) const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub(crate) const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub(crate) const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

/// Writes a little endian Part 10 file element by element.
/// The meta group is always explicit VR, the data set follows `implicit()`.
pub(crate) struct DicomWriter {
    bytes: Vec<u8>,
    implicit: bool,
}

impl DicomWriter {
    pub(crate) fn new(transfer_syntax: &str) -> Self {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        let mut writer = Self {
            bytes,
            implicit: false,
        };
        writer.write(0x0002, 0x0010, VR::UI, &padded(transfer_syntax, 0));
        writer
    }

    pub(crate) fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }

    fn write(&mut self, group: u16, element: u16, vr: VR, value: &[u8]) {
        self.bytes.extend_from_slice(&group.to_le_bytes());
        self.bytes.extend_from_slice(&element.to_le_bytes());
        if self.implicit && group != 0x0002 {
            self.bytes
                .extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            self.bytes.extend_from_slice(vr.to_string().as_bytes());
            if is_long(vr) {
                self.bytes.extend_from_slice(&[0, 0]);
                self.bytes
                    .extend_from_slice(&(value.len() as u32).to_le_bytes());
            } else {
                self.bytes
                    .extend_from_slice(&(value.len() as u16).to_le_bytes());
            }
        }
        self.bytes.extend_from_slice(value);
    }

    pub(crate) fn element(mut self, group: u16, element: u16, vr: VR, value: &[u8]) -> Self {
        self.write(group, element, vr, value);
        self
    }

    pub(crate) fn us(self, group: u16, element: u16, value: u16) -> Self {
        self.element(group, element, VR::US, &value.to_le_bytes())
    }

    pub(crate) fn text(self, group: u16, element: u16, vr: VR, value: &str) -> Self {
        let pad = if vr == VR::UI { 0 } else { b' ' };
        self.element(group, element, vr, &padded(value, pad))
    }

    /// Sequence with a defined length and opaque content.
    pub(crate) fn sequence(self, group: u16, element: u16, content: &[u8]) -> Self {
        self.element(group, element, VR::SQ, content)
    }

    /// Sequence of undefined length holding one empty item.
    pub(crate) fn undefined_sequence(mut self, group: u16, element: u16) -> Self {
        self.bytes.extend_from_slice(&group.to_le_bytes());
        self.bytes.extend_from_slice(&element.to_le_bytes());
        if !self.implicit {
            self.bytes.extend_from_slice(b"SQ\0\0");
        }
        self.bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        for (item, length) in [(0xE000u16, u32::MAX), (0xE00D, 0), (0xE0DD, 0)] {
            self.bytes.extend_from_slice(&0xFFFEu16.to_le_bytes());
            self.bytes.extend_from_slice(&item.to_le_bytes());
            self.bytes.extend_from_slice(&length.to_le_bytes());
        }
        self
    }

    /// Image pixel module attributes.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn image(
        self,
        rows: u16,
        columns: u16,
        samples_per_pixel: u16,
        bits_allocated: u16,
        bits_stored: u16,
        pixel_representation: u16,
        photometric: &str,
    ) -> Self {
        self.us(0x0028, 0x0002, samples_per_pixel)
            .text(0x0028, 0x0004, VR::CS, photometric)
            .us(0x0028, 0x0010, rows)
            .us(0x0028, 0x0011, columns)
            .us(0x0028, 0x0100, bits_allocated)
            .us(0x0028, 0x0101, bits_stored)
            .us(0x0028, 0x0102, bits_stored.saturating_sub(1))
            .us(0x0028, 0x0103, pixel_representation)
    }

    pub(crate) fn series(self, series_uid: &str, instance_number: i32) -> Self {
        self.text(0x0020, 0x000E, VR::UI, series_uid).text(
            0x0020,
            0x0013,
            VR::IS,
            &instance_number.to_string(),
        )
    }

    pub(crate) fn pixel_data(self, data: &[u8]) -> Self {
        self.element(0x7FE0, 0x0010, VR::OW, data)
    }

    pub(crate) fn float_pixel_data(self, data: &[u8]) -> Self {
        self.element(0x7FE0, 0x0008, VR::OF, data)
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn write_to(self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref().to_path_buf();
        std::fs::write(&path, self.bytes).expect("should write synthetic file");
        path
    }
}

fn is_long(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB
            | VR::OD
            | VR::OF
            | VR::OL
            | VR::OV
            | VR::OW
            | VR::SQ
            | VR::SV
            | VR::UC
            | VR::UR
            | VR::UT
            | VR::UN
            | VR::UV
    )
}

fn padded(value: &str, pad: u8) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(pad);
    }
    bytes
}

pub(crate) fn le_u16(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn le_i16(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn le_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
