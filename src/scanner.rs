//! Element stream scanner.
//!
//! Walks a DICOM Part 10 byte buffer from the end of the preamble,
//! decoding one `(tag, VR, length, value)` element at a time into an
//! [`AttributeMap`]. Scanning stops at the first pixel data element,
//! whose position is recorded instead of its value.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use dicom::core::VR;
use log::{debug, trace};
use thiserror::Error;

use crate::codec::{HOST_NEEDS_SWAP, decode_value_as_string};
use crate::dictionary::{TagDictionary, tag_key};

/// Size of the ignored file preamble.
pub const PREAMBLE_LEN: usize = 128;
/// Signature expected right after the preamble.
pub const MAGIC: &[u8; 4] = b"DICM";
/// Offset of the first data element.
pub const FIRST_ELEMENT_OFFSET: usize = PREAMBLE_LEN + MAGIC.len();

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
/// Bytes skipped for a sequence of undefined length: one item header.
const UNDEFINED_SEQUENCE_SKIP: usize = 8;
const ITEM_GROUP: u16 = 0xFFFE;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("file does not exist")]
    NotFound,

    #[error("missing DICM signature")]
    NotDicom,

    #[error("could not read file: {0}")]
    Io(#[from] io::Error),

    #[error("value of element ({:04X},{:04X}) at offset {offset} overruns the buffer", .tag >> 16, .tag & 0xFFFF)]
    Truncated { tag: u32, offset: usize },
}

/// The three pixel data attributes which terminate a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelDataKind {
    PixelData,
    FloatPixelData,
    DoubleFloatPixelData,
}

impl PixelDataKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PixelData" => Some(Self::PixelData),
            "FloatPixelData" => Some(Self::FloatPixelData),
            "DoubleFloatPixelData" => Some(Self::DoubleFloatPixelData),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PixelData => "PixelData",
            Self::FloatPixelData => "FloatPixelData",
            Self::DoubleFloatPixelData => "DoubleFloatPixelData",
        }
    }
}

/// Position of the pixel data value inside its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDataLocator {
    pub offset: u64,
    pub length: u64,
    pub kind: PixelDataKind,
}

/// Decoded attributes of one file, keyed by attribute name.
///
/// The first value recorded for a key is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    values: HashMap<String, String>,
    pixel_data: Option<PixelDataLocator>,
}

impl AttributeMap {
    pub const FILE_PATH: &'static str = "FilePath";
    pub const FILE_NAME: &'static str = "FileName";
    pub const PIXEL_DATA_LOCATOR: &'static str = "PixelDataLocator";

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value, unless the key is already present.
    /// Returns whether the value was stored.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The first value of a possibly multi-valued attribute, parsed as a number.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.split('\\').next()?.trim().parse().ok()
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        let value = self.get_f64(key)?;
        (value >= 0.0 && value <= f64::from(u32::MAX)).then_some(value as u32)
    }

    /// All values of a multi-valued attribute, if every one of them parses.
    pub fn get_multi_f64(&self, key: &str) -> Option<Vec<f64>> {
        self.get(key)?
            .split('\\')
            .map(|v| v.trim().parse().ok())
            .collect()
    }

    pub fn pixel_data(&self) -> Option<PixelDataLocator> {
        self.pixel_data
    }

    pub fn set_pixel_data(&mut self, locator: PixelDataLocator) {
        self.insert(
            Self::PIXEL_DATA_LOCATOR,
            format!("{}\\{}", locator.offset, locator.length),
        );
        self.pixel_data.get_or_insert(locator);
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.get(Self::FILE_PATH).map(Path::new)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.get(Self::FILE_NAME)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// How the length field of an element is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthField {
    /// VR followed by a 2-byte length.
    Short(VR),
    /// VR, 2 reserved bytes, then a 4-byte length.
    /// The VR is `None` for the `VR` placeholder code.
    Long(Option<VR>),
    /// No VR present, a 4-byte length follows the tag.
    Implicit,
}

fn classify(code: [u8; 2]) -> LengthField {
    if &code == b"VR" {
        return LengthField::Long(None);
    }
    match VR::from_binary(code) {
        Some(
            vr @ (VR::AE
            | VR::AS
            | VR::AT
            | VR::CS
            | VR::DA
            | VR::DS
            | VR::DT
            | VR::FL
            | VR::FD
            | VR::IS
            | VR::LO
            | VR::LT
            | VR::PN
            | VR::SH
            | VR::SL
            | VR::SS
            | VR::ST
            | VR::TM
            | VR::UI
            | VR::UL
            | VR::US),
        ) => LengthField::Short(vr),
        Some(
            vr @ (VR::OB
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
            | VR::UV),
        ) => LengthField::Long(Some(vr)),
        _ => LengthField::Implicit,
    }
}

#[inline]
fn read_u16(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [bytes[at], bytes[at + 1]];
    if HOST_NEEDS_SWAP {
        raw.reverse();
    }
    u16::from_ne_bytes(raw)
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
    if HOST_NEEDS_SWAP {
        raw.reverse();
    }
    u32::from_ne_bytes(raw)
}

/// Check for the `DICM` signature after the 128 byte preamble.
pub fn has_dicom_signature(bytes: &[u8]) -> bool {
    bytes.len() >= FIRST_ELEMENT_OFFSET && &bytes[PREAMBLE_LEN..FIRST_ELEMENT_OFFSET] == MAGIC
}

/// Whether the file at `path` exists and carries the DICOM signature.
pub fn is_dicom(path: impl AsRef<Path>) -> bool {
    let mut head = [0u8; FIRST_ELEMENT_OFFSET];
    File::open(path.as_ref())
        .and_then(|mut file| file.read_exact(&mut head))
        .map(|_| has_dicom_signature(&head))
        .unwrap_or(false)
}

/// Scan the elements of an in-memory DICOM file.
pub fn scan_bytes(bytes: &[u8], dict: &dyn TagDictionary) -> Result<AttributeMap, ScanError> {
    if !has_dicom_signature(bytes) {
        return Err(ScanError::NotDicom);
    }

    let mut map = AttributeMap::new();
    let mut i = FIRST_ELEMENT_OFFSET;

    while bytes.len().saturating_sub(i) >= 8 {
        let group = read_u16(bytes, i);
        let element = read_u16(bytes, i + 2);
        let tag = tag_key(group, element);

        let (field, length, header_len) = match classify([bytes[i + 4], bytes[i + 5]]) {
            field @ LengthField::Short(_) => (field, u32::from(read_u16(bytes, i + 6)), 8),
            field @ LengthField::Long(_) => {
                if bytes.len() - i < 12 {
                    break;
                }
                (field, read_u32(bytes, i + 8), 12)
            }
            LengthField::Implicit => (LengthField::Implicit, read_u32(bytes, i + 4), 8),
        };
        i += header_len;

        // item and delimiter headers carry no value of their own
        if group == ITEM_GROUP || length == 0 {
            continue;
        }

        let Some(entry) = dict.lookup(tag) else {
            trace!("skipping unknown element ({group:04X},{element:04X})");
            i = i.saturating_add(skip_length(length));
            continue;
        };

        let vr = match field {
            LengthField::Short(vr) | LengthField::Long(Some(vr)) => vr,
            LengthField::Long(None) | LengthField::Implicit => entry.vr,
        };

        if matches!(vr, VR::SQ | VR::UN) {
            trace!("skipping sequence {}", entry.name);
            i = i.saturating_add(skip_length(length));
            continue;
        }

        if let Some(kind) = PixelDataKind::from_name(&entry.name) {
            debug!("{} found at offset {i} with length {length}", kind.name());
            map.set_pixel_data(PixelDataLocator {
                offset: i as u64,
                length: u64::from(length),
                kind,
            });
            break;
        }

        let length = length as usize;
        // the header fitted, so `i` never exceeds the buffer here
        if length > bytes.len() - i {
            return Err(ScanError::Truncated { tag, offset: i });
        }
        let value = decode_value_as_string(bytes, i, vr, length, HOST_NEEDS_SWAP);
        trace!("{} = {value}", entry.name);
        map.insert(entry.name.into_owned(), value);
        i += length;
    }

    Ok(map)
}

fn skip_length(length: u32) -> usize {
    if length == UNDEFINED_LENGTH {
        UNDEFINED_SEQUENCE_SKIP
    } else {
        length as usize
    }
}

/// Read and scan a DICOM file, adding the `FilePath` and `FileName` keys.
pub fn scan_file(
    path: impl AsRef<Path>,
    dict: &dyn TagDictionary,
) -> Result<AttributeMap, ScanError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ScanError::NotFound,
        _ => ScanError::Io(e),
    })?;
    let mut map = scan_bytes(&bytes, dict)?;
    map.insert(AttributeMap::FILE_PATH, path.display().to_string());
    if let Some(name) = path.file_name() {
        map.insert(AttributeMap::FILE_NAME, name.to_string_lossy());
    }
    Ok(map)
}

/// Directory holding `path`, `.` for a bare file name.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::StandardTagDictionary;
    use crate::testing::{DicomWriter, EXPLICIT_VR_LE, IMPLICIT_VR_LE};

    #[test]
    fn rejects_missing_signature() {
        let bytes = vec![0u8; 200];
        assert!(matches!(
            scan_bytes(&bytes, &StandardTagDictionary),
            Err(ScanError::NotDicom)
        ));
        assert!(matches!(
            scan_bytes(&bytes[..100], &StandardTagDictionary),
            Err(ScanError::NotDicom)
        ));
    }

    #[test]
    fn is_dicom_checks_length_and_signature() {
        let dir = tempfile::tempdir().unwrap();

        let valid = dir.path().join("valid.dcm");
        std::fs::write(&valid, DicomWriter::new(EXPLICIT_VR_LE).finish()).unwrap();
        assert!(is_dicom(&valid));

        let short = dir.path().join("short.dcm");
        let mut bytes = vec![0u8; 131];
        bytes[128..131].copy_from_slice(b"DIC");
        std::fs::write(&short, bytes).unwrap();
        assert!(!is_dicom(&short));

        let wrong = dir.path().join("wrong.dcm");
        let mut bytes = vec![0u8; 132];
        bytes[128..132].copy_from_slice(b"DICN");
        std::fs::write(&wrong, bytes).unwrap();
        assert!(!is_dicom(&wrong));

        assert!(!is_dicom(dir.path().join("missing.dcm")));
    }

    #[test]
    fn scans_explicit_vr_elements() {
        let bytes = DicomWriter::new(EXPLICIT_VR_LE)
            .us(0x0028, 0x0010, 4)
            .us(0x0028, 0x0011, 3)
            .text(0x0028, 0x0030, VR::DS, "0.5\\0.25")
            .text(0x0008, 0x0060, VR::CS, "CT")
            .pixel_data(&[0u8; 24])
            .finish();

        let map = scan_bytes(&bytes, &StandardTagDictionary).unwrap();
        assert_eq!(map.get("TransferSyntaxUID"), Some(EXPLICIT_VR_LE));
        assert_eq!(map.get_u32("Rows"), Some(4));
        assert_eq!(map.get_u32("Columns"), Some(3));
        assert_eq!(map.get_multi_f64("PixelSpacing"), Some(vec![0.5, 0.25]));
        assert_eq!(map.get("Modality"), Some("CT"));

        let locator = map.pixel_data().unwrap();
        assert_eq!(locator.length, 24);
        assert_eq!(locator.kind, PixelDataKind::PixelData);
        assert_eq!(locator.offset as usize, bytes.len() - 24);
        assert_eq!(
            map.get(AttributeMap::PIXEL_DATA_LOCATOR),
            Some(format!("{}\\24", locator.offset).as_str())
        );
    }

    #[test]
    fn recovers_vr_of_implicit_elements() {
        let bytes = DicomWriter::new(IMPLICIT_VR_LE)
            .implicit()
            .us(0x0028, 0x0010, 2)
            .text(0x0020, 0x000E, VR::UI, "1.2.3")
            .text(0x0018, 0x0050, VR::DS, "2.5")
            .pixel_data(&[0u8; 8])
            .finish();

        let map = scan_bytes(&bytes, &StandardTagDictionary).unwrap();
        assert_eq!(map.get("TransferSyntaxUID"), Some(IMPLICIT_VR_LE));
        assert_eq!(map.get_u32("Rows"), Some(2));
        assert_eq!(map.get("SeriesInstanceUID"), Some("1.2.3"));
        assert_eq!(map.get_f64("SliceThickness"), Some(2.5));
        assert_eq!(map.pixel_data().map(|l| l.length), Some(8));
    }

    #[test]
    fn first_value_wins_and_private_tags_are_dropped() {
        let bytes = DicomWriter::new(EXPLICIT_VR_LE)
            .text(0x0008, 0x0060, VR::CS, "MR")
            .text(0x0009, 0x0010, VR::LO, "VENDOR")
            .text(0x0008, 0x0060, VR::CS, "CT")
            .finish();

        let map = scan_bytes(&bytes, &StandardTagDictionary).unwrap();
        assert_eq!(map.get("Modality"), Some("MR"));
        assert!(map.iter().all(|(_, v)| v != "VENDOR"));
        assert_eq!(map.pixel_data(), None);
    }

    #[test]
    fn skips_sequences_and_keeps_scanning() {
        let bytes = DicomWriter::new(EXPLICIT_VR_LE)
            .sequence(0x0008, 0x1140, &[0xAA; 16])
            .undefined_sequence(0x0040, 0x0275)
            .us(0x0028, 0x0010, 7)
            .finish();

        let map = scan_bytes(&bytes, &StandardTagDictionary).unwrap();
        assert_eq!(map.get_u32("Rows"), Some(7));
        assert!(!map.contains("ReferencedImageSequence"));
    }

    #[test]
    fn truncated_value_is_an_error() {
        let mut bytes = DicomWriter::new(EXPLICIT_VR_LE)
            .text(0x0008, 0x103E, VR::LO, "a long enough description")
            .finish();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            scan_bytes(&bytes, &StandardTagDictionary),
            Err(ScanError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_lengths_end_the_scan() {
        let huge = 0xFFFF_FFF0u32.to_le_bytes();

        let mut bytes = DicomWriter::new(EXPLICIT_VR_LE)
            .us(0x0028, 0x0010, 5)
            .finish();
        bytes.extend_from_slice(&[0x09, 0x00, 0x10, 0x10, b'O', b'B', 0, 0]);
        bytes.extend_from_slice(&huge);
        bytes.extend_from_slice(&[0xAB; 16]);
        let map = scan_bytes(&bytes, &StandardTagDictionary).unwrap();
        assert_eq!(map.get_u32("Rows"), Some(5));
        assert_eq!(map.pixel_data(), None);

        let mut bytes = DicomWriter::new(EXPLICIT_VR_LE).finish();
        bytes.extend_from_slice(&[0x08, 0x00, 0x3E, 0x10, b'U', b'T', 0, 0]);
        bytes.extend_from_slice(&huge);
        bytes.extend_from_slice(b"short");
        assert!(matches!(
            scan_bytes(&bytes, &StandardTagDictionary),
            Err(ScanError::Truncated { tag: 0x0008_103E, .. })
        ));
    }

    #[test]
    fn scan_file_adds_file_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice1.dcm");
        std::fs::write(&path, DicomWriter::new(EXPLICIT_VR_LE).finish()).unwrap();

        let map = scan_file(&path, &StandardTagDictionary).unwrap();
        assert_eq!(map.file_name(), Some("slice1.dcm"));
        assert_eq!(map.file_path(), Some(path.as_path()));

        assert!(matches!(
            scan_file(dir.path().join("nope.dcm"), &StandardTagDictionary),
            Err(ScanError::NotFound)
        ));
    }
}
