use serde::Deserialize;

use crate::scanner::AttributeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Attribute deciding which sibling files belong to the lead file's series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SelectionKey {
    #[serde(rename = "SeriesInstanceUID")]
    SeriesInstanceUid,
    SeriesNumber,
    SeriesDescription,
}

impl SelectionKey {
    pub const PRIORITY: [SelectionKey; 3] = [
        SelectionKey::SeriesInstanceUid,
        SelectionKey::SeriesNumber,
        SelectionKey::SeriesDescription,
    ];

    pub fn attribute(self) -> &'static str {
        match self {
            SelectionKey::SeriesInstanceUid => "SeriesInstanceUID",
            SelectionKey::SeriesNumber => "SeriesNumber",
            SelectionKey::SeriesDescription => "SeriesDescription",
        }
    }

    /// First key of `priority` present in `attributes`.
    pub fn resolve(priority: &[SelectionKey], attributes: &AttributeMap) -> Option<SelectionKey> {
        priority
            .iter()
            .copied()
            .find(|key| attributes.contains(key.attribute()))
    }
}

/// Attribute ordering the slices of a series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SortKey {
    InstanceNumber,
    #[serde(rename = "SOPInstanceUID")]
    SopInstanceUid,
    #[serde(rename = "MediaStorageSOPInstanceUID")]
    MediaStorageSopInstanceUid,
    SliceLocation,
    FileName,
}

impl SortKey {
    pub const PRIORITY: [SortKey; 5] = [
        SortKey::InstanceNumber,
        SortKey::SopInstanceUid,
        SortKey::MediaStorageSopInstanceUid,
        SortKey::SliceLocation,
        SortKey::FileName,
    ];

    pub fn attribute(self) -> &'static str {
        match self {
            SortKey::InstanceNumber => "InstanceNumber",
            SortKey::SopInstanceUid => "SOPInstanceUID",
            SortKey::MediaStorageSopInstanceUid => "MediaStorageSOPInstanceUID",
            SortKey::SliceLocation => "SliceLocation",
            SortKey::FileName => AttributeMap::FILE_NAME,
        }
    }

    /// First key of `priority` present in `attributes`.
    pub fn resolve(priority: &[SortKey], attributes: &AttributeMap) -> Option<SortKey> {
        priority
            .iter()
            .copied()
            .find(|key| attributes.contains(key.attribute()))
    }
}
