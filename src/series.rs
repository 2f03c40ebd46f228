use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;

use crate::config::LoaderConfig;
use crate::dictionary::TagDictionary;
use crate::enums::{SelectionKey, SortKey};
use crate::scanner::{AttributeMap, PixelDataLocator, parent_dir, scan_file};
use crate::volume_loader::VolumeLoaderError;

/// One slice file of a series.
#[derive(Debug, Clone)]
pub struct SeriesEntry {
    pub path: PathBuf,
    pub locator: PixelDataLocator,
    pub attributes: AttributeMap,
}

/// Collect the files of the directory of `lead_path` belonging to the same
/// series as the lead file, ordered by the configured sort key.
///
/// The lead file is always part of the result.
pub fn assemble_series(
    lead_path: &Path,
    lead: &AttributeMap,
    dict: &dyn TagDictionary,
    config: &LoaderConfig,
) -> Result<Vec<SeriesEntry>, VolumeLoaderError> {
    let lead_locator = lead
        .pixel_data()
        .ok_or(VolumeLoaderError::InsufficientPixelData {
            length: 0,
            slice_bytes: 0,
        })?;
    let selection = SelectionKey::resolve(&config.selection_keys, lead)
        .and_then(|key| lead.get(key.attribute()).map(|value| (key, value)));
    let sort_key =
        SortKey::resolve(&config.sort_keys, lead).ok_or(VolumeLoaderError::MissingSortKey)?;

    let dir = parent_dir(lead_path);
    let lead_name = lead_path.file_name();
    let candidates: Vec<PathBuf> = fs::read_dir(&dir)
        .map_err(|source| VolumeLoaderError::Io {
            path: dir.clone(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.file_name() != lead_name)
        .filter(|path| config.accepts_file(path))
        .collect();

    let matching = |path: &PathBuf| -> Option<SeriesEntry> {
        let attributes = match scan_file(path, dict) {
            Ok(attributes) => attributes,
            Err(e) => {
                debug!("skipping {}: {e}", path.display());
                return None;
            }
        };
        if let Some((key, value)) = selection {
            if attributes.get(key.attribute()) != Some(value) {
                debug!("skipping {}: not in {key:?} {value}", path.display());
                return None;
            }
        }
        let locator = attributes.pixel_data()?;
        if locator.length != lead_locator.length {
            debug!(
                "skipping {}: {} bytes of pixel data instead of {}",
                path.display(),
                locator.length,
                lead_locator.length
            );
            return None;
        }
        Some(SeriesEntry {
            path: path.clone(),
            locator,
            attributes,
        })
    };

    let siblings: Vec<SeriesEntry> = if config.parallel_scan {
        candidates.par_iter().filter_map(matching).collect()
    } else {
        candidates.iter().filter_map(matching).collect()
    };

    let mut entries = Vec::with_capacity(siblings.len() + 1);
    entries.push(SeriesEntry {
        path: lead_path.to_path_buf(),
        locator: lead_locator,
        attributes: lead.clone(),
    });
    entries.extend(siblings);

    let attribute = sort_key.attribute();
    entries.sort_by(|a, b| {
        compare_sort_values(
            a.attributes.get(attribute).unwrap_or_default(),
            b.attributes.get(attribute).unwrap_or_default(),
        )
    });

    info!(
        "assembled {} slices from {} (selected by {:?}, ordered by {sort_key:?})",
        entries.len(),
        dir.display(),
        selection.map(|(key, _)| key),
    );
    Ok(entries)
}

/// Numbers compare numerically and before any non-number,
/// other values compare as case-insensitive text.
///
/// `NaN` counts as text so the ordering stays total.
pub fn compare_sort_values(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| {
        v.split('\\')
            .next()
            .unwrap_or(v)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| !n.is_nan())
    };
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}
