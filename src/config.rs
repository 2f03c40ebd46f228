use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::dictionary::{DictEntry, StandardTagDictionary, TableDictionary, TagDictionary, parse_tag};
use crate::enums::{SelectionKey, SortKey};
use crate::texture::MemoryAllocator;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid dictionary tag `{0}`")]
    InvalidTag(String),

    #[error("invalid dictionary entry `{0}`, expected a VR followed by a name")]
    InvalidEntry(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DictionaryEntryConfig {
    pub tag: String,
    /// VR immediately followed by the attribute name, e.g. `USRows`.
    pub entry: String,
}

/// Loader configuration, read from TOML.
///
/// ```toml
/// selection_keys = ["SeriesInstanceUID", "SeriesNumber"]
/// sort_keys = ["InstanceNumber", "SliceLocation", "FileName"]
/// parallel_scan = true
/// extensions = ["dcm"]
/// max_texture_edge = 2048
///
/// [[dictionary]]
/// tag = "0029,1010"
/// entry = "LOVendorSliceLabel"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Priority of the attributes selecting sibling files of the same series.
    pub selection_keys: Vec<SelectionKey>,
    /// Priority of the attributes ordering the slices.
    pub sort_keys: Vec<SortKey>,
    /// Scan sibling headers on the rayon thread pool.
    pub parallel_scan: bool,
    /// Sibling file extensions to consider, all files when empty.
    pub extensions: Vec<String>,
    pub max_texture_edge: usize,
    /// Extra dictionary entries, taking precedence over the standard ones.
    pub dictionary: Vec<DictionaryEntryConfig>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            selection_keys: SelectionKey::PRIORITY.to_vec(),
            sort_keys: SortKey::PRIORITY.to_vec(),
            parallel_scan: true,
            extensions: Vec::new(),
            max_texture_edge: MemoryAllocator::DEFAULT_MAX_EDGE,
            dictionary: Vec::new(),
        }
    }
}

impl LoaderConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        // validate eagerly so a bad entry surfaces at load time
        config.table_entries()?;
        Ok(config)
    }

    fn table_entries(&self) -> Result<Vec<(u32, DictEntry)>, ConfigError> {
        self.dictionary
            .iter()
            .map(|e| {
                let tag = parse_tag(&e.tag).ok_or_else(|| ConfigError::InvalidTag(e.tag.clone()))?;
                let entry = DictEntry::from_code(e.entry.trim())
                    .ok_or_else(|| ConfigError::InvalidEntry(e.entry.clone()))?;
                Ok((tag, entry))
            })
            .collect()
    }

    /// The standard dictionary, overlaid with the configured entries.
    pub fn tag_dictionary(&self) -> Result<Box<dyn TagDictionary>, ConfigError> {
        let entries = self.table_entries()?;
        if entries.is_empty() {
            return Ok(Box::new(StandardTagDictionary));
        }
        Ok(Box::new(
            TableDictionary::new(entries).with_fallback(StandardTagDictionary),
        ))
    }

    pub fn accepts_file(&self, path: &Path) -> bool {
        self.extensions.is_empty()
            || path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    pub fn allocator(&self) -> MemoryAllocator {
        MemoryAllocator::new(self.max_texture_edge)
    }
}
