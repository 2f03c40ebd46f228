use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use dicom::core::dictionary::DataDictionary;
use dicom::core::{Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;

static STANDARD: StandardDataDictionary = StandardDataDictionary;

/// Combine a group and element number into the 32-bit key used for lookups.
#[inline]
pub const fn tag_key(group: u16, element: u16) -> u32 {
    ((group as u32) << 16) | element as u32
}

/// A single dictionary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictEntry {
    pub vr: VR,
    pub name: Cow<'static, str>,
}

impl DictEntry {
    pub fn new(vr: VR, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            vr,
            name: name.into(),
        }
    }

    /// The entry in its stored form: the two-letter VR immediately
    /// followed by the attribute name (e.g. `USRows`).
    pub fn code(&self) -> String {
        format!("{}{}", self.vr.to_string(), self.name)
    }

    /// Parse an entry from its stored `VR + name` form.
    pub fn from_code(code: &str) -> Option<Self> {
        let vr_code = code.get(..2)?;
        let name = code.get(2..)?;
        if name.is_empty() {
            return None;
        }
        let vr = VR::from_binary([vr_code.as_bytes()[0], vr_code.as_bytes()[1]])?;
        Some(Self::new(vr, name.to_owned()))
    }
}

impl fmt::Display for DictEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Read-only attribute lookup keyed by combined tag.
///
/// A missing entry is not an error: the scanner skips such elements.
pub trait TagDictionary: Send + Sync {
    fn lookup(&self, tag: u32) -> Option<DictEntry>;
}

impl<D: TagDictionary + ?Sized> TagDictionary for &D {
    fn lookup(&self, tag: u32) -> Option<DictEntry> {
        (**self).lookup(tag)
    }
}

impl<D: TagDictionary + ?Sized> TagDictionary for Box<D> {
    fn lookup(&self, tag: u32) -> Option<DictEntry> {
        (**self).lookup(tag)
    }
}

/// The standard DICOM attribute registry.
///
/// Backed by the lazily built, immutable index of `dicom-dictionary-std`.
/// Private (odd group) attributes are never resolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardTagDictionary;

impl TagDictionary for StandardTagDictionary {
    fn lookup(&self, tag: u32) -> Option<DictEntry> {
        let group = (tag >> 16) as u16;
        let element = (tag & 0xFFFF) as u16;
        if group & 1 == 1 {
            return None;
        }
        STANDARD
            .by_tag(Tag(group, element))
            .map(|entry| DictEntry::new(entry.vr.relaxed(), entry.alias))
    }
}

/// A fixed table of entries, typically supplied through configuration,
/// optionally layered over another dictionary.
pub struct TableDictionary {
    entries: HashMap<u32, DictEntry>,
    fallback: Option<Box<dyn TagDictionary>>,
}

impl TableDictionary {
    pub fn new(entries: impl IntoIterator<Item = (u32, DictEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            fallback: None,
        }
    }

    /// Entries of this table take precedence over those of `fallback`.
    pub fn with_fallback(mut self, fallback: impl TagDictionary + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TableDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDictionary")
            .field("entries", &self.entries.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl TagDictionary for TableDictionary {
    fn lookup(&self, tag: u32) -> Option<DictEntry> {
        self.entries
            .get(&tag)
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|d| d.lookup(tag)))
    }
}

/// Parse a tag written as `gggg,eeee`, `(gggg,eeee)` or `ggggeeee`.
pub fn parse_tag(text: &str) -> Option<u32> {
    let text = text.trim().trim_start_matches('(').trim_end_matches(')');
    let (group, element) = match text.split_once(',') {
        Some((g, e)) => (g.trim(), e.trim()),
        None if text.len() == 8 => text.split_at(4),
        None => return None,
    };
    if group.len() != 4 || element.len() != 4 {
        return None;
    }
    let group = u16::from_str_radix(group, 16).ok()?;
    let element = u16::from_str_radix(element, 16).ok()?;
    Some(tag_key(group, element))
}
