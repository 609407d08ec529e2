//! Per-file variable metadata records and grouping them by attribute.
//!
//! A diagnostic run is handed a flat collection of [`VariableMetadata`] records,
//! one per variable per dataset per file. Nearly every step afterwards works on
//! those records bucketed by one attribute, usually the dataset name and then
//! the variable short name, which is what [`group_metadata`] provides.
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    str::FromStr,
};

use indexmap::IndexMap;
use serde::Deserialize;
use strum::IntoEnumIterator;

use crate::error::{DataLoadError, InvalidKeyError};

/// Records bucketed by the value of one attribute.
///
/// Keys are in the order they were first seen in the input, and each
/// bucket holds its records in their original relative order.
pub type GroupedMetadata = IndexMap<String, Vec<VariableMetadata>>;

/// The group key used for records that have no vertical level.
pub const NO_LEVEL_KEY: &str = "-";

/// Metadata describing one physical variable from one dataset stored in one file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VariableMetadata {
    /// Dataset (model) that produced the file.
    pub dataset: String,
    /// Variable short name, e.g. "tas".
    pub short_name: String,
    pub long_name: String,
    pub units: String,
    /// First year of data.
    pub start_year: i32,
    /// Last year of data.
    pub end_year: i32,
    /// Ensemble (variant label) of the file, e.g. "r1i1p5f101".
    pub ensemble: String,
    /// Path to the file holding the variable's data.
    pub filename: PathBuf,
    /// Vertical level, if the variable was extracted from a 3-D field.
    #[serde(default)]
    pub level: Option<String>,
}

impl VariableMetadata {
    /// Return the string value of the attribute selected by `key`.
    pub fn attribute(&self, key: MetadataKey) -> Cow<'_, str> {
        match key {
            MetadataKey::Dataset => Cow::Borrowed(&self.dataset),
            MetadataKey::ShortName => Cow::Borrowed(&self.short_name),
            MetadataKey::LongName => Cow::Borrowed(&self.long_name),
            MetadataKey::Units => Cow::Borrowed(&self.units),
            MetadataKey::Ensemble => Cow::Borrowed(&self.ensemble),
            MetadataKey::Filename => self.filename.to_string_lossy(),
            MetadataKey::Level => Cow::Borrowed(self.level.as_deref().unwrap_or(NO_LEVEL_KEY)),
        }
    }
}

/// The attributes of [`VariableMetadata`] that records can be grouped by.
///
/// Parse one from its snake case attribute name with [`FromStr`]; any other
/// string gives an [`InvalidKeyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MetadataKey {
    Dataset,
    ShortName,
    LongName,
    Units,
    Ensemble,
    Filename,
    Level,
}

impl FromStr for MetadataKey {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|k| k.as_ref() == s)
            .ok_or_else(|| InvalidKeyError(s.to_string()))
    }
}

/// Partition `records` into groups sharing the same value of the `key` attribute.
///
/// Every record lands in exactly one group. Groups appear in the order their
/// key was first encountered and keep the input order of their records. An
/// empty input gives an empty mapping.
pub fn group_metadata<'a, I>(records: I, key: MetadataKey) -> GroupedMetadata
where
    I: IntoIterator<Item = &'a VariableMetadata>,
{
    let mut groups = GroupedMetadata::new();
    for rec in records {
        groups
            .entry(rec.attribute(key).into_owned())
            .or_default()
            .push(rec.clone());
    }
    groups
}

/// Like [`group_metadata`], but with the attribute given by name.
pub fn group_metadata_by<'a, I>(records: I, key: &str) -> Result<GroupedMetadata, InvalidKeyError>
where
    I: IntoIterator<Item = &'a VariableMetadata>,
{
    let key = MetadataKey::from_str(key)?;
    Ok(group_metadata(records, key))
}

/// Group already grouped records again by a different attribute.
///
/// Records are visited group by group, so the new groups are ordered by
/// where their first member sat in `grouped`. Typical use is going from
/// groups per dataset to groups per variable short name.
pub fn regroup(grouped: &GroupedMetadata, key: MetadataKey) -> GroupedMetadata {
    group_metadata(grouped.values().flatten(), key)
}

/// The flat collection of metadata records handed to a diagnostic run.
///
/// On disk this is a JSON document that is either an object keyed by file
/// name with one record per key, an object keyed by dataset with a list of
/// records per key, or a plain array of records.
#[derive(Debug, Clone, Default)]
pub struct InputCollection {
    records: Vec<VariableMetadata>,
}

impl InputCollection {
    pub fn new(records: Vec<VariableMetadata>) -> Self {
        Self { records }
    }

    /// Parse the collection from JSON text.
    ///
    /// The document shape is decided from the top-level value before the
    /// records are deserialized, so an error names the offending field.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(s)?;
        let by_dataset = doc.as_object()
            .is_some_and(|map| !map.is_empty() && map.values().all(|v| v.is_array()));

        let records = if doc.is_array() {
            serde_json::from_value(doc)?
        } else if by_dataset {
            let groups: IndexMap<String, Vec<VariableMetadata>> = serde_json::from_value(doc)?;
            groups.into_values().flatten().collect()
        } else if doc.is_object() {
            let by_file: IndexMap<String, VariableMetadata> = serde_json::from_value(doc)?;
            by_file.into_values().collect()
        } else {
            return Err(serde::de::Error::custom(
                "expected an object keyed by file or dataset, or a list of records"
            ));
        };
        Ok(Self { records })
    }

    /// Read the collection from a JSON file.
    ///
    /// Relative `filename` values are taken as relative to the directory
    /// containing `path`.
    pub fn from_json_file(path: &Path) -> Result<Self, DataLoadError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DataLoadError::could_not_read(path, e))?;
        let mut me = Self::from_json_str(&contents)
            .map_err(|e| DataLoadError::malformed(path, e))?;

        if let Some(parent) = path.parent() {
            for rec in me.records.iter_mut() {
                if rec.filename.is_relative() {
                    rec.filename = parent.join(&rec.filename);
                }
            }
        }
        log::debug!("Read {} metadata records from {}", me.records.len(), path.display());
        Ok(me)
    }

    pub fn records(&self) -> &[VariableMetadata] {
        &self.records
    }

    pub fn into_records(self) -> Vec<VariableMetadata> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
