//! Record model and the parser seam for pulled data files
//!
//! - `sqlite`: reader for the SQLite file pulled from the device

pub mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::ser::{Serialize, Serializer};

use crate::error::AppError;

pub use self::sqlite::SqliteRecordParser;

/// One untyped row: column name to string value, in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record(Vec<(String, String)>);

impl Record {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a column. A repeated column name replaces the earlier value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

/// The two collections read out of one data file
#[derive(Debug, Clone, Default)]
pub struct ParsedRecords {
    pub locations: Vec<Record>,
    pub vehicles: Vec<Record>,
}

/// Turns a pulled file into record collections.
#[async_trait]
pub trait RecordParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<ParsedRecords, AppError>;
}

/// Number of distinct non-empty values of `field` across `records`
pub fn distinct_group_count(records: &[Record], field: &str) -> usize {
    group_breakdown(records, field).len()
}

/// Per-value record counts for `field`, sorted by value. Empty values are skipped.
pub fn group_breakdown(records: &[Record], field: &str) -> BTreeMap<String, usize> {
    let mut groups = BTreeMap::new();
    for value in records.iter().filter_map(|r| r.get(field)) {
        if value.is_empty() {
            continue;
        }
        *groups.entry(value.to_string()).or_insert(0) += 1;
    }
    groups
}
