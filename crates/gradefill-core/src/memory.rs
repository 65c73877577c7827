use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::source::FieldAccessError;
use crate::source::RecordSource;

/// A single field write, in the order it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub position: usize,
    pub field: String,
    pub value: String,
    pub at: Instant,
}

/// Record source over rows held in memory.
///
/// Every write is also appended to a journal, which is how dry runs report
/// what a real run would change.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Vec<BTreeMap<String, String>>,
    current: Option<usize>,
    journal: Vec<WriteEvent>,
}

impl MemorySource {
    pub fn new(rows: Vec<BTreeMap<String, String>>) -> Self {
        Self {
            rows,
            current: None,
            journal: vec![],
        }
    }

    /// Rows that only carry a `Name` field.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| BTreeMap::from([(String::from("Name"), name.into())]))
                .collect(),
        )
    }

    pub fn rows(&self) -> &[BTreeMap<String, String>] {
        &self.rows
    }

    pub fn journal(&self) -> &[WriteEvent] {
        &self.journal
    }

    fn current_index(&self) -> Result<usize, FieldAccessError> {
        self.current
            .filter(|idx| *idx < self.rows.len())
            .ok_or(FieldAccessError::NoCurrentRecord)
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn rewind(&mut self) -> Result<(), FieldAccessError> {
        self.current = None;
        Ok(())
    }

    async fn advance(&mut self) -> Result<bool, FieldAccessError> {
        let next = self.current.map_or(0, |idx| idx + 1).min(self.rows.len());
        self.current = Some(next);
        Ok(next < self.rows.len())
    }

    async fn field(&self, name: &str) -> Result<String, FieldAccessError> {
        let idx = self.current_index()?;
        self.rows[idx]
            .get(name)
            .cloned()
            .ok_or_else(|| FieldAccessError::MissingField {
                field: name.to_string(),
            })
    }

    async fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldAccessError> {
        let idx = self.current_index()?;
        self.rows[idx].insert(name.to_string(), value.to_string());
        self.journal.push(WriteEvent {
            position: idx,
            field: name.to_string(),
            value: value.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}
