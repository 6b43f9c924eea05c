use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use serde::{Serialize, Deserialize};
use crate::error::{Result, StoreError};

/// Hash key attribute of the Metroid table.
pub const SUBJECT_ID_KEY: &str = "subject_id";
/// Range (sort) key attribute of the Metroid table.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Composite-key schema of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Numeric partition key attribute.
    pub hash_key: String,
    /// Numeric sort key attribute.
    pub range_key: String,
    pub read_capacity: u64,
    pub write_capacity: u64,
}

impl TableSchema {
    /// Schema keyed by `(subject_id HASH, timestamp RANGE)`.
    pub fn metroid(name: impl Into<String>, read_capacity: u64, write_capacity: u64) -> Self {
        Self {
            name: name.into(),
            hash_key: SUBJECT_ID_KEY.to_string(),
            range_key: TIMESTAMP_KEY.to_string(),
            read_capacity,
            write_capacity,
        }
    }
}

/// Lifecycle state reported by `describe_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Creating,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub schema: TableSchema,
    pub status: TableStatus,
}

/// Checks a table name against the managed store's naming rules:
/// 3 to 255 characters drawn from `[A-Za-z0-9_.-]`.
pub fn validate_table_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| StoreError::InvalidTableName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < 3 || name.len() > 255 {
        return Err(invalid("length must be between 3 and 255"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid("only [A-Za-z0-9_.-] are allowed"));
    }
    Ok(())
}

#[derive(Debug)]
struct CatalogEntry {
    schema: TableSchema,
    /// Remaining `describe` calls before the table reports Active.
    pending_polls: u32,
}

/// Tracks table schemas and their provisioning state.
#[derive(Debug)]
pub struct TableCatalog {
    tables: Arc<RwLock<HashMap<String, CatalogEntry>>>,
}

impl Clone for TableCatalog {
    fn clone(&self) -> Self {
        Self {
            tables: self.tables.clone(),
        }
    }
}

impl Default for TableCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TableCatalog {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a table that stays `Creating` for `activation_polls` describes.
    /// Registering an existing name is a no-op.
    pub async fn create_table(&self, schema: TableSchema, activation_polls: u32) -> Result<()> {
        validate_table_name(&schema.name)?;
        let mut tables = self.tables.write().await;
        tables.entry(schema.name.clone()).or_insert(CatalogEntry {
            schema,
            pending_polls: activation_polls,
        });
        Ok(())
    }

    /// Describes a table, advancing its provisioning by one poll.
    pub async fn describe_table(&self, name: &str) -> Option<TableDescription> {
        let mut tables = self.tables.write().await;
        let entry = tables.get_mut(name)?;
        let status = if entry.pending_polls == 0 {
            TableStatus::Active
        } else {
            entry.pending_polls -= 1;
            TableStatus::Creating
        };
        Some(TableDescription {
            schema: entry.schema.clone(),
            status,
        })
    }

    /// Returns the schema of an active table.
    pub async fn get_table_schema(&self, name: &str) -> Result<TableSchema> {
        let tables = self.tables.read().await;
        tables
            .get(name)
            .filter(|entry| entry.pending_polls == 0)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.remove(name).is_none() {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        Ok(())
    }
}
