//! Storage backends for Metroid item persistence.
//!
//! This module provides two storage backend implementations:
//! - `memory`: process-local tables, used for tests and ephemeral tracking
//! - `duckdb`: embedded DuckDB database, in-memory or file backed
//!
//! Each backend implements the `StorageBackend` trait, which models a managed
//! key-value store with a composite `(hash, range)` key, batched writes,
//! filtered scans with continuation cursors and sorted key queries.

pub mod duckdb;
pub mod memory;
pub mod table_manager;

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::storage::table_manager::{TableDescription, TableSchema, TableStatus};
use crate::wire::{key_value, Item, WireValue};

/// Default number of items a scan examines per page.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 100;

/// A single scan predicate, evaluated after a page has been read.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `attribute == value`.
    Eq { attribute: String, value: WireValue },
    /// `low <= attribute <= high`, numeric only.
    Between {
        attribute: String,
        low: WireValue,
        high: WireValue,
    },
}

/// Conjunction of conditions applied to scanned items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFilter {
    pub conditions: Vec<Condition>,
}

impl ScanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, attribute: impl Into<String>, value: WireValue) -> Self {
        self.conditions.push(Condition::Eq {
            attribute: attribute.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn between(mut self, attribute: impl Into<String>, low: WireValue, high: WireValue) -> Self {
        self.conditions.push(Condition::Between {
            attribute: attribute.into(),
            low,
            high,
        });
        self
    }

    /// Returns true if the item satisfies every condition.
    pub fn matches(&self, item: &Item) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq { attribute, value } => item
                .get(attribute)
                .is_some_and(|actual| compare(actual, value) == Some(Ordering::Equal)),
            Condition::Between {
                attribute,
                low,
                high,
            } => item.get(attribute).is_some_and(|actual| {
                matches!(compare(actual, low), Some(Ordering::Equal | Ordering::Greater))
                    && matches!(compare(actual, high), Some(Ordering::Equal | Ordering::Less))
            }),
        })
    }
}

/// Orders two wire values of the same type. Numbers compare numerically,
/// exactly when both sides are integers.
fn compare(a: &WireValue, b: &WireValue) -> Option<Ordering> {
    match (a, b) {
        (WireValue::N(x), WireValue::N(y)) => match (x.parse::<i64>(), y.parse::<i64>()) {
            (Ok(x), Ok(y)) => Some(x.cmp(&y)),
            _ => x.parse::<f64>().ok()?.partial_cmp(&y.parse::<f64>().ok()?),
        },
        (WireValue::S(x), WireValue::S(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Key equality condition for `query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub attribute: String,
    pub value: i64,
}

/// Sort direction over the range key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One page of scan output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Items on this page that passed the filter.
    pub items: Vec<Item>,
    /// Key of the last examined item; `None` once the table is exhausted.
    pub last_evaluated_key: Option<Item>,
}

/// How long and how often `ensure_table_exists` polls a new table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningOptions {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for ProvisioningOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// Storage backend trait for Metroid items.
///
/// Implementations behave like a managed key-value store:
/// - `put_batch` is all-or-nothing per call
/// - `scan` pages through the table in key order, applying the filter after
///   each page is read, so a page may be empty and still carry a cursor
/// - `query` returns at most `limit` items of one partition, with no cursor
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Describe a table, or `None` if it does not exist.
    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>>;

    /// Create a table. Creating an existing table is a no-op.
    async fn create_table(&self, schema: &TableSchema) -> Result<()>;

    /// Write a batch of items, replacing items with the same key.
    async fn put_batch(&self, table: &str, items: Vec<Item>) -> Result<()>;

    /// Read one page of a filtered full-table scan.
    async fn scan(&self, table: &str, filter: &ScanFilter, cursor: Option<Item>) -> Result<ScanPage>;

    /// Read up to `limit` items whose hash key equals `key`, sorted by range key.
    async fn query(
        &self,
        table: &str,
        key: &KeyCondition,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<Item>>;

    /// Drop a table and all of its items.
    async fn delete_table(&self, table: &str) -> Result<()>;

    /// Create the table if it is missing, then poll until it is active.
    async fn ensure_table_exists(
        &self,
        schema: &TableSchema,
        provisioning: &ProvisioningOptions,
    ) -> Result<()> {
        if self.describe_table(&schema.name).await?.is_none() {
            info!(table = %schema.name, "creating table");
            self.create_table(schema).await?;
        }

        let started = Instant::now();
        loop {
            match self.describe_table(&schema.name).await? {
                Some(description) if description.status == TableStatus::Active => {
                    debug!(table = %schema.name, "table is active");
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(StoreError::TableNotFound(schema.name.clone())),
            }

            let waited = started.elapsed();
            if waited >= provisioning.max_wait {
                warn!(table = %schema.name, ?waited, "table did not become active");
                return Err(StoreError::ProvisioningTimeout {
                    table: schema.name.clone(),
                    waited,
                });
            }
            tokio::time::sleep(provisioning.poll_interval).await;
        }
    }
}

/// Extracts the `(hash, range)` key of an item, rejecting items without one.
pub fn item_key(schema: &TableSchema, item: &Item) -> Result<(i64, i64)> {
    let hash = key_value(item, &schema.hash_key).ok_or_else(|| {
        StoreError::Validation(format!("item is missing numeric key '{}'", schema.hash_key))
    })?;
    let range = key_value(item, &schema.range_key).ok_or_else(|| {
        StoreError::Validation(format!("item is missing numeric key '{}'", schema.range_key))
    })?;
    Ok((hash, range))
}

/// Builds the cursor item for a key.
pub fn cursor_for(schema: &TableSchema, key: (i64, i64)) -> Item {
    let mut cursor = Item::new();
    cursor.insert(schema.hash_key.clone(), WireValue::number(key.0));
    cursor.insert(schema.range_key.clone(), WireValue::number(key.1));
    cursor
}

/// Parses a page size option, falling back to the default.
pub fn scan_page_size(options: &std::collections::HashMap<String, String>) -> Result<usize> {
    match options.get("scan_page_size") {
        None => Ok(DEFAULT_SCAN_PAGE_SIZE),
        Some(raw) => match raw.parse::<usize>() {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(StoreError::Validation(format!("invalid scan_page_size '{}'", raw))),
        },
    }
}
