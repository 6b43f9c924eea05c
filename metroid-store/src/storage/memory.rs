//! In-memory storage backend.
//!
//! Tables live in process memory as key-ordered maps, so scan pages come back
//! in `(hash, range)` order. Useful for tests and for short-lived tracking
//! where durability is not required.
//!
//! ```toml
//! [backend]
//! engine = "memory"
//! options = { scan_page_size = "100" }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::storage::table_manager::{TableCatalog, TableDescription, TableSchema};
use crate::storage::{
    cursor_for, item_key, scan_page_size, KeyCondition, ScanFilter, ScanPage, SortOrder,
    StorageBackend, DEFAULT_SCAN_PAGE_SIZE,
};
use crate::wire::Item;

type Rows = BTreeMap<(i64, i64), Item>;

/// Process-local backend keeping each table in a `BTreeMap`.
#[derive(Clone)]
pub struct MemoryBackend {
    catalog: TableCatalog,
    rows: Arc<RwLock<HashMap<String, Rows>>>,
    page_size: usize,
    activation_polls: u32,
    fail_writes: Arc<AtomicBool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            catalog: TableCatalog::new(),
            rows: Arc::new(RwLock::new(HashMap::new())),
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            activation_polls: 0,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a backend from `[backend] options`.
    pub fn new_with_options(options: &HashMap<String, String>) -> Result<Self> {
        Ok(Self::new().with_page_size(scan_page_size(options)?))
    }

    /// Limits how many items a scan examines per page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Keeps newly created tables in `Creating` for the given number of describes.
    #[must_use]
    pub fn with_activation_delay(mut self, polls: u32) -> Self {
        self.activation_polls = polls;
        self
    }

    /// Makes every subsequent `put_batch` fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of items currently stored in a table.
    pub async fn item_count(&self, table: &str) -> usize {
        self.rows.read().await.get(table).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>> {
        Ok(self.catalog.describe_table(table).await)
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        self.catalog
            .create_table(schema.clone(), self.activation_polls)
            .await?;
        self.rows
            .write()
            .await
            .entry(schema.name.clone())
            .or_default();
        Ok(())
    }

    async fn put_batch(&self, table: &str, items: Vec<Item>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".to_string()));
        }
        let schema = self.catalog.get_table_schema(table).await?;

        // Resolve every key before touching the table so a bad item rejects the whole batch.
        let keyed = items
            .into_iter()
            .map(|item| item_key(&schema, &item).map(|key| (key, item)))
            .collect::<Result<Vec<_>>>()?;

        let mut tables = self.rows.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let count = keyed.len();
        rows.extend(keyed);
        debug!(table, count, "stored batch");
        Ok(())
    }

    async fn scan(&self, table: &str, filter: &ScanFilter, cursor: Option<Item>) -> Result<ScanPage> {
        let schema = self.catalog.get_table_schema(table).await?;
        let start = match cursor {
            Some(cursor) => Bound::Excluded(item_key(&schema, &cursor)?),
            None => Bound::Unbounded,
        };

        let tables = self.rows.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let mut page = ScanPage::default();
        let mut examined = 0;
        let mut last_key = None;
        for (key, item) in rows.range((start, Bound::Unbounded)).take(self.page_size) {
            examined += 1;
            last_key = Some(*key);
            if filter.matches(item) {
                page.items.push(item.clone());
            }
        }
        if examined == self.page_size {
            page.last_evaluated_key = last_key.map(|key| cursor_for(&schema, key));
        }
        Ok(page)
    }

    async fn query(
        &self,
        table: &str,
        key: &KeyCondition,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<Item>> {
        let schema = self.catalog.get_table_schema(table).await?;
        if key.attribute != schema.hash_key {
            return Err(StoreError::Validation(format!(
                "query key '{}' is not the hash key '{}'",
                key.attribute, schema.hash_key
            )));
        }

        let tables = self.rows.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let partition = rows.range((key.value, i64::MIN)..=(key.value, i64::MAX));
        let items = match order {
            SortOrder::Ascending => partition.take(limit).map(|(_, item)| item.clone()).collect(),
            SortOrder::Descending => partition
                .rev()
                .take(limit)
                .map(|(_, item)| item.clone())
                .collect(),
        };
        Ok(items)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.catalog.drop_table(table).await?;
        self.rows.write().await.remove(table);
        Ok(())
    }
}
