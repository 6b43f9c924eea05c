//! DuckDB storage backend implementation.
//!
//! Each logical table becomes a DuckDB table holding the composite key in
//! two `BIGINT` columns and the full item as JSON. Key attribute names and
//! provisioned capacities are recorded in a `metroid_catalog` table so an
//! existing database file can be reopened without extra configuration.
//!
//! # Configuration
//!
//! ```toml
//! [backend]
//! engine = "duckdb"
//! connection = ":memory:"  # Use ":memory:" for in-memory or file path
//! options = {
//!     threads = "4",          # Optional: Number of threads
//!     scan_page_size = "100"  # Optional: Items examined per scan page
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::{params, Config, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::storage::table_manager::{
    validate_table_name, TableDescription, TableSchema, TableStatus,
};
use crate::storage::{
    cursor_for, item_key, scan_page_size, KeyCondition, ScanFilter, ScanPage, SortOrder,
    StorageBackend,
};
use crate::wire::Item;

const CATALOG_TABLE: &str = "metroid_catalog";

/// DuckDB-based storage backend for Metroid items.
#[derive(Clone)]
pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl DuckDbBackend {
    /// Opens (or creates) a database and prepares the catalog table.
    pub fn new_with_options(connection_string: &str, options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(threads) = options.get("threads") {
            let threads = threads
                .parse::<i64>()
                .map_err(|_| StoreError::Validation(format!("invalid threads '{}'", threads)))?;
            config = config.threads(threads)?;
        }

        let conn = Connection::open_with_flags(connection_string, config)?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (
                name VARCHAR PRIMARY KEY,
                hash_key VARCHAR NOT NULL,
                range_key VARCHAR NOT NULL,
                read_capacity BIGINT NOT NULL,
                write_capacity BIGINT NOT NULL
            );
            "#
        ))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: scan_page_size(options)?,
        })
    }

    /// Creates a new DuckDB backend with an in-memory database.
    pub fn new_in_memory() -> Result<Self> {
        Self::new_with_options(":memory:", &HashMap::new())
    }

    /// Limits how many items a scan examines per page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn load_schema(conn: &Connection, table: &str) -> Result<Option<TableSchema>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT hash_key, range_key, read_capacity, write_capacity FROM {CATALOG_TABLE} WHERE name = ?"
        ))?;
        let mut rows = stmt.query(params![table])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let read_capacity: i64 = row.get(2)?;
        let write_capacity: i64 = row.get(3)?;
        Ok(Some(TableSchema {
            name: table.to_string(),
            hash_key: row.get(0)?,
            range_key: row.get(1)?,
            read_capacity: u64::try_from(read_capacity).unwrap_or_default(),
            write_capacity: u64::try_from(write_capacity).unwrap_or_default(),
        }))
    }

    fn require_schema(conn: &Connection, table: &str) -> Result<TableSchema> {
        Self::load_schema(conn, table)?.ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn decode(json: &str) -> Result<Item> {
        Ok(serde_json::from_str(json)?)
    }
}

fn capacity(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::Validation(format!("capacity {} is too large", value)))
}

#[async_trait]
impl StorageBackend for DuckDbBackend {
    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>> {
        let conn = self.conn.lock().await;
        // DuckDB DDL is synchronous: a catalogued table is always active.
        Ok(Self::load_schema(&conn, table)?.map(|schema| TableDescription {
            schema,
            status: TableStatus::Active,
        }))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        validate_table_name(&schema.name)?;
        if schema.name.eq_ignore_ascii_case(CATALOG_TABLE) {
            return Err(StoreError::InvalidTableName {
                name: schema.name.clone(),
                reason: "name is reserved".to_string(),
            });
        }

        let conn = self.conn.lock().await;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                hash_key BIGINT NOT NULL,
                range_key BIGINT NOT NULL,
                item VARCHAR NOT NULL,
                PRIMARY KEY (hash_key, range_key)
            );
            "#,
            schema.name
        ))?;
        conn.execute(
            &format!(
                "INSERT INTO {CATALOG_TABLE} (name, hash_key, range_key, read_capacity, write_capacity) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING"
            ),
            params![
                schema.name,
                schema.hash_key,
                schema.range_key,
                capacity(schema.read_capacity)?,
                capacity(schema.write_capacity)?,
            ],
        )?;
        Ok(())
    }

    async fn put_batch(&self, table: &str, items: Vec<Item>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        let schema = Self::require_schema(&conn, table)?;

        // Later items win when a batch repeats a key.
        let mut rows = BTreeMap::new();
        for item in &items {
            rows.insert(item_key(&schema, item)?, serde_json::to_string(item)?);
        }

        conn.execute("BEGIN TRANSACTION", params![])?;
        let written = (|| -> std::result::Result<(), duckdb::Error> {
            let mut stmt = conn.prepare(&format!(
                "INSERT OR REPLACE INTO \"{}\" (hash_key, range_key, item) VALUES (?, ?, ?)",
                table
            ))?;
            for ((hash, range), json) in &rows {
                stmt.execute(params![hash, range, json])?;
            }
            Ok(())
        })();

        match written {
            Ok(()) => {
                conn.execute("COMMIT", params![])?;
                debug!(table, count = rows.len(), "stored batch");
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", params![])?;
                Err(e.into())
            }
        }
    }

    async fn scan(&self, table: &str, filter: &ScanFilter, cursor: Option<Item>) -> Result<ScanPage> {
        let conn = self.conn.lock().await;
        let schema = Self::require_schema(&conn, table)?;
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);

        let mut examined = Vec::with_capacity(self.page_size);
        match cursor {
            Some(cursor) => {
                let (hash, range) = item_key(&schema, &cursor)?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT hash_key, range_key, item FROM \"{}\" \
                     WHERE hash_key > ? OR (hash_key = ? AND range_key > ?) \
                     ORDER BY hash_key, range_key LIMIT ?",
                    table
                ))?;
                let mut rows = stmt.query(params![hash, hash, range, limit])?;
                while let Some(row) = rows.next()? {
                    examined.push(((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?), row.get::<_, String>(2)?));
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT hash_key, range_key, item FROM \"{}\" ORDER BY hash_key, range_key LIMIT ?",
                    table
                ))?;
                let mut rows = stmt.query(params![limit])?;
                while let Some(row) = rows.next()? {
                    examined.push(((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?), row.get::<_, String>(2)?));
                }
            }
        }

        let mut page = ScanPage::default();
        if examined.len() == self.page_size {
            page.last_evaluated_key = examined.last().map(|(key, _)| cursor_for(&schema, *key));
        }
        for (_, json) in &examined {
            let item = Self::decode(json)?;
            if filter.matches(&item) {
                page.items.push(item);
            }
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
        let conn = self.conn.lock().await;
        let schema = Self::require_schema(&conn, table)?;
        if key.attribute != schema.hash_key {
            return Err(StoreError::Validation(format!(
                "query key '{}' is not the hash key '{}'",
                key.attribute, schema.hash_key
            )));
        }

        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT item FROM \"{}\" WHERE hash_key = ? ORDER BY range_key {} LIMIT ?",
            table, direction
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![key.value, limit])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Self::decode(&row.get::<_, String>(0)?)?);
        }
        Ok(items)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::require_schema(&conn, table)?;
        conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table), params![])?;
        conn.execute(&format!("DELETE FROM {CATALOG_TABLE} WHERE name = ?"), params![table])?;
        Ok(())
    }
}
