/*!
# metroid-store: key-value storage for Metroid event tracking

This crate models the managed key-value store that Metroid records are
persisted to. A table has a composite key (a numeric hash key plus a numeric
range key), accepts batched writes, serves filtered full-table scans page by
page with continuation cursors, and answers sorted queries over one
partition.

## Backends

- [`MemoryBackend`](storage::memory::MemoryBackend): process-local tables
- [`DuckDbBackend`](storage::duckdb::DuckDbBackend): embedded DuckDB, in-memory or on disk

## Usage

```rust,no_run
use metroid_store::storage::memory::MemoryBackend;
use metroid_store::storage::table_manager::TableSchema;
use metroid_store::storage::{ProvisioningOptions, ScanFilter, StorageBackend};
use metroid_store::{Item, WireValue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let backend = MemoryBackend::new();
    let schema = TableSchema::metroid("metroids", 1, 1);
    backend.ensure_table_exists(&schema, &ProvisioningOptions::default()).await?;

    let mut item = Item::new();
    item.insert("subject_id".to_string(), WireValue::number(123));
    item.insert("timestamp".to_string(), WireValue::number(1_700_000_000_000i64));
    item.insert("category".to_string(), WireValue::number(1));
    backend.put_batch("metroids", vec![item]).await?;

    let filter = ScanFilter::new().eq("category", WireValue::number(1));
    let page = backend.scan("metroids", &filter, None).await?;
    println!("found {} items", page.items.len());
    Ok(())
}
```
*/

pub mod error;
pub mod storage;
pub mod wire;

pub use error::{Result, StoreError};
pub use storage::{
    Condition, KeyCondition, ProvisioningOptions, ScanFilter, ScanPage, SortOrder, StorageBackend,
};
pub use storage::table_manager::{TableDescription, TableSchema, TableStatus};
pub use wire::{Item, WireValue};
