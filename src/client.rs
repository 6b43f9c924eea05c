//! The client facade: one handle that provisions the table, runs the batch
//! writer and answers retrieval calls.

use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::Stream;
use metroid_store::storage::duckdb::DuckDbBackend;
use metroid_store::storage::memory::MemoryBackend;
use metroid_store::{ProvisioningOptions, StorageBackend, TableSchema};
use tracing::info;

use crate::config::{BackendSettings, Settings};
use crate::error::{MetroidError, Result};
use crate::metroid::Metroid;
use crate::retriever::Retriever;
use crate::tracker::{FlushStats, Tracker, TrackerOptions};

/// Everything [`MetroidClient::with_backend`] needs besides the backend.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub table: TableSchema,
    pub tracker: TrackerOptions,
    pub provisioning: ProvisioningOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            table: TableSchema::metroid("metroids", 1, 1),
            tracker: TrackerOptions::default(),
            provisioning: ProvisioningOptions::default(),
        }
    }
}

impl From<&Settings> for ClientOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            table: settings.table_schema(),
            tracker: settings.tracker_options(),
            provisioning: settings.provisioning_options(),
        }
    }
}

/// Entry point for tracking and retrieving records.
///
/// Construction waits until the table is active. Records passed to
/// [`track`](Self::track) are persisted in the background; call
/// [`shutdown`](Self::shutdown) to flush whatever is still queued.
pub struct MetroidClient {
    backend: Arc<dyn StorageBackend>,
    table: String,
    tracker: Tracker,
    retriever: Retriever,
}

impl MetroidClient {
    /// Builds the configured backend, provisions the table and starts the
    /// batch writer.
    pub async fn initialize(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let backend = build_backend(&settings.backend)?;
        Self::with_backend(backend, ClientOptions::from(settings)).await
    }

    /// Same as [`initialize`](Self::initialize) with a caller-supplied backend.
    pub async fn with_backend(backend: Arc<dyn StorageBackend>, options: ClientOptions) -> Result<Self> {
        options.tracker.validate()?;
        let table = options.table.name.clone();

        backend
            .ensure_table_exists(&options.table, &options.provisioning)
            .await
            .map_err(|source| MetroidError::TableProvisioning {
                table: table.clone(),
                source,
            })?;

        let mut tracker = Tracker::new(backend.clone(), table.clone(), options.tracker);
        tracker.start();
        let retriever = Retriever::new(backend.clone(), table.clone());
        info!(table = %table, "metroid client ready");

        Ok(Self {
            backend,
            table,
            tracker,
            retriever,
        })
    }

    /// Queues a record; it is written on a later flush.
    pub fn track(&self, metroid: Metroid) {
        self.tracker.track(metroid);
    }

    /// All records of `category` dated between the two local days, inclusive.
    pub async fn retrieve(
        &self,
        category: i64,
        start_date: DateTime<Local>,
        end_date: DateTime<Local>,
    ) -> Result<Vec<Metroid>> {
        self.retriever
            .retrieve_by_type_and_range(category, start_date, end_date)
            .await
    }

    /// Streaming form of [`retrieve`](Self::retrieve).
    pub fn stream(
        &self,
        category: i64,
        start_date: DateTime<Local>,
        end_date: DateTime<Local>,
    ) -> Result<impl Stream<Item = Result<Metroid>> + Send + '_> {
        self.retriever
            .stream_by_type_and_range(category, start_date, end_date)
    }

    /// Up to `limit` of the subject's records, newest first.
    pub async fn retrieve_most_recent_for_subject(&self, subject_id: i64, limit: usize) -> Result<Vec<Metroid>> {
        self.retriever
            .retrieve_most_recent_for_subject(subject_id, limit)
            .await
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn pending_len(&self) -> usize {
        self.tracker.pending_len()
    }

    pub fn stats(&self) -> FlushStats {
        self.tracker.stats()
    }

    /// Stops the batch writer after flushing every queued record.
    pub async fn shutdown(mut self) -> FlushStats {
        self.tracker.shutdown().await;
        let stats = self.tracker.stats();
        info!(
            table = %self.table,
            written = stats.records_written,
            dropped = stats.records_dropped,
            "metroid client shut down"
        );
        stats
    }

    /// Shuts down, then deletes the table and everything in it.
    pub async fn destroy(mut self) -> Result<()> {
        self.tracker.shutdown().await;
        self.backend.delete_table(&self.table).await?;
        info!(table = %self.table, "metroid table deleted");
        Ok(())
    }
}

/// Creates the storage backend named by `[backend] engine`.
pub fn build_backend(settings: &BackendSettings) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match settings.engine.as_str() {
        "memory" => Arc::new(MemoryBackend::new_with_options(&settings.options)?),
        "duckdb" => Arc::new(DuckDbBackend::new_with_options(
            &settings.connection,
            &settings.options,
        )?),
        other => {
            return Err(MetroidError::InvalidConfig {
                reason: format!("unsupported engine '{}'", other),
            })
        }
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_initialize_from_default_settings() {
        let client = assert_ok!(MetroidClient::initialize(&Settings::default()).await);
        assert_eq!(client.table_name(), "metroids");
        assert_eq!(client.pending_len(), 0);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_duckdb() {
        let mut settings = Settings::default();
        settings.backend.engine = "duckdb".to_string();
        let client = assert_ok!(MetroidClient::initialize(&settings).await);
        client.track(Metroid::new(1, 1));
        let stats = client.shutdown().await;
        assert_eq!(stats.records_written, 1);
    }

    #[tokio::test]
    async fn test_invalid_writer_settings_rejected() {
        let mut settings = Settings::default();
        settings.writer.max_batch_size = 0;
        let result = MetroidClient::initialize(&settings).await;
        assert!(matches!(result, Err(MetroidError::InvalidConfig { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisioning_timeout_is_reported() {
        let backend = MemoryBackend::new().with_activation_delay(u32::MAX);
        let options = ClientOptions {
            provisioning: ProvisioningOptions {
                poll_interval: Duration::from_millis(100),
                max_wait: Duration::from_secs(1),
            },
            ..ClientOptions::default()
        };
        let result = MetroidClient::with_backend(Arc::new(backend), options).await;
        assert!(matches!(
            result,
            Err(MetroidError::TableProvisioning { ref table, .. }) if table == "metroids"
        ));
    }

    #[tokio::test]
    async fn test_destroy_drops_table() {
        let backend = MemoryBackend::new();
        let client = MetroidClient::with_backend(Arc::new(backend.clone()), ClientOptions::default())
            .await
            .unwrap();
        client.track(Metroid::new(1, 1));
        assert_ok!(client.destroy().await);
        assert!(backend.describe_table("metroids").await.unwrap().is_none());
    }
}
