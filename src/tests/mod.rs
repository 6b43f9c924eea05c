#[cfg(test)]
mod tests {
    use crate::client::{ClientOptions, MetroidClient};
    use crate::config::Settings;
    use crate::error::MetroidError;
    use crate::metroid::Metroid;
    use crate::retriever::Retriever;
    use crate::tracker::{Tracker, TrackerOptions};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Local, Utc};
    use futures::StreamExt;
    use metroid_store::storage::memory::MemoryBackend;
    use metroid_store::storage::table_manager::{TableDescription, TableSchema, TableStatus};
    use metroid_store::storage::{KeyCondition, ScanFilter, ScanPage, SortOrder, StorageBackend};
    use metroid_store::{Item, StoreError, WireValue};
    use mockall::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_test::assert_ok;

    type StoreResult<T> = metroid_store::Result<T>;

    mock! {
        pub Backend {}
        #[async_trait]
        impl StorageBackend for Backend {
            async fn describe_table(&self, table: &str) -> StoreResult<Option<TableDescription>>;
            async fn create_table(&self, schema: &TableSchema) -> StoreResult<()>;
            async fn put_batch(&self, table: &str, items: Vec<Item>) -> StoreResult<()>;
            async fn scan(&self, table: &str, filter: &ScanFilter, cursor: Option<Item>) -> StoreResult<ScanPage>;
            async fn query(
                &self,
                table: &str,
                key: &KeyCondition,
                limit: usize,
                order: SortOrder,
            ) -> StoreResult<Vec<Item>>;
            async fn delete_table(&self, table: &str) -> StoreResult<()>;
        }
    }

    fn active(name: &str) -> Option<TableDescription> {
        Some(TableDescription {
            schema: TableSchema::metroid(name, 1, 1),
            status: TableStatus::Active,
        })
    }

    fn cursor(subject_id: i64, timestamp: i64) -> Item {
        let mut item = Item::new();
        item.insert("subject_id".to_string(), WireValue::number(subject_id));
        item.insert("timestamp".to_string(), WireValue::number(timestamp));
        item
    }

    fn scenario_record() -> Metroid {
        let mut metroid = Metroid::new(123, 1);
        metroid.set_attribute("SubscriptionLevel", "Full");
        metroid.set_attribute("Price", 129.99);
        metroid
    }

    async fn memory_client(backend: &MemoryBackend) -> MetroidClient {
        MetroidClient::with_backend(Arc::new(backend.clone()), ClientOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_batch_is_exactly_max_batch_size() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let recorded = sizes.clone();

        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_put_batch()
            .withf(|table, _| table == "metroids")
            .times(2)
            .returning(move |_, items| {
                recorded.lock().unwrap().push(items.len());
                Ok(())
            });

        let options = TrackerOptions {
            flush_interval: Duration::from_millis(1000),
            max_batch_size: 5,
        };
        let mut tracker = Tracker::new(Arc::new(mock_backend), "metroids", options);
        tracker.start();
        for subject in 0..7 {
            tracker.track(Metroid::new(subject, 1));
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*sizes.lock().unwrap(), vec![5]);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*sizes.lock().unwrap(), vec![5, 2]);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_range_never_touches_backend() {
        let mut mock_backend = MockBackend::new();
        mock_backend.expect_scan().times(0);

        let retriever = Retriever::new(Arc::new(mock_backend), "metroids");
        let end = Local::now();
        let start = end + ChronoDuration::days(1);

        let result = retriever.retrieve_by_type_and_range(1, start, end).await;
        assert!(matches!(result, Err(MetroidError::InvalidRange { .. })));
        assert!(retriever.stream_by_type_and_range(1, start, end).is_err());
    }

    #[tokio::test]
    async fn test_retriever_follows_cursor_through_empty_pages() {
        let now = Utc::now();
        let first = Metroid::with_timestamp(1, 1, now);
        let second = Metroid::with_timestamp(2, 1, now);
        let first_item = first.to_wire();
        let second_item = second.to_wire();
        let mut seq = Sequence::new();

        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_scan()
            .withf(|table, _, cursor| table == "metroids" && cursor.is_none())
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _, _| {
                Ok(ScanPage {
                    items: vec![first_item],
                    last_evaluated_key: Some(cursor(1, 10)),
                })
            });
        mock_backend
            .expect_scan()
            .withf(|_, _, c| c.as_ref() == Some(&cursor(1, 10)))
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_, _, _| {
                Ok(ScanPage {
                    items: vec![],
                    last_evaluated_key: Some(cursor(1, 20)),
                })
            });
        mock_backend
            .expect_scan()
            .withf(|_, _, c| c.as_ref() == Some(&cursor(1, 20)))
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _, _| {
                Ok(ScanPage {
                    items: vec![second_item],
                    last_evaluated_key: None,
                })
            });

        let retriever = Retriever::new(Arc::new(mock_backend), "metroids");
        let today = Local::now();
        let found = retriever.retrieve_by_type_and_range(1, today, today).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].equals(&first));
        assert!(found[1].equals(&second));
    }

    #[tokio::test]
    async fn test_scan_filter_selects_category_and_day() {
        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_scan()
            .withf(|_, filter, _| {
                let now = Utc::now();
                filter.matches(&Metroid::with_timestamp(5, 3, now).to_wire())
                    && !filter.matches(&Metroid::with_timestamp(5, 4, now).to_wire())
                    && !filter.matches(&Metroid::with_timestamp(5, 3, now - ChronoDuration::days(2)).to_wire())
            })
            .times(1)
            .returning(|_, _, _| Ok(ScanPage::default()));

        let retriever = Retriever::new(Arc::new(mock_backend), "metroids");
        let today = Local::now();
        let found = assert_ok!(retriever.retrieve_by_type_and_range(3, today, today).await);
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_discards_partial_results() {
        let item = Metroid::new(1, 1).to_wire();
        let mut seq = Sequence::new();

        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_scan()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _, _| {
                Ok(ScanPage {
                    items: vec![item],
                    last_evaluated_key: Some(cursor(1, 1)),
                })
            });
        mock_backend
            .expect_scan()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_, _, _| Err(StoreError::Unavailable("throttled".to_string())));

        let retriever = Retriever::new(Arc::new(mock_backend), "metroids");
        let today = Local::now();
        let result = retriever.retrieve_by_type_and_range(1, today, today).await;
        assert!(matches!(
            result,
            Err(MetroidError::Backend(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_most_recent_issues_single_descending_query() {
        let latest = Metroid::new(123, 2);
        let item = latest.to_wire();

        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_query()
            .withf(|table, key, limit, order| {
                table == "metroids"
                    && key.attribute == "subject_id"
                    && key.value == 123
                    && *limit == 1
                    && *order == SortOrder::Descending
            })
            .times(1)
            .return_once(move |_, _, _, _| Ok(vec![item]));

        let retriever = Retriever::new(Arc::new(mock_backend), "metroids");
        let found = retriever.retrieve_most_recent_for_subject(123, 1).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].equals(&latest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_table_is_created_then_polled() {
        let describes = Arc::new(AtomicUsize::new(0));
        let counter = describes.clone();

        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_describe_table()
            .returning(move |table| {
                let status = match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => return Ok(None),
                    1 => TableStatus::Creating,
                    _ => TableStatus::Active,
                };
                Ok(Some(TableDescription {
                    schema: TableSchema::metroid(table, 1, 1),
                    status,
                }))
            });
        mock_backend
            .expect_create_table()
            .withf(|schema| schema.name == "metroids" && schema.hash_key == "subject_id")
            .times(1)
            .returning(|_| Ok(()));

        let client = assert_ok!(MetroidClient::with_backend(Arc::new(mock_backend), ClientOptions::default()).await);
        assert_eq!(describes.load(Ordering::SeqCst), 3);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_existing_table_is_not_recreated() {
        let mut mock_backend = MockBackend::new();
        mock_backend
            .expect_describe_table()
            .returning(|table| Ok(active(table)));
        mock_backend.expect_create_table().times(0);

        let client = assert_ok!(MetroidClient::with_backend(Arc::new(mock_backend), ClientOptions::default()).await);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_create_failure_is_reported_as_provisioning_error() {
        let mut mock_backend = MockBackend::new();
        mock_backend.expect_describe_table().returning(|_| Ok(None));
        mock_backend
            .expect_create_table()
            .returning(|_| Err(StoreError::Unavailable("limit exceeded".to_string())));

        let result = MetroidClient::with_backend(Arc::new(mock_backend), ClientOptions::default()).await;
        assert!(matches!(
            result,
            Err(MetroidError::TableProvisioning {
                source: StoreError::Unavailable(_),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_record_is_retrievable_by_range_and_recency() {
        let backend = MemoryBackend::new();
        let client = memory_client(&backend).await;

        let metroid = scenario_record();
        client.track(metroid.clone());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let today = Local::now();
        let by_range = client.retrieve(1, today, today).await.unwrap();
        assert_eq!(by_range.len(), 1);
        assert!(by_range[0].equals(&metroid));

        let recent = client.retrieve_most_recent_for_subject(123, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].equals(&metroid));

        client.destroy().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tracked_records_retrievable_after_interval() {
        let backend = MemoryBackend::new().with_page_size(7);
        let client = memory_client(&backend).await;

        for subject in 0..60 {
            client.track(Metroid::new(subject, 8));
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(client.pending_len(), 0);

        let today = Local::now();
        assert_eq!(client.retrieve(8, today, today).await.unwrap().len(), 60);

        let streamed: Vec<_> = client.stream(8, today, today).unwrap().collect().await;
        assert_eq!(streamed.len(), 60);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_most_recent_returns_latest_record() {
        let backend = MemoryBackend::new();
        let client = memory_client(&backend).await;

        let now = Utc::now();
        let older = Metroid::with_timestamp(77, 1, now - ChronoDuration::minutes(5));
        let latest = Metroid::with_timestamp(77, 2, now);
        let oldest = Metroid::with_timestamp(77, 1, now - ChronoDuration::hours(1));
        client.track(older);
        client.track(latest.clone());
        client.track(oldest);
        let stats = client.shutdown().await;
        assert_eq!(stats.records_written, 3);

        let client = memory_client(&backend).await;
        let found = client.retrieve_most_recent_for_subject(77, 1).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].equals(&latest));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_retrieval_after_destroy_fails() {
        let backend = MemoryBackend::new();
        let client = memory_client(&backend).await;
        client.destroy().await.unwrap();

        let retriever = Retriever::new(Arc::new(backend), "metroids");
        let result = retriever.retrieve_most_recent_for_subject(1, 1).await;
        assert!(matches!(
            result,
            Err(MetroidError::Backend(StoreError::TableNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_duckdb_file_persists_across_clients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metroids.db");

        let mut settings = Settings::default();
        settings.backend.engine = "duckdb".to_string();
        settings.backend.connection = path.to_string_lossy().into_owned();

        let client = MetroidClient::initialize(&settings).await.unwrap();
        let metroid = scenario_record();
        client.track(metroid.clone());
        client.shutdown().await;

        let client = MetroidClient::initialize(&settings).await.unwrap();
        let today = Local::now();
        let found = client.retrieve(1, today, today).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].equals(&metroid));
        client.shutdown().await;
    }
}
