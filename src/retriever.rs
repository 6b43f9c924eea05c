//! Reading tracked records back out of storage.
//!
//! Range retrieval runs a filtered full-table scan and follows continuation
//! cursors until the backend reports no further pages. Latency and memory
//! grow with the number of rows scanned; callers should not expect bounded
//! response times.

use std::sync::Arc;

use async_stream::try_stream;
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, NaiveTime, Offset, TimeZone};
use futures::{Stream, TryStreamExt};
use metroid_store::storage::table_manager::{SUBJECT_ID_KEY, TIMESTAMP_KEY};
use metroid_store::{Item, KeyCondition, ScanFilter, SortOrder, StorageBackend, WireValue};
use tracing::debug;

use crate::error::{MetroidError, Result};
use crate::metroid::{Metroid, CATEGORY_KEY};

/// Executes type/date-range scans and per-subject recency queries.
#[derive(Clone)]
pub struct Retriever {
    backend: Arc<dyn StorageBackend>,
    table: String,
}

impl Retriever {
    pub fn new(backend: Arc<dyn StorageBackend>, table: impl Into<String>) -> Self {
        Self {
            backend,
            table: table.into(),
        }
    }

    /// Returns every record of `category` whose timestamp falls on a local
    /// calendar day between `start_date` and `end_date`, inclusive.
    ///
    /// Only the dates matter: `start_date` is widened to 00:00:00.000 and
    /// `end_date` to 23:59:59.999 local time. Results keep the backend's
    /// scan order, which is not chronological.
    ///
    /// # Errors
    ///
    /// `InvalidRange` if `start_date > end_date`, before storage is touched.
    /// The first backend failure is returned as-is and partial results are
    /// discarded.
    pub async fn retrieve_by_type_and_range(
        &self,
        category: i64,
        start_date: DateTime<Local>,
        end_date: DateTime<Local>,
    ) -> Result<Vec<Metroid>> {
        let filter = range_filter(category, start_date, end_date)?;

        let items: Vec<Item> = self
            .scan_pages(filter)
            .try_fold(Vec::new(), |mut acc, page| async move {
                acc.extend(page);
                Ok(acc)
            })
            .await?;
        debug!(table = %self.table, category, count = items.len(), "range scan complete");

        items.iter().map(Metroid::from_wire).collect()
    }

    /// Same scan as [`retrieve_by_type_and_range`](Self::retrieve_by_type_and_range),
    /// yielding records page by page instead of collecting them.
    ///
    /// # Errors
    ///
    /// `InvalidRange` if `start_date > end_date`.
    pub fn stream_by_type_and_range(
        &self,
        category: i64,
        start_date: DateTime<Local>,
        end_date: DateTime<Local>,
    ) -> Result<impl Stream<Item = Result<Metroid>> + Send + '_> {
        let filter = range_filter(category, start_date, end_date)?;
        let pages = self.scan_pages(filter);
        Ok(try_stream! {
            futures::pin_mut!(pages);
            while let Some(page) = pages.try_next().await? {
                for item in &page {
                    yield Metroid::from_wire(item)?;
                }
            }
        })
    }

    /// Returns up to `limit` of the subject's records, newest first.
    ///
    /// A single query; a truncated response simply yields fewer records.
    pub async fn retrieve_most_recent_for_subject(&self, subject_id: i64, limit: usize) -> Result<Vec<Metroid>> {
        let key = KeyCondition {
            attribute: SUBJECT_ID_KEY.to_string(),
            value: subject_id,
        };
        let items = self
            .backend
            .query(&self.table, &key, limit, SortOrder::Descending)
            .await?;
        items.iter().map(Metroid::from_wire).collect()
    }

    fn scan_pages(&self, filter: ScanFilter) -> impl Stream<Item = Result<Vec<Item>>> + Send + '_ {
        try_stream! {
            let mut cursor = None;
            let mut pages = 0usize;
            loop {
                let page = self
                    .backend
                    .scan(&self.table, &filter, cursor.take())
                    .await
                    .map_err(MetroidError::from)?;
                pages += 1;
                yield page.items;

                match page.last_evaluated_key {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            debug!(table = %self.table, pages, "scan exhausted");
        }
    }
}

/// Validates the range and builds `category == X AND timestamp BETWEEN [start, end]`.
fn range_filter(category: i64, start_date: DateTime<Local>, end_date: DateTime<Local>) -> Result<ScanFilter> {
    let (start, end) = day_bounds(start_date, end_date)?;
    Ok(ScanFilter::new()
        .eq(CATEGORY_KEY, WireValue::number(category))
        .between(
            TIMESTAMP_KEY,
            WireValue::number(start.timestamp_millis()),
            WireValue::number(end.timestamp_millis()),
        ))
}

/// Widens a date range to whole local days.
///
/// # Errors
///
/// `InvalidRange` if `start_date > end_date`.
pub fn day_bounds(
    start_date: DateTime<Local>,
    end_date: DateTime<Local>,
) -> Result<(DateTime<Local>, DateTime<Local>)> {
    if start_date > end_date {
        return Err(MetroidError::InvalidRange {
            start: start_date,
            end: end_date,
        });
    }

    let start_naive = start_date.date_naive().and_time(NaiveTime::MIN);
    let end_naive = end_date
        .date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .ok_or(MetroidError::InvalidRange {
            start: start_date,
            end: end_date,
        })?;

    let start = Local
        .from_local_datetime(&start_naive)
        .earliest()
        .or_else(|| across_gap(start_naive, start_date.offset().fix()))
        .unwrap_or(start_date);
    let end = Local
        .from_local_datetime(&end_naive)
        .latest()
        .or_else(|| across_gap(end_naive, end_date.offset().fix()))
        .unwrap_or(end_date);
    Ok((start, end))
}

/// Resolves a wall-clock time that a DST transition skipped, using the
/// offset of the reference instant. `None` past the representable range,
/// in which case the bound stays at the reference instant.
fn across_gap(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Local>> {
    let offset = Duration::seconds(i64::from(offset.local_minus_utc()));
    naive
        .checked_sub_signed(offset)
        .map(|utc| Local.from_utc_datetime(&utc))
}
