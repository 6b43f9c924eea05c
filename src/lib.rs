//! Metroid: buffered event tracking over a key-value store
//!
//! This library records timestamped, categorized events ("metroids") for a
//! subject, writes them in batches on a fixed cadence, and reads them back
//! either by category and date range or as a subject's most recent records.
//!
//! # Example
//!
//! ```rust,no_run
//! use metroid::{Metroid, MetroidClient, Settings};
//! use chrono::Local;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provision the table and start the batch writer
//!     let client = MetroidClient::initialize(&Settings::default()).await?;
//!
//!     // Track an event
//!     let mut metroid = Metroid::new(123, 1);
//!     metroid.set_attribute("SubscriptionLevel", "Full");
//!     metroid.set_attribute("Price", 129.99);
//!     client.track(metroid);
//!
//!     // Give the writer one flush interval
//!     tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
//!
//!     // Everything of category 1 tracked today
//!     let today = Local::now();
//!     let found = client.retrieve(1, today, today).await?;
//!     println!("found {} records", found.len());
//!
//!     // The subject's ten latest records
//!     let recent = client.retrieve_most_recent_for_subject(123, 10).await?;
//!     println!("latest: {:?}", recent.first().map(|m| m.timestamp()));
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metroid;
pub mod retriever;
pub mod tracker;
pub mod tests;

pub use client::{build_backend, ClientOptions, MetroidClient};
pub use config::{ConfigArgs, Settings};
pub use error::{MetroidError, Result};
pub use metroid::{AttributeValue, Metroid};
pub use retriever::Retriever;
pub use tracker::{FlushStats, Tracker, TrackerOptions};
