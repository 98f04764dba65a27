//! Skyvault: a local persistent store for generated satellite imagery.
//!
//! Records are kept in a primary table keyed by id, filed under three
//! secondary indexes (region, source, capture-time bucket), and counted by a
//! metrics aggregator. Every mutation is one transaction under a single
//! write lock: the log append, the table, all three indexes and the byte
//! counter change together or not at all.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod query;
pub mod storage;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Instant;

use tracing::{debug, info, warn};

pub use crate::config::StoreConfig;
pub use crate::error::{Result, StoreError};
pub use crate::metrics::MetricsSnapshot;
pub use crate::model::{Coordinates, ImageRecord, Quality, Region, Resolution, Source};

use crate::filter::KeyFilter;
use crate::index::IndexSet;
use crate::metrics::MetricsAggregator;
use crate::storage::Segment;

/// Everything a transaction touches, guarded as one unit.
pub(crate) struct StoreState {
    pub(crate) records: HashMap<String, Arc<ImageRecord>>,
    /// Insertion order of live ids; gives `get_all` a stable order
    pub(crate) order: Vec<String>,
    pub(crate) indexes: IndexSet,
    filter: KeyFilter,
    segment: Option<Segment>,
}

impl StoreState {
    fn empty(config: &StoreConfig) -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            indexes: IndexSet::new(config.time_bucket_secs),
            filter: KeyFilter::new(config.filter_expected_items, config.filter_false_positive_rate),
            segment: None,
        }
    }

    fn commit_insert(&mut self, record: Arc<ImageRecord>) {
        self.indexes.insert(&record);
        self.filter.insert(&record.id);
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    fn commit_clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.indexes.clear();
        self.filter.clear();
    }

    pub(crate) fn resolve<'a, I>(&self, ids: I) -> Vec<Arc<ImageRecord>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        ids.into_iter().filter_map(|id| self.records.get(id).cloned()).collect()
    }

    pub(crate) fn uncompressed_bytes(&self) -> u64 {
        self.records.values().map(|r| r.uncompressed_bytes()).sum()
    }
}

pub struct ImageStore {
    state: RwLock<StoreState>,
    metrics: MetricsAggregator,
    warning_bytes: u64,
}

impl fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ImageStore");
        if let Ok(state) = self.state.read() {
            d.field("record_count", &state.records.len());
            d.field("durable", &state.segment.is_some());
        }
        d.field("total_bytes", &self.metrics.total_bytes()).finish()
    }
}

impl ImageStore {
    /// Opens a store per `config`, replaying the log if one is configured.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let mut state = StoreState::empty(config);
        let metrics = MetricsAggregator::new();

        if let Some(path) = &config.data_path {
            let mut segment = Segment::open(path, config.strict_durability)?;
            let replayed = segment.replay()?;
            let count = replayed.len();

            for (offset, record) in replayed {
                if state.records.contains_key(&record.id) {
                    return Err(StoreError::Corrupt {
                        offset,
                        reason: format!("duplicate id {} in log", record.id),
                    });
                }
                metrics.record_insert(record.size_bytes);
                state.commit_insert(Arc::new(record));
            }

            info!(
                path = %path.display(),
                records = count,
                total_bytes = metrics.total_bytes(),
                "image store opened"
            );
            state.segment = Some(segment);
        } else {
            info!("in-memory image store opened");
        }

        Ok(Self {
            state: RwLock::new(state),
            metrics,
            warning_bytes: config.storage_warning_bytes,
        })
    }

    /// In-memory store with default tuning.
    pub fn in_memory() -> Self {
        let config = StoreConfig::in_memory();
        Self {
            state: RwLock::new(StoreState::empty(&config)),
            metrics: MetricsAggregator::new(),
            warning_bytes: config.storage_warning_bytes,
        }
    }

    /// Inserts a record.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the id is live; a log write
    /// failure surfaces as [`StoreError::Persistence`]. Either way nothing
    /// changes.
    pub fn put(&self, record: ImageRecord) -> Result<()> {
        record.validate()?;

        let mut guard = self.state.write()?;
        let state = &mut *guard;

        if state.records.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(record.id));
        }
        if let Some(segment) = state.segment.as_mut() {
            segment.append(&record)?;
        }

        let size = record.size_bytes;
        let before = self.metrics.total_bytes();
        debug!(id = %record.id, region = %record.region, source = %record.source, size, "put");

        state.commit_insert(Arc::new(record));
        self.metrics.record_insert(size);

        let after = self.metrics.total_bytes();
        if before <= self.warning_bytes && after > self.warning_bytes {
            warn!(total_bytes = after, threshold = self.warning_bytes, "storage above warning threshold");
        }
        Ok(())
    }

    /// Every live record in insertion order. Timed: each call adds one
    /// retrieval-latency sample.
    pub fn get_all(&self) -> Result<Vec<Arc<ImageRecord>>> {
        let start = Instant::now();
        let records = {
            let state = self.state.read()?;
            state.resolve(&state.order)
        };
        self.metrics
            .record_retrieval_latency(start.elapsed().as_secs_f64() * 1000.0);
        Ok(records)
    }

    /// Absence is `Ok(None)`, not an error.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Arc<ImageRecord>>> {
        let state = self.state.read()?;
        if !state.filter.might_contain(id) {
            return Ok(None);
        }
        Ok(state.records.get(id).cloned())
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get_by_id(id)?.is_some())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every record and index entry and zeroes `total_bytes`.
    /// Latency history is kept. All-or-nothing: a failed log reset leaves the
    /// store untouched.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.state.write()?;
        let state = &mut *guard;

        if let Some(segment) = state.segment.as_mut() {
            segment.reset()?;
        }

        let dropped = state.records.len();
        state.commit_clear();
        self.metrics.reset_storage();

        info!(records = dropped, "image store cleared");
        Ok(())
    }

    /// Aggregate statistics. The uncompressed estimate is recomputed from the
    /// live set on every call.
    pub fn snapshot(&self) -> Result<MetricsSnapshot> {
        let state = self.state.read()?;
        Ok(self.metrics.snapshot(
            state.records.len(),
            state.uncompressed_bytes(),
            self.warning_bytes,
        ))
    }

    pub fn lookup_region(&self, region: Region) -> Result<Vec<String>> {
        Ok(self.state.read()?.indexes.region.lookup(region))
    }

    pub fn lookup_source(&self, source: Source) -> Result<Vec<String>> {
        Ok(self.state.read()?.indexes.source.lookup(source))
    }

    pub fn lookup_time_bucket(&self, bucket: u64) -> Result<Vec<String>> {
        Ok(self.state.read()?.indexes.time_bucket.lookup(bucket))
    }

    pub fn time_bucket_of(&self, captured_at: u64) -> Result<u64> {
        Ok(self.state.read()?.indexes.bucket_of(captured_at))
    }

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        Ok(self.state.read()?)
    }
}
