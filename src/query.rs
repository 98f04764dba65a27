//! Read-side projections over the store.
//!
//! Each view resolves index ids against the table under one read lock, so it
//! never mixes pre- and post-transaction state. Nothing is cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::model::{Coordinates, ImageRecord, Quality, Region, Resolution, Source};
use crate::ImageStore;

/// Payload-free view of a record for presentation.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub id: String,
    pub source: Source,
    pub region: Region,
    pub quality: Quality,
    pub captured_at: u64,
    pub coordinates: Coordinates,
    pub cloud_cover_percent: f64,
    pub resolution: String,
    pub size_bytes: u64,
    pub processing_time_ms: f64,
}

impl From<&ImageRecord> for RecordSummary {
    fn from(r: &ImageRecord) -> Self {
        Self {
            id: r.id.clone(),
            source: r.source,
            region: r.region,
            quality: r.quality,
            captured_at: r.captured_at,
            coordinates: r.coordinates,
            cloud_cover_percent: r.cloud_cover_percent,
            resolution: r.resolution.to_string(),
            size_bytes: r.size_bytes,
            processing_time_ms: r.processing_time_ms,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionTally {
    pub records: usize,
    pub bytes: u64,
}

impl ImageStore {
    pub fn records_for_region(&self, region: Region) -> Result<Vec<Arc<ImageRecord>>> {
        let state = self.read_state()?;
        Ok(state.resolve(state.indexes.region.ids(region)))
    }

    pub fn records_for_source(&self, source: Source) -> Result<Vec<Arc<ImageRecord>>> {
        let state = self.read_state()?;
        Ok(state.resolve(state.indexes.source.ids(source)))
    }

    pub fn records_in_bucket(&self, bucket: u64) -> Result<Vec<Arc<ImageRecord>>> {
        let state = self.read_state()?;
        Ok(state.resolve(state.indexes.time_bucket.ids(bucket)))
    }

    /// Records captured in `[from, to]` (ms), oldest first.
    pub fn records_between(&self, from: u64, to: u64) -> Result<Vec<Arc<ImageRecord>>> {
        if from > to {
            return Ok(Vec::new());
        }
        let state = self.read_state()?;
        let buckets = state.indexes.bucket_of(from)..=state.indexes.bucket_of(to);
        let ids = state.indexes.time_bucket.range(buckets).flat_map(|(_, ids)| ids);

        let mut hits: Vec<Arc<ImageRecord>> = state
            .resolve(ids)
            .into_iter()
            .filter(|r| (from..=to).contains(&r.captured_at))
            .collect();
        // Stable: equal timestamps keep bucket (insertion) order
        hits.sort_by_key(|r| r.captured_at);
        Ok(hits)
    }

    /// All records ordered by capture time; ties keep insertion order.
    pub fn chronological(&self) -> Result<Vec<Arc<ImageRecord>>> {
        let mut all = {
            let state = self.read_state()?;
            state.resolve(&state.order)
        };
        all.sort_by_key(|r| r.captured_at);
        Ok(all)
    }

    pub fn records_with_resolution(&self, resolution: Resolution) -> Result<Vec<Arc<ImageRecord>>> {
        let state = self.read_state()?;
        Ok(state
            .resolve(&state.order)
            .into_iter()
            .filter(|r| r.resolution == resolution)
            .collect())
    }

    /// Count and bytes per region that currently has records.
    pub fn region_breakdown(&self) -> Result<BTreeMap<Region, RegionTally>> {
        let state = self.read_state()?;
        let mut out = BTreeMap::new();
        for &region in state.indexes.region.keys() {
            let records = state.resolve(state.indexes.region.ids(region));
            out.insert(
                region,
                RegionTally {
                    records: records.len(),
                    bytes: records.iter().map(|r| r.size_bytes).sum(),
                },
            );
        }
        Ok(out)
    }

    /// Untimed payload-free listing in insertion order.
    pub fn summaries(&self) -> Result<Vec<RecordSummary>> {
        let state = self.read_state()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|r| RecordSummary::from(r.as_ref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, source: Source, region: Region, ts: u64, size: usize) -> ImageRecord {
        ImageRecord::new(id, source, region, Quality::Preview, ts, vec![9; size])
    }

    fn ids(records: &[Arc<ImageRecord>]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    fn seeded() -> ImageStore {
        let store = ImageStore::in_memory();
        store.put(rec("a", Source::Landsat, Region::Amazon, 7_200_000, 100)).unwrap();
        store.put(rec("b", Source::Sentinel, Region::Sahara, 1_000, 200)).unwrap();
        store.put(rec("c", Source::Landsat, Region::Amazon, 3_600_500, 300)).unwrap();
        store
    }

    #[test]
    fn region_and_source_views() {
        let store = seeded();
        assert_eq!(ids(&store.records_for_region(Region::Amazon).unwrap()), vec!["a", "c"]);
        assert_eq!(ids(&store.records_for_source(Source::Sentinel).unwrap()), vec!["b"]);
        assert!(store.records_for_region(Region::Arctic).unwrap().is_empty());
    }

    #[test]
    fn time_views() {
        let store = seeded();
        assert_eq!(ids(&store.chronological().unwrap()), vec!["b", "c", "a"]);
        assert_eq!(ids(&store.records_between(1_000, 3_600_500).unwrap()), vec!["b", "c"]);
        assert_eq!(ids(&store.records_between(1_001, 3_600_499).unwrap()), Vec::<&str>::new());
        assert!(store.records_between(10, 1).unwrap().is_empty());
        assert_eq!(ids(&store.records_in_bucket(1).unwrap()), vec!["c"]);
    }

    #[test]
    fn breakdown_and_summaries() {
        let store = seeded();
        let breakdown = store.region_breakdown().unwrap();
        assert_eq!(breakdown[&Region::Amazon], RegionTally { records: 2, bytes: 400 });
        assert_eq!(breakdown[&Region::Sahara], RegionTally { records: 1, bytes: 200 });
        assert!(!breakdown.contains_key(&Region::Arctic));

        let summaries = store.summaries().unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].resolution, "400x300");

        assert_eq!(store.records_with_resolution(Resolution::new(400, 300)).unwrap().len(), 3);
        assert!(store.records_with_resolution(Resolution::new(1, 1)).unwrap().is_empty());
    }

    #[test]
    fn projections_are_not_timed() {
        let store = seeded();
        store.chronological().unwrap();
        store.summaries().unwrap();
        assert_eq!(store.snapshot().unwrap().latency_samples, 0);
    }
}
