use std::collections::BTreeMap;
use std::ops::RangeBounds;

use crate::model::{ImageRecord, Region, Source};

/// One secondary index: dimension value -> ids carrying it, in insertion order.
///
/// Keys with no ids are pruned, so `keys()` only ever yields live values.
#[derive(Debug, Clone)]
pub struct SecondaryIndex<K: Ord> {
    entries: BTreeMap<K, Vec<String>>,
}

impl<K: Ord> Default for SecondaryIndex<K> {
    fn default() -> Self {
        Self { entries: BTreeMap::new() }
    }
}

impl<K: Ord + Copy> SecondaryIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, id: &str) {
        self.entries.entry(key).or_default().push(id.to_string());
    }

    /// Returns false if `id` was not filed under `key`.
    pub fn remove(&mut self, key: K, id: &str) -> bool {
        let Some(ids) = self.entries.get_mut(&key) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|x| x == id) else {
            return false;
        };
        ids.remove(pos);
        if ids.is_empty() {
            self.entries.remove(&key);
        }
        true
    }

    /// Unknown values yield an empty sequence.
    pub fn lookup(&self, key: K) -> Vec<String> {
        self.entries.get(&key).cloned().unwrap_or_default()
    }

    pub fn ids(&self, key: K) -> &[String] {
        self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn range<R: RangeBounds<K>>(&self, range: R) -> impl Iterator<Item = (&K, &Vec<String>)> {
        self.entries.range(range)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    #[cfg(test)]
    pub fn id_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The three secondary indexes kept in lockstep with the primary table.
#[derive(Debug, Clone)]
pub struct IndexSet {
    pub region: SecondaryIndex<Region>,
    pub source: SecondaryIndex<Source>,
    pub time_bucket: SecondaryIndex<u64>,
    bucket_ms: u64,
}

impl IndexSet {
    pub fn new(bucket_secs: u64) -> Self {
        Self {
            region: SecondaryIndex::new(),
            source: SecondaryIndex::new(),
            time_bucket: SecondaryIndex::new(),
            bucket_ms: bucket_secs.max(1).saturating_mul(1000),
        }
    }

    pub fn bucket_of(&self, captured_at: u64) -> u64 {
        captured_at / self.bucket_ms
    }

    pub fn insert(&mut self, record: &ImageRecord) {
        let bucket = self.bucket_of(record.captured_at);
        self.region.add(record.region, &record.id);
        self.source.add(record.source, &record.id);
        self.time_bucket.add(bucket, &record.id);
    }

    pub fn remove(&mut self, record: &ImageRecord) {
        let bucket = self.bucket_of(record.captured_at);
        self.region.remove(record.region, &record.id);
        self.source.remove(record.source, &record.id);
        self.time_bucket.remove(bucket, &record.id);
    }

    pub fn clear(&mut self) {
        self.region.clear();
        self.source.clear();
        self.time_bucket.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Quality;

    fn rec(id: &str, region: Region, source: Source, ts: u64) -> ImageRecord {
        ImageRecord::new(id, source, region, Quality::Preview, ts, vec![0; 4])
    }

    #[test]
    fn lookup_preserves_insertion_order() {
        let mut idx = SecondaryIndex::new();
        idx.add(Region::Amazon, "a");
        idx.add(Region::Sahara, "b");
        idx.add(Region::Amazon, "c");
        assert_eq!(idx.lookup(Region::Amazon), vec!["a", "c"]);
        assert_eq!(idx.lookup(Region::Sahara), vec!["b"]);
        assert!(idx.lookup(Region::Arctic).is_empty());
    }

    #[test]
    fn remove_prunes_empty_keys() {
        let mut idx = SecondaryIndex::new();
        idx.add(7u64, "a");
        assert!(!idx.remove(7, "zzz"));
        assert!(!idx.remove(8, "a"));
        assert!(idx.remove(7, "a"));
        assert_eq!(idx.keys().count(), 0);
    }

    #[test]
    fn index_set_files_every_dimension() {
        let mut set = IndexSet::new(60);
        let r = rec("x", Region::Himalaya, Source::Modis, 125_000);
        set.insert(&r);

        assert_eq!(set.bucket_of(125_000), 2);
        assert_eq!(set.region.lookup(Region::Himalaya), vec!["x"]);
        assert_eq!(set.source.lookup(Source::Modis), vec!["x"]);
        assert_eq!(set.time_bucket.lookup(2), vec!["x"]);

        set.remove(&r);
        assert_eq!(set.region.id_count(), 0);
        assert_eq!(set.source.id_count(), 0);
        assert_eq!(set.time_bucket.id_count(), 0);
    }

    #[test]
    fn bucket_range_scan() {
        let mut set = IndexSet::new(1);
        set.insert(&rec("early", Region::Amazon, Source::Landsat, 500));
        set.insert(&rec("mid", Region::Amazon, Source::Landsat, 2_500));
        set.insert(&rec("late", Region::Amazon, Source::Landsat, 9_000));

        let hits: Vec<&String> = set.time_bucket.range(1..=3).flat_map(|(_, ids)| ids).collect();
        assert_eq!(hits, vec!["mid"]);
    }
}
