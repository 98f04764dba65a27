//! Boundary with the image generation side.
//!
//! The store only ever sees finished [`ImageRecord`]s. This module defines
//! what a generator must hand over ([`ImageSource`]), a synthetic generator
//! for demos and tests, and the burst workflow that turns one acquisition
//! request into a series of `put`s.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{compose_record_id, now_millis, Coordinates, ImageRecord, Quality, Region, Resolution, Source};
use crate::ImageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub source: Source,
    pub region: Region,
    pub quality: Quality,
}

/// What a generator produces for one image.
#[derive(Debug, Clone)]
pub struct Capture {
    pub payload: Vec<u8>,
    pub resolution: Resolution,
    pub coordinates: Coordinates,
    pub cloud_cover_percent: f64,
}

pub trait ImageSource {
    /// `index` is the position within the current burst.
    fn capture(&mut self, request: &CaptureRequest, index: usize) -> io::Result<Capture>;
}

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Capture failed: {0}")]
    Capture(#[source] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Produces noise payloads sized from the quality tier's bracket.
///
/// `scale_divisor` shrinks payloads (1 = realistic sizes) so demos do not
/// write hundreds of megabytes.
pub struct SyntheticSource<R: Rng = StdRng> {
    rng: R,
    scale_divisor: u64,
}

impl SyntheticSource<StdRng> {
    pub fn new(scale_divisor: u64) -> Self {
        Self::with_rng(StdRng::from_entropy(), scale_divisor)
    }

    pub fn seeded(seed: u64, scale_divisor: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), scale_divisor)
    }
}

impl<R: Rng> SyntheticSource<R> {
    pub fn with_rng(rng: R, scale_divisor: u64) -> Self {
        Self { rng, scale_divisor: scale_divisor.max(1) }
    }

    fn jitter(&mut self, region: Region) -> Coordinates {
        let (centre, range) = region.centre();
        Coordinates {
            latitude: centre.latitude + (self.rng.gen::<f64>() - 0.5) * range,
            longitude: centre.longitude + (self.rng.gen::<f64>() - 0.5) * range,
        }
    }
}

impl<R: Rng> ImageSource for SyntheticSource<R> {
    fn capture(&mut self, request: &CaptureRequest, _index: usize) -> io::Result<Capture> {
        let (lo, hi) = request.quality.size_bracket();
        let size = (self.rng.gen_range(lo..=hi) / self.scale_divisor).max(1) as usize;

        let mut payload = vec![0u8; size];
        self.rng.fill(&mut payload[..]);

        Ok(Capture {
            payload,
            resolution: request.quality.target_resolution(),
            coordinates: self.jitter(request.region),
            cloud_cover_percent: self.rng.gen_range(0.0..30.0),
        })
    }
}

/// Runs acquisition bursts and hands each capture to the store.
///
/// The sequence counter is shared by every burst run through one acquirer,
/// so ids stay unique even when bursts with identical parameters land in the
/// same millisecond.
#[derive(Debug, Default)]
pub struct Acquirer {
    sequence: AtomicU64,
}

impl Acquirer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures `quality.burst_len()` images and stores each one as soon as it
    /// is produced. Stops at the first failure; images stored before it stay.
    pub fn acquire_burst(
        &self,
        store: &ImageStore,
        source: &mut dyn ImageSource,
        request: &CaptureRequest,
    ) -> Result<Vec<String>, AcquisitionError> {
        let count = request.quality.burst_len();
        info!(
            source = %request.source,
            region = %request.region,
            quality = %request.quality,
            count,
            "acquisition burst"
        );

        let mut stored = Vec::with_capacity(count);
        for index in 0..count {
            let start = Instant::now();
            let capture = source.capture(request, index).map_err(AcquisitionError::Capture)?;
            let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

            let created_ms = now_millis();
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let id = compose_record_id(request.source, request.region, request.quality, created_ms, sequence);

            let record = ImageRecord::new(
                id.clone(),
                request.source,
                request.region,
                request.quality,
                created_ms,
                capture.payload,
            )
            .with_resolution(capture.resolution)
            .with_coordinates(capture.coordinates)
            .with_cloud_cover(capture.cloud_cover_percent)
            .with_processing_time(processing_time_ms);

            store.put(record)?;
            debug!(id = %id, n = index + 1, of = count, "stored image");
            stored.push(id);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_record_id;

    struct FailingSource {
        fail_at: usize,
    }

    impl ImageSource for FailingSource {
        fn capture(&mut self, _request: &CaptureRequest, index: usize) -> io::Result<Capture> {
            if index == self.fail_at {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "fetch timed out"));
            }
            Ok(Capture {
                payload: vec![1; 16],
                resolution: Resolution::new(2, 2),
                coordinates: Coordinates { latitude: 0.0, longitude: 0.0 },
                cloud_cover_percent: 0.0,
            })
        }
    }

    fn request(quality: Quality) -> CaptureRequest {
        CaptureRequest { source: Source::Sentinel, region: Region::Himalaya, quality }
    }

    #[test]
    fn synthetic_captures_respect_bracket_and_region() {
        let mut source = SyntheticSource::seeded(7, 1);
        let req = request(Quality::Preview);
        let (lo, hi) = Quality::Preview.size_bracket();
        let (centre, range) = Region::Himalaya.centre();

        for i in 0..20 {
            let c = source.capture(&req, i).unwrap();
            let len = c.payload.len() as u64;
            assert!(lo <= len && len <= hi, "payload {len} outside [{lo}, {hi}]");
            assert!((c.coordinates.latitude - centre.latitude).abs() <= range / 2.0);
            assert!((c.coordinates.longitude - centre.longitude).abs() <= range / 2.0);
            assert!((0.0..30.0).contains(&c.cloud_cover_percent));
            assert_eq!(c.resolution, Resolution::new(400, 300));
        }
    }

    #[test]
    fn burst_stores_one_record_per_capture() {
        let store = ImageStore::in_memory();
        let acquirer = Acquirer::new();
        let mut source = SyntheticSource::seeded(1, 1024);

        let ids = acquirer.acquire_burst(&store, &mut source, &request(Quality::High)).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(store.len().unwrap(), 5);
        assert_eq!(store.lookup_region(Region::Himalaya).unwrap(), ids);

        let sequences: Vec<u64> = ids.iter().map(|id| parse_record_id(id).unwrap().sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

        let all = store.get_all().unwrap();
        let total: u64 = all.iter().map(|r| r.size_bytes).sum();
        assert_eq!(store.snapshot().unwrap().total_bytes, total);
    }

    #[test]
    fn repeated_bursts_never_collide() {
        let store = ImageStore::in_memory();
        let acquirer = Acquirer::new();
        let mut source = SyntheticSource::seeded(2, 4096);
        for _ in 0..3 {
            acquirer.acquire_burst(&store, &mut source, &request(Quality::Ultra)).unwrap();
        }
        assert_eq!(store.len().unwrap(), 9);
    }

    #[test]
    fn capture_failure_stops_the_burst() {
        let store = ImageStore::in_memory();
        let acquirer = Acquirer::new();
        let mut source = FailingSource { fail_at: 2 };

        let err = acquirer.acquire_burst(&store, &mut source, &request(Quality::Standard)).unwrap_err();
        assert!(matches!(err, AcquisitionError::Capture(_)));
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.snapshot().unwrap().total_bytes, 32);
    }
}
