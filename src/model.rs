use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Bytes per pixel assumed for the uncompressed RGB estimate.
pub const RGB_BYTES_PER_PIXEL: u64 = 3;

/// Provenance of an image.
#[derive(
    Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize,
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[archive(check_bytes)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    #[default]
    Landsat,
    Sentinel,
    Modis,
    Worldview,
    Planet,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Landsat,
        Source::Sentinel,
        Source::Modis,
        Source::Worldview,
        Source::Planet,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Source::Landsat => "landsat",
            Source::Sentinel => "sentinel",
            Source::Modis => "modis",
            Source::Worldview => "worldview",
            Source::Planet => "planet",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Unknown labels fall back to [`Source::default`].
    pub fn from_label_or_default(label: &str) -> Self {
        Self::from_label(label).unwrap_or_default()
    }
}

/// Geographic area an image covers.
#[derive(
    Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize,
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[archive(check_bytes)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    #[default]
    Amazon,
    Sahara,
    Himalaya,
    Arctic,
    GreatBarrier,
}

impl Region {
    pub const ALL: [Region; 5] = [
        Region::Amazon,
        Region::Sahara,
        Region::Himalaya,
        Region::Arctic,
        Region::GreatBarrier,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Region::Amazon => "amazon",
            Region::Sahara => "sahara",
            Region::Himalaya => "himalaya",
            Region::Arctic => "arctic",
            Region::GreatBarrier => "great-barrier",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Unknown labels fall back to [`Region::default`] (Amazon).
    pub fn from_label_or_default(label: &str) -> Self {
        Self::from_label(label).unwrap_or_default()
    }

    /// Reference centre and the full width of the jitter window, in degrees.
    pub fn centre(&self) -> (Coordinates, f64) {
        let (latitude, longitude, range) = match self {
            Region::Amazon => (-3.4653, -62.2159, 10.0),
            Region::Sahara => (23.8859, 2.5085, 15.0),
            Region::Himalaya => (27.9881, 86.9250, 5.0),
            Region::Arctic => (84.0000, -72.0000, 20.0),
            Region::GreatBarrier => (-18.2871, 147.6992, 3.0),
        };
        (Coordinates { latitude, longitude }, range)
    }
}

/// Capture tier. Each tier fixes a target resolution and a nominal payload size.
#[derive(
    Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize,
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[archive(check_bytes)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    Preview,
    #[default]
    Standard,
    High,
    Ultra,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Preview, Quality::Standard, Quality::High, Quality::Ultra];

    pub fn label(&self) -> &'static str {
        match self {
            Quality::Preview => "preview",
            Quality::Standard => "standard",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.label().eq_ignore_ascii_case(label.trim()))
    }

    pub fn from_label_or_default(label: &str) -> Self {
        Self::from_label(label).unwrap_or_default()
    }

    pub fn target_resolution(&self) -> Resolution {
        match self {
            Quality::Preview => Resolution::new(400, 300),
            Quality::Standard => Resolution::new(800, 600),
            Quality::High => Resolution::new(1600, 1200),
            Quality::Ultra => Resolution::new(3200, 2400),
        }
    }

    /// Nominal encoded size of one image at this tier.
    pub fn nominal_bytes(&self) -> u64 {
        const MB: u64 = 1024 * 1024;
        match self {
            Quality::Preview => MB / 2,
            Quality::Standard => 2 * MB,
            Quality::High => 8 * MB,
            Quality::Ultra => 25 * MB,
        }
    }

    /// Expected payload size range: nominal +/- 25%.
    pub fn size_bracket(&self) -> (u64, u64) {
        let nominal = self.nominal_bytes();
        (nominal * 3 / 4, nominal * 5 / 4)
    }

    /// Number of images one acquisition request produces.
    pub fn burst_len(&self) -> usize {
        match self {
            Quality::Ultra => 3,
            Quality::High => 5,
            Quality::Preview | Quality::Standard => 8,
        }
    }
}

macro_rules! display_label {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    )*};
}

display_label!(Source, Region, Quality);

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Pixel dimensions. Displays and parses as `WxH`.
#[derive(
    Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize,
    Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
#[archive(check_bytes)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn uncompressed_bytes(&self) -> u64 {
        self.pixels() * RGB_BYTES_PER_PIXEL
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One stored image: metadata plus the encoded payload.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct ImageRecord {
    /// Primary key, unique across live records
    pub id: String,
    pub source: Source,
    pub region: Region,
    pub quality: Quality,

    /// Capture instant, milliseconds since the Unix epoch
    pub captured_at: u64,

    pub coordinates: Coordinates,
    pub cloud_cover_percent: f64,
    pub resolution: Resolution,

    /// Always `payload.len()`
    pub size_bytes: u64,

    /// Latency of the upstream generation step; informational only
    pub processing_time_ms: f64,

    #[serde(serialize_with = "serialize_payload_len")]
    pub payload: Vec<u8>,
}

impl ImageRecord {
    /// Builds a record with the tier's target resolution, the region centre and
    /// zero cloud cover. `size_bytes` is taken from the payload.
    pub fn new(
        id: impl Into<String>,
        source: Source,
        region: Region,
        quality: Quality,
        captured_at: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            region,
            quality,
            captured_at,
            coordinates: region.centre().0,
            cloud_cover_percent: 0.0,
            resolution: quality.target_resolution(),
            size_bytes: payload.len() as u64,
            processing_time_ms: 0.0,
            payload,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = coordinates;
        self
    }

    pub fn with_cloud_cover(mut self, percent: f64) -> Self {
        self.cloud_cover_percent = percent;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_processing_time(mut self, ms: f64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    pub fn uncompressed_bytes(&self) -> u64 {
        self.resolution.uncompressed_bytes()
    }

    /// Structural acceptance check run by the store before any mutation.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidRecord("empty id".into()));
        }
        if self.size_bytes != self.payload.len() as u64 {
            return Err(StoreError::InvalidRecord(format!(
                "{}: size_bytes {} does not match payload length {}",
                self.id,
                self.size_bytes,
                self.payload.len()
            )));
        }
        if !self.coordinates.is_finite() {
            return Err(StoreError::InvalidRecord(format!("{}: non-finite coordinates", self.id)));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(StoreError::InvalidRecord(format!(
                "{}: degenerate resolution {}",
                self.id, self.resolution
            )));
        }
        Ok(())
    }
}

/// JSON output reports payloads by length only.
fn serialize_payload_len<S: serde::Serializer>(payload: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(payload.len() as u64)
}

/// `{source}_{region}_{quality}_{created_ms}_{sequence}`
pub fn compose_record_id(
    source: Source,
    region: Region,
    quality: Quality,
    created_ms: u64,
    sequence: u64,
) -> String {
    format!("{}_{}_{}_{}_{}", source, region, quality, created_ms, sequence)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_and_fall_back() {
        for region in Region::ALL {
            assert_eq!(Region::from_label(region.label()), Some(region));
        }
        assert_eq!(Region::from_label("GREAT-BARRIER"), Some(Region::GreatBarrier));
        assert_eq!(Region::from_label("atlantis"), None);
        assert_eq!(Region::from_label_or_default("atlantis"), Region::Amazon);
        assert_eq!(Source::from_label_or_default(""), Source::Landsat);
        assert_eq!(Quality::from_label_or_default("8k"), Quality::Standard);
    }

    #[test]
    fn quality_tiers() {
        assert_eq!(Quality::Standard.target_resolution().to_string(), "800x600");
        assert_eq!(Quality::Ultra.burst_len(), 3);
        assert_eq!(Quality::High.burst_len(), 5);
        assert_eq!(Quality::Preview.burst_len(), 8);
        let (lo, hi) = Quality::High.size_bracket();
        assert!(lo < Quality::High.nominal_bytes() && Quality::High.nominal_bytes() < hi);
    }

    #[test]
    fn record_id_shape() {
        let id = compose_record_id(Source::Sentinel, Region::GreatBarrier, Quality::High, 1700000000000, 4);
        assert_eq!(id, "sentinel_great-barrier_high_1700000000000_4");
    }

    #[test]
    fn new_record_tracks_payload_size() {
        let rec = ImageRecord::new("a", Source::Landsat, Region::Sahara, Quality::Standard, 0, vec![7; 42]);
        assert_eq!(rec.size_bytes, 42);
        assert_eq!(rec.uncompressed_bytes(), 800 * 600 * 3);
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn validate_rejects_structural_errors() {
        let base = ImageRecord::new("a", Source::Landsat, Region::Sahara, Quality::Standard, 0, vec![1, 2, 3]);

        let mut wrong_size = base.clone();
        wrong_size.size_bytes = 10;
        assert!(matches!(wrong_size.validate(), Err(StoreError::InvalidRecord(_))));

        let nan = base.clone().with_coordinates(Coordinates { latitude: f64::NAN, longitude: 0.0 });
        assert!(matches!(nan.validate(), Err(StoreError::InvalidRecord(_))));

        let flat = base.clone().with_resolution(Resolution::new(0, 600));
        assert!(matches!(flat.validate(), Err(StoreError::InvalidRecord(_))));

        let mut anonymous = base;
        anonymous.id.clear();
        assert!(matches!(anonymous.validate(), Err(StoreError::InvalidRecord(_))));
    }
}
