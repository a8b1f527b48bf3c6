use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

pub const MAX_PHOTO_ID_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid photo id '{id}': {reason}")]
    InvalidPhotoId { id: String, reason: &'static str },
}

// --- Coordinate: validated, NaN-safe, usable as a map key ---

/// WGS84 coordinate in degrees. Also the identity of a [`Pin`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawLatLon", into = "RawLatLon")]
pub struct LatLon {
    lat: f64,
    lon: f64,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct RawLatLon {
    lat: f64,
    lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ModelError> {
        if !lat.is_finite()
            || !lon.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lon)
        {
            return Err(ModelError::InvalidCoordinate { lat, lon });
        }
        // -0.0 + 0.0 == +0.0, so both zeros share one identity.
        Ok(Self {
            lat: lat + 0.0,
            lon: lon + 0.0,
        })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl TryFrom<RawLatLon> for LatLon {
    type Error = ModelError;

    fn try_from(raw: RawLatLon) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lon)
    }
}

impl From<LatLon> for RawLatLon {
    fn from(c: LatLon) -> Self {
        Self {
            lat: c.lat,
            lon: c.lon,
        }
    }
}

impl TryFrom<(f64, f64)> for LatLon {
    type Error = ModelError;

    fn try_from((lat, lon): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(lat, lon)
    }
}

impl PartialEq for LatLon {
    fn eq(&self, other: &Self) -> bool {
        self.lat.to_bits() == other.lat.to_bits() && self.lon.to_bits() == other.lon.to_bits()
    }
}

impl Eq for LatLon {}

impl Hash for LatLon {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lat.to_bits().hash(state);
        self.lon.to_bits().hash(state);
    }
}

impl PartialOrd for LatLon {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LatLon {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lat
            .total_cmp(&other.lat)
            .then_with(|| self.lon.total_cmp(&other.lon))
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

// --- Typed IDs ---

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhotoId(String);

impl PhotoId {
    pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(ModelError::InvalidPhotoId {
                id,
                reason: "id cannot be empty",
            });
        }
        if id.len() > MAX_PHOTO_ID_LENGTH {
            return Err(ModelError::InvalidPhotoId {
                id: id.chars().take(50).collect::<String>() + "...",
                reason: "id too long",
            });
        }
        Ok(Self(id))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Page bookkeeping ---

/// Last page fetched for a pin (1-based).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageState {
    #[default]
    Unset,
    Page(u32),
}

impl PageState {
    pub fn page(self) -> Option<u32> {
        match self {
            Self::Unset => None,
            Self::Page(n) => Some(n),
        }
    }
}

/// Number of remote pages reported by the last successful search.
///
/// `Known(0)` means the search succeeded and found nothing at this location,
/// which is not the same as `Unset` (never searched).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageTotal {
    #[default]
    Unset,
    Known(u32),
}

impl PageTotal {
    /// Page count with `Unset` read as zero.
    pub fn count(self) -> u32 {
        match self {
            Self::Unset => 0,
            Self::Known(n) => n,
        }
    }

    pub fn is_no_results(self) -> bool {
        self == Self::Known(0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub coordinate: LatLon,
    pub current_page: PageState,
    pub total_pages: PageTotal,
}

impl Pin {
    pub fn new(coordinate: LatLon) -> Self {
        Self {
            coordinate,
            current_page: PageState::Unset,
            total_pages: PageTotal::Unset,
        }
    }

    pub fn has_fetched(&self) -> bool {
        self.total_pages != PageTotal::Unset
    }

    /// Records a successful fetch of `page` out of `total` pages.
    ///
    /// Keeps `current_page` within `[1, total]` when the remote set shrank
    /// below the requested page.
    pub fn record_fetch(&mut self, page: u32, total: u32) {
        let page = page.max(1);
        self.total_pages = PageTotal::Known(total);
        self.current_page = if total > 0 && page > total {
            PageState::Page(total)
        } else {
            PageState::Page(page)
        };
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    pub pin: LatLon,
    pub remote_url: String,
    pub image_bytes: Option<Bytes>,
}

impl Photo {
    pub fn new(pin: LatLon, remote_url: impl Into<String>) -> Self {
        Self {
            id: PhotoId::generate(),
            pin,
            remote_url: remote_url.into(),
            image_bytes: None,
        }
    }

    pub fn has_image(&self) -> bool {
        self.image_bytes.is_some()
    }
}

// Image payloads can be large; print the size only.
impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("id", &self.id)
            .field("pin", &self.pin)
            .field("remote_url", &self.remote_url)
            .field("image_len", &self.image_bytes.as_ref().map(Bytes::len))
            .finish()
    }
}
