//! Shared core of a map-based photo browser.
//!
//! Users drop pins on a map; for every pin the core fetches one page of photo
//! URLs from a remote image search, keeps them in a local store, downloads
//! image bytes when a grid cell asks for them, and supports "new collection"
//! refreshes and selective deletes. The platform shell owns the map and grid
//! UI and injects the HTTP transport and the storage backend.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod config;
pub mod event;
pub mod image_cache;
pub mod manager;
pub mod model;
pub mod page_cursor;
pub mod search;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capabilities::{HttpClient, HttpError, HttpRequest, HttpResponse};
pub use config::{ConfigError, CoreConfig, ImageConfig, SearchConfig};
pub use event::{BatchBuffer, BatchUpdate, ChangeEvent, ChangeSet, Flush, StoreEvent};
pub use image_cache::{ImageFetchCache, ImageLoaded, SlotId, SlotRequest, SlotUpdate};
pub use manager::{
    FetchCompletion, FetchKind, FetchResolution, FetchTicket, LoadOutcome, LoadState, LoadStep,
    PhotoSetManager,
};
pub use model::{LatLon, ModelError, PageState, PageTotal, Photo, PhotoId, Pin};
pub use page_cursor::next_page;
pub use search::{BoundingBox, PhotoSearch, SearchClient, SearchPage};
pub use store::{MemoryBackend, Mutation, PhotoStore, Snapshot, StoreBackend, StoreError};
#[cfg(not(target_arch = "wasm32"))]
pub use store::SqliteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    HttpStatus,
    Parse,
    Storage,
    InvalidInput,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::HttpStatus => "HTTP_STATUS_ERROR",
            Self::Parse => "PARSE_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
        }
    }

    /// Hint for the UI. The core itself never retries.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::HttpStatus | Self::Storage)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhotoSetError {
    #[error("network error: {0}")]
    Network(HttpError),

    #[error("server responded with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("unexpected response: {reason}")]
    Parse { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl PhotoSetError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::HttpStatus { .. } => ErrorKind::HttpStatus,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Storage(_) => ErrorKind::Storage,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::HttpStatus { status } => *status == 429 || *status >= 500,
            other => other.kind().is_retryable(),
        }
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Network(HttpError::Timeout { .. }) => {
                "The request timed out. Please try again.".into()
            }
            Self::Network(_) => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            Self::HttpStatus { status } if *status >= 500 => {
                "The photo service is having trouble. Please try again later.".into()
            }
            Self::HttpStatus { .. } => "The photo service rejected the request.".into(),
            Self::Parse { .. } => {
                "The photo service sent an unexpected response. Please try again later.".into()
            }
            Self::Storage(_) => {
                "Unable to save photos on this device. Please free up some storage space.".into()
            }
            Self::InvalidInput { reason } => reason.clone(),
        }
    }
}

impl From<HttpError> for PhotoSetError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::InvalidUrl { .. } | HttpError::InvalidRequest { .. } => Self::InvalidInput {
                reason: e.to_string(),
            },
            HttpError::InvalidResponse { .. } | HttpError::ResponseTooLarge { .. } => Self::Parse {
                reason: e.to_string(),
            },
            HttpError::DnsError { .. }
            | HttpError::ConnectionError { .. }
            | HttpError::TlsError { .. }
            | HttpError::Timeout { .. }
            | HttpError::Cancelled { .. } => Self::Network(e),
        }
    }
}

impl From<ModelError> for PhotoSetError {
    fn from(e: ModelError) -> Self {
        Self::InvalidInput {
            reason: e.to_string(),
        }
    }
}

impl From<ConfigError> for PhotoSetError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidInput {
            reason: e.to_string(),
        }
    }
}

/// Message for a pin whose search succeeded but found nothing. Not an error.
pub const NO_PHOTOS_MESSAGE: &str = "No photos found at this location.";
