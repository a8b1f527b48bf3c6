//! On-demand image downloads bound to display slots.
//!
//! A slot is whatever the UI shows one photo in (a grid cell). Each slot has
//! at most one download in flight; pointing a slot at a different photo
//! aborts the previous download, and a generation counter drops any result
//! that still slips through. Finished downloads arrive on a channel and are
//! applied on the owner thread by [`ImageFetchCache::complete`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::capabilities::{HttpClient, HttpRequest};
use crate::config::ImageConfig;
use crate::model::{Photo, PhotoId};
use crate::store::{PhotoStore, StoreBackend};
use crate::PhotoSetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// A finished download, tagged with the slot request that started it.
#[derive(Debug)]
pub struct ImageLoaded {
    slot: SlotId,
    photo: PhotoId,
    generation: u64,
    result: Result<Bytes, PhotoSetError>,
}

impl ImageLoaded {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn photo_id(&self) -> &PhotoId {
        &self.photo
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotRequest {
    /// The photo's bytes are already stored.
    Ready(Bytes),
    /// A download is running; its result arrives on the completion channel.
    Started,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotUpdate {
    Display {
        slot: SlotId,
        photo: PhotoId,
        bytes: Bytes,
    },
    /// Show a retry affordance in the slot.
    Failed {
        slot: SlotId,
        photo: PhotoId,
        error: PhotoSetError,
    },
    /// The slot moved on, or the photo was deleted; nothing to show.
    Stale,
}

struct InFlight {
    photo: PhotoId,
    generation: u64,
    task: JoinHandle<()>,
}

pub struct ImageFetchCache<H: HttpClient> {
    http: Arc<H>,
    config: ImageConfig,
    slots: HashMap<SlotId, InFlight>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<ImageLoaded>,
}

impl<H: HttpClient> ImageFetchCache<H> {
    pub fn new(
        http: Arc<H>,
        config: ImageConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ImageLoaded>), PhotoSetError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Self {
            http,
            config,
            slots: HashMap::new(),
            next_generation: 0,
            tx,
        };
        Ok((cache, rx))
    }

    /// Shows `photo` in `slot`, downloading its bytes if they are not stored.
    ///
    /// Spawns onto the current tokio runtime.
    #[instrument(skip(self, photo), fields(photo_id = %photo.id))]
    pub fn request(&mut self, slot: SlotId, photo: &Photo) -> SlotRequest {
        if let Some(bytes) = &photo.image_bytes {
            self.release(slot);
            return SlotRequest::Ready(bytes.clone());
        }
        if self
            .slots
            .get(&slot)
            .is_some_and(|in_flight| in_flight.photo == photo.id)
        {
            return SlotRequest::Started;
        }
        self.release(slot);

        let generation = self.next_generation;
        self.next_generation += 1;

        let http = Arc::clone(&self.http);
        let tx = self.tx.clone();
        let config = self.config.clone();
        let url = photo.remote_url.clone();
        let photo_id = photo.id.clone();
        let task = tokio::spawn(async move {
            let result = download(http.as_ref(), &url, &config).await;
            // The cache may be gone by now.
            let _ = tx.send(ImageLoaded {
                slot,
                photo: photo_id,
                generation,
                result,
            });
        });

        self.slots.insert(
            slot,
            InFlight {
                photo: photo.id.clone(),
                generation,
                task,
            },
        );
        SlotRequest::Started
    }

    /// Cancels the slot's download, if any. Call when a slot is recycled or
    /// goes off screen.
    pub fn release(&mut self, slot: SlotId) {
        if let Some(in_flight) = self.slots.remove(&slot) {
            in_flight.task.abort();
            debug!(%slot, photo_id = %in_flight.photo, "image download cancelled");
        }
    }

    pub fn in_flight(&self, slot: SlotId) -> Option<&PhotoId> {
        self.slots.get(&slot).map(|in_flight| &in_flight.photo)
    }

    pub fn in_flight_count(&self) -> usize {
        self.slots.len()
    }

    /// Applies a finished download: stores the bytes, then reports what the
    /// slot should display.
    pub fn complete<B: StoreBackend>(
        &mut self,
        loaded: ImageLoaded,
        store: &mut PhotoStore<B>,
    ) -> Result<SlotUpdate, PhotoSetError> {
        let ImageLoaded {
            slot,
            photo,
            generation,
            result,
        } = loaded;

        let is_current = self
            .slots
            .get(&slot)
            .is_some_and(|in_flight| in_flight.generation == generation);
        if !is_current {
            debug!(%slot, photo_id = %photo, "dropping image for a reused slot");
            return Ok(SlotUpdate::Stale);
        }
        self.slots.remove(&slot);

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%slot, photo_id = %photo, %error, "image download failed");
                return Ok(SlotUpdate::Failed { slot, photo, error });
            }
        };

        let Some(record) = store.photo(&photo) else {
            debug!(photo_id = %photo, "photo deleted while its image was downloading");
            return Ok(SlotUpdate::Stale);
        };
        // Image bytes are written once; a concurrent download may have won.
        if let Some(existing) = &record.image_bytes {
            return Ok(SlotUpdate::Display {
                slot,
                photo,
                bytes: existing.clone(),
            });
        }

        store.set_image_bytes(&photo, bytes.clone())?;
        store.save()?;
        Ok(SlotUpdate::Display { slot, photo, bytes })
    }
}

impl<H: HttpClient> Drop for ImageFetchCache<H> {
    fn drop(&mut self) {
        for in_flight in self.slots.values() {
            in_flight.task.abort();
        }
    }
}

async fn download<H: HttpClient + ?Sized>(
    http: &H,
    url: &str,
    config: &ImageConfig,
) -> Result<Bytes, PhotoSetError> {
    let request = HttpRequest::get(url)?
        .with_timeout_ms(config.timeout_ms)?
        .with_max_response_size(config.max_bytes);
    let max = request.max_response_size();

    let response = http.send(request).await?;
    if !response.is_success() {
        return Err(PhotoSetError::HttpStatus {
            status: response.status(),
        });
    }

    let body = response.into_body();
    if body.is_empty() {
        return Err(PhotoSetError::parse("image response was empty"));
    }
    if body.len() > max {
        return Err(PhotoSetError::parse(format!(
            "image of {} bytes exceeds limit of {} bytes",
            body.len(),
            max
        )));
    }
    Ok(body)
}
