//! Pins and their photos, with staged edits that only become visible on
//! [`PhotoStore::save`].
//!
//! Every mutating call is validated against the staged view and queued. A
//! save hands the whole queue to the [`StoreBackend`] as one atomic batch;
//! if the backend refuses it, the queue is dropped and the committed view is
//! exactly what it was before the edits began.

mod memory;
#[cfg(not(target_arch = "wasm32"))]
mod sqlite;

pub use memory::{FailureSwitch, MemoryBackend};
#[cfg(not(target_arch = "wasm32"))]
pub use sqlite::SqliteBackend;

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::event::{ChangeSet, StoreEvent};
use crate::model::{LatLon, Photo, PhotoId, Pin};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("storage backend error: {message}")]
    Backend { message: String },

    #[error("no pin at {0}")]
    UnknownPin(LatLon),

    #[error("a pin already exists at {0}")]
    DuplicatePin(LatLon),

    #[error("photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("photo already exists: {0}")]
    DuplicatePhoto(PhotoId),

    #[error("corrupted record {record}: {reason}")]
    Corrupted { record: String, reason: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: u32, max: u32 },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// One queued edit. A backend receives these in the order they were made.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    InsertPin(Pin),
    UpdatePin(Pin),
    /// Removes the pin and every photo attached to it.
    DeletePin(LatLon),
    InsertPhoto(Photo),
    DeletePhoto(PhotoId),
    SetImageBytes { id: PhotoId, bytes: Bytes },
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub pins: Vec<Pin>,
    pub photos: Vec<Photo>,
}

/// Durable storage behind a [`PhotoStore`].
pub trait StoreBackend {
    fn load(&mut self) -> Result<Snapshot, StoreError>;

    /// Applies `batch` atomically: either every mutation lands or none does.
    fn commit(&mut self, batch: &[Mutation]) -> Result<(), StoreError>;
}

/// In-memory image of the stored records, shared by the store's staged view
/// and the memory backend.
#[derive(Debug, Clone, Default)]
pub(crate) struct Records {
    pins: BTreeMap<LatLon, Pin>,
    photos: HashMap<PhotoId, Photo>,
}

impl Records {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut records = Self::default();
        for pin in snapshot.pins {
            records.pins.insert(pin.coordinate, pin);
        }
        for photo in snapshot.photos {
            if !records.pins.contains_key(&photo.pin) {
                warn!(photo_id = %photo.id, pin = %photo.pin, "dropping photo without a pin");
                continue;
            }
            records.photos.insert(photo.id.clone(), photo);
        }
        records
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            pins: self.pins.values().cloned().collect(),
            photos: self.photos.values().cloned().collect(),
        }
    }

    /// Validates `mutation` and applies it. Leaves `self` untouched on error.
    pub(crate) fn apply(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::InsertPin(pin) => {
                if self.pins.contains_key(&pin.coordinate) {
                    return Err(StoreError::DuplicatePin(pin.coordinate));
                }
                self.pins.insert(pin.coordinate, pin.clone());
            }
            Mutation::UpdatePin(pin) => {
                let slot = self
                    .pins
                    .get_mut(&pin.coordinate)
                    .ok_or(StoreError::UnknownPin(pin.coordinate))?;
                *slot = pin.clone();
            }
            Mutation::DeletePin(coordinate) => {
                if self.pins.remove(coordinate).is_none() {
                    return Err(StoreError::UnknownPin(*coordinate));
                }
                self.photos.retain(|_, photo| photo.pin != *coordinate);
            }
            Mutation::InsertPhoto(photo) => {
                if !self.pins.contains_key(&photo.pin) {
                    return Err(StoreError::UnknownPin(photo.pin));
                }
                if self.photos.contains_key(&photo.id) {
                    return Err(StoreError::DuplicatePhoto(photo.id.clone()));
                }
                self.photos.insert(photo.id.clone(), photo.clone());
            }
            Mutation::DeletePhoto(id) => {
                if self.photos.remove(id).is_none() {
                    return Err(StoreError::PhotoNotFound(id.clone()));
                }
            }
            Mutation::SetImageBytes { id, bytes } => {
                let photo = self
                    .photos
                    .get_mut(id)
                    .ok_or_else(|| StoreError::PhotoNotFound(id.clone()))?;
                photo.image_bytes = Some(bytes.clone());
            }
        }
        Ok(())
    }

    /// Photo ids of `pin`, ordered by remote URL with the id as tie-break.
    fn ordered_ids(&self, pin: &LatLon) -> Vec<PhotoId> {
        self.ordered_photos(pin)
            .into_iter()
            .map(|photo| photo.id.clone())
            .collect()
    }

    fn ordered_photos(&self, pin: &LatLon) -> Vec<&Photo> {
        let mut photos: Vec<&Photo> = self.photos.values().filter(|p| p.pin == *pin).collect();
        photos.sort_by(|a, b| {
            a.remote_url
                .cmp(&b.remote_url)
                .then_with(|| a.id.cmp(&b.id))
        });
        photos
    }

    fn pin_of(&self, id: &PhotoId) -> Option<LatLon> {
        self.photos.get(id).map(|photo| photo.pin)
    }
}

pub struct PhotoStore<B: StoreBackend> {
    backend: B,
    committed: Records,
    /// Committed records plus queued edits. `None` while nothing is queued.
    staged: Option<Records>,
    pending: Vec<Mutation>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl<B: StoreBackend> PhotoStore<B> {
    #[instrument(skip(backend))]
    pub fn open(mut backend: B) -> Result<Self, StoreError> {
        let committed = Records::from_snapshot(backend.load()?);
        info!(
            pins = committed.pins.len(),
            photos = committed.photos.len(),
            "photo store opened"
        );
        Ok(Self {
            backend,
            committed,
            staged: None,
            pending: Vec::new(),
            subscribers: Vec::new(),
        })
    }

    /// Receives every event produced by a successful save from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // --- Committed reads ---

    /// All committed pins, ordered by coordinate.
    pub fn pins(&self) -> Vec<Pin> {
        self.committed.pins.values().cloned().collect()
    }

    pub fn pin(&self, coordinate: &LatLon) -> Option<&Pin> {
        self.committed.pins.get(coordinate)
    }

    pub fn photo(&self, id: &PhotoId) -> Option<&Photo> {
        self.committed.photos.get(id)
    }

    pub fn photo_count(&self, pin: &LatLon) -> usize {
        self.committed
            .photos
            .values()
            .filter(|photo| photo.pin == *pin)
            .count()
    }

    /// Committed photos of `pin` in display order: ascending remote URL,
    /// ties broken by id.
    pub fn list_ordered_by_url(&self, pin: &LatLon) -> Vec<Photo> {
        self.committed
            .ordered_photos(pin)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    // --- Staged edits ---

    pub fn insert_pin(&mut self, coordinate: LatLon) -> Result<Pin, StoreError> {
        let pin = Pin::new(coordinate);
        self.stage(Mutation::InsertPin(pin.clone()))?;
        Ok(pin)
    }

    pub fn update_pin(&mut self, pin: Pin) -> Result<(), StoreError> {
        self.stage(Mutation::UpdatePin(pin))
    }

    pub fn delete_pin(&mut self, coordinate: &LatLon) -> Result<(), StoreError> {
        self.stage(Mutation::DeletePin(*coordinate))
    }

    /// Creates a photo record for `pin` with no image bytes yet.
    pub fn insert(&mut self, pin: &LatLon, remote_url: impl Into<String>) -> Result<Photo, StoreError> {
        let photo = Photo::new(*pin, remote_url);
        self.stage(Mutation::InsertPhoto(photo.clone()))?;
        Ok(photo)
    }

    pub fn delete(&mut self, id: &PhotoId) -> Result<(), StoreError> {
        self.stage(Mutation::DeletePhoto(id.clone()))
    }

    pub fn set_image_bytes(&mut self, id: &PhotoId, bytes: Bytes) -> Result<(), StoreError> {
        self.stage(Mutation::SetImageBytes {
            id: id.clone(),
            bytes,
        })
    }

    /// Drops every queued edit.
    pub fn discard_changes(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "discarding staged edits");
        }
        self.pending.clear();
        self.staged = None;
    }

    fn stage(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        let committed = &self.committed;
        let staged = self.staged.get_or_insert_with(|| committed.clone());
        if let Err(e) = staged.apply(&mutation) {
            if self.pending.is_empty() {
                self.staged = None;
            }
            return Err(e);
        }
        self.pending.push(mutation);
        Ok(())
    }

    /// Commits every queued edit as one batch and notifies subscribers.
    ///
    /// On failure all queued edits are rolled back and the committed view is
    /// unchanged.
    #[instrument(skip(self), fields(pending = self.pending.len()))]
    pub fn save(&mut self) -> Result<(), StoreError> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        let pending = std::mem::take(&mut self.pending);

        if let Err(e) = self.backend.commit(&pending) {
            warn!(error = %e, dropped = pending.len(), "save failed, rolled back staged edits");
            return Err(e);
        }

        let events = self.change_events(&staged, &pending);
        self.committed = staged;
        debug!(mutations = pending.len(), events = events.len(), "save committed");
        self.publish(events);
        Ok(())
    }

    fn change_events(&self, after: &Records, pending: &[Mutation]) -> Vec<StoreEvent> {
        let before = &self.committed;
        let mut touched = BTreeSet::new();
        let mut updated = HashSet::new();

        for mutation in pending {
            match mutation {
                Mutation::InsertPin(pin) | Mutation::UpdatePin(pin) => {
                    touched.insert(pin.coordinate);
                }
                Mutation::DeletePin(coordinate) => {
                    touched.insert(*coordinate);
                }
                Mutation::InsertPhoto(photo) => {
                    touched.insert(photo.pin);
                }
                Mutation::DeletePhoto(id) => {
                    touched.extend(before.pin_of(id).or_else(|| after.pin_of(id)));
                }
                Mutation::SetImageBytes { id, .. } => {
                    touched.extend(before.pin_of(id).or_else(|| after.pin_of(id)));
                    updated.insert(id.clone());
                }
            }
        }

        let mut events = Vec::new();
        for coordinate in touched {
            match (before.pins.get(&coordinate), after.pins.get(&coordinate)) {
                (Some(_), None) => {
                    events.push(StoreEvent::PinDeleted(coordinate));
                    continue;
                }
                (None, Some(pin)) => events.push(StoreEvent::PinInserted(pin.clone())),
                (Some(old), Some(new)) if old != new => {
                    events.push(StoreEvent::PinUpdated(new.clone()))
                }
                _ => {}
            }

            if let Some(set) = ChangeSet::diff(
                coordinate,
                before.ordered_ids(&coordinate),
                after.ordered_ids(&coordinate),
                &updated,
            ) {
                events.push(StoreEvent::Photos(set));
            }
        }
        events
    }

    fn publish(&mut self, events: Vec<StoreEvent>) {
        self.subscribers.retain(|tx| !tx.is_closed());
        for event in events {
            for tx in &self.subscribers {
                // A receiver dropped mid-loop is pruned on the next publish.
                let _ = tx.send(event.clone());
            }
        }
    }
}
