//! Change notifications emitted by the photo store, and the consumer-side
//! buffer that folds them into one grid update per user action.
//!
//! Positions follow the usual batch-update convention of collection views:
//! deletions and updates index the list as it was before the batch,
//! insertions index the list as it is after the batch.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

use crate::model::{LatLon, PhotoId, Pin};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    PinInserted(Pin),
    PinUpdated(Pin),
    PinDeleted(LatLon),
    Photos(ChangeSet),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    Deleted { index: usize, id: PhotoId },
    Inserted { index: usize, id: PhotoId },
    Updated { index: usize, id: PhotoId },
}

/// Photo changes for one pin produced by a single committed save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub pin: LatLon,
    pub events: Vec<ChangeEvent>,
    /// Ordered photo ids before the save.
    pub before: Vec<PhotoId>,
    /// Ordered photo ids after the save.
    pub after: Vec<PhotoId>,
}

impl ChangeSet {
    /// Returns `None` when nothing visible changed.
    pub(crate) fn diff(
        pin: LatLon,
        before: Vec<PhotoId>,
        after: Vec<PhotoId>,
        updated: &HashSet<PhotoId>,
    ) -> Option<Self> {
        let positions = Positions::between(&before, &after, updated);
        if positions.is_empty() {
            return None;
        }

        let mut events = Vec::with_capacity(positions.len());
        events.extend(positions.deleted.iter().map(|&index| ChangeEvent::Deleted {
            index,
            id: before[index].clone(),
        }));
        events.extend(positions.inserted.iter().map(|&index| ChangeEvent::Inserted {
            index,
            id: after[index].clone(),
        }));
        events.extend(positions.updated.iter().map(|&index| ChangeEvent::Updated {
            index,
            id: before[index].clone(),
        }));

        Some(Self {
            pin,
            events,
            before,
            after,
        })
    }

    pub fn inserted_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ChangeEvent::Inserted { .. }))
            .count()
    }

    pub fn deleted_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ChangeEvent::Deleted { .. }))
            .count()
    }
}

#[derive(Debug, Default)]
struct Positions {
    deleted: Vec<usize>,
    inserted: Vec<usize>,
    updated: Vec<usize>,
}

impl Positions {
    fn between(before: &[PhotoId], after: &[PhotoId], updated: &HashSet<PhotoId>) -> Self {
        let old_index: HashMap<&PhotoId, usize> =
            before.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let new_ids: HashSet<&PhotoId> = after.iter().collect();

        let deleted = before
            .iter()
            .enumerate()
            .filter(|(_, id)| !new_ids.contains(id))
            .map(|(i, _)| i)
            .collect();
        let inserted = after
            .iter()
            .enumerate()
            .filter(|(_, id)| !old_index.contains_key(id))
            .map(|(i, _)| i)
            .collect();
        let mut changed: Vec<usize> = updated
            .iter()
            .filter(|id| new_ids.contains(id))
            .filter_map(|id| old_index.get(id).copied())
            .collect();
        changed.sort_unstable();

        Self {
            deleted,
            inserted,
            updated: changed,
        }
    }

    fn len(&self) -> usize {
        self.deleted.len() + self.inserted.len() + self.updated.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One visual update for a pin's photo grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub deleted: Vec<usize>,
    pub inserted: Vec<usize>,
    pub updated: Vec<usize>,
    pub len_before: usize,
    pub len_after: usize,
}

impl BatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.inserted.is_empty() && self.updated.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush {
    Update(BatchUpdate),
    /// The pin itself was removed; the grid should close.
    PinRemoved,
}

/// Accumulates store events for one pin until the UI is ready to apply them
/// as a single batch.
///
/// Composes any number of change sets: the first one fixes the "before"
/// list, the last one the "after" list.
#[derive(Debug)]
pub struct BatchBuffer {
    pin: LatLon,
    before: Option<Vec<PhotoId>>,
    after: Vec<PhotoId>,
    updated: HashSet<PhotoId>,
    pin_removed: bool,
}

impl BatchBuffer {
    pub fn new(pin: LatLon) -> Self {
        Self {
            pin,
            before: None,
            after: Vec::new(),
            updated: HashSet::new(),
            pin_removed: false,
        }
    }

    pub fn pin(&self) -> LatLon {
        self.pin
    }

    /// Records `event` if it concerns this buffer's pin. Returns whether it did.
    pub fn absorb(&mut self, event: &StoreEvent) -> bool {
        match event {
            StoreEvent::Photos(set) if set.pin == self.pin => {
                if self.before.is_none() {
                    self.before = Some(set.before.clone());
                }
                self.after = set.after.clone();
                for change in &set.events {
                    if let ChangeEvent::Updated { id, .. } = change {
                        self.updated.insert(id.clone());
                    }
                }
                true
            }
            StoreEvent::PinDeleted(pin) if *pin == self.pin => {
                self.pin_removed = true;
                true
            }
            _ => false,
        }
    }

    /// Absorbs everything already queued on `rx` without waiting.
    pub fn absorb_pending(&mut self, rx: &mut mpsc::UnboundedReceiver<StoreEvent>) -> usize {
        let mut absorbed = 0;
        while let Ok(event) = rx.try_recv() {
            if self.absorb(&event) {
                absorbed += 1;
            }
        }
        absorbed
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_none() && !self.pin_removed
    }

    /// Emits the accumulated changes as one update and resets the buffer.
    pub fn flush(&mut self) -> Option<Flush> {
        if self.pin_removed {
            self.reset();
            return Some(Flush::PinRemoved);
        }

        let before = self.before.take()?;
        let after = std::mem::take(&mut self.after);
        let updated = std::mem::take(&mut self.updated);

        let positions = Positions::between(&before, &after, &updated);
        if positions.is_empty() {
            return None;
        }

        Some(Flush::Update(BatchUpdate {
            deleted: positions.deleted,
            inserted: positions.inserted,
            updated: positions.updated,
            len_before: before.len(),
            len_after: after.len(),
        }))
    }

    fn reset(&mut self) {
        self.before = None;
        self.after.clear();
        self.updated.clear();
        self.pin_removed = false;
    }
}
