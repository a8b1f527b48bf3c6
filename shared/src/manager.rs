//! Per-pin photo set orchestration.
//!
//! All store access and state transitions happen on the owner of the
//! [`PhotoSetManager`]. A remote search runs wherever the caller likes: the
//! manager hands out a [`FetchTicket`], the ticket's future performs the
//! search, and the resulting [`FetchCompletion`] is brought back to
//! [`PhotoSetManager::complete`]. Every ticket carries a sequence number, and
//! only the most recently issued ticket for a pin is applied; anything older
//! is discarded as stale.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::model::{LatLon, Photo, PhotoId, Pin};
use crate::page_cursor::next_page;
use crate::search::{PhotoSearch, SearchPage};
use crate::store::{PhotoStore, StoreBackend, StoreError};
use crate::PhotoSetError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchKind {
    Initial,
    Refresh,
}

/// Permission to run one remote search for a pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTicket {
    pin: LatLon,
    page: u32,
    seq: u64,
    kind: FetchKind,
}

impl FetchTicket {
    pub fn pin(&self) -> LatLon {
        self.pin
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    /// Performs the search. Safe to run off the owner thread; the store is
    /// not touched until the completion is handed back.
    pub async fn execute<S: PhotoSearch + ?Sized>(self, search: &S) -> FetchCompletion {
        let result = search.search(self.pin, self.page).await;
        FetchCompletion {
            ticket: self,
            result,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchCompletion {
    pub ticket: FetchTicket,
    pub result: Result<SearchPage, PhotoSetError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOutcome {
    /// Stored photos were already present; no fetch happened.
    AlreadyLoaded { count: usize },
    /// A fetched page was stored.
    Loaded { count: usize },
    /// The search succeeded and there is nothing at this location.
    NoPhotosFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStep {
    Ready(LoadOutcome),
    /// Run this ticket and hand its completion to [`PhotoSetManager::complete`].
    Fetch(FetchTicket),
    /// A fetch for this pin is already in flight.
    Pending(FetchTicket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResolution {
    Applied(LoadOutcome),
    /// Superseded by a newer ticket, or the pin is gone.
    Discarded,
}

pub struct PhotoSetManager<S: PhotoSearch, B: StoreBackend> {
    search: Arc<S>,
    store: PhotoStore<B>,
    states: HashMap<LatLon, LoadState>,
    pending: HashMap<LatLon, FetchTicket>,
    next_seq: u64,
}

impl<S: PhotoSearch, B: StoreBackend> PhotoSetManager<S, B> {
    pub fn new(search: Arc<S>, store: PhotoStore<B>) -> Self {
        Self {
            search,
            store,
            states: HashMap::new(),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn search_client(&self) -> &Arc<S> {
        &self.search
    }

    pub fn store(&self) -> &PhotoStore<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PhotoStore<B> {
        &mut self.store
    }

    pub fn state(&self, pin: &LatLon) -> LoadState {
        self.states.get(pin).copied().unwrap_or_default()
    }

    pub fn pending_ticket(&self, pin: &LatLon) -> Option<&FetchTicket> {
        self.pending.get(pin)
    }

    pub fn pins(&self) -> Vec<Pin> {
        self.store.pins()
    }

    /// Committed photos of `pin` in display order.
    pub fn photos(&self, pin: &LatLon) -> Vec<Photo> {
        self.store.list_ordered_by_url(pin)
    }

    // --- Pin lifecycle ---

    #[instrument(skip(self))]
    pub fn add_pin(&mut self, coordinate: LatLon) -> Result<Pin, PhotoSetError> {
        let pin = self.store.insert_pin(coordinate)?;
        self.store.save()?;
        self.states.insert(coordinate, LoadState::Unloaded);
        info!(pin = %coordinate, "pin added");
        Ok(pin)
    }

    /// Deletes the pin and all of its photos. An in-flight fetch for it is
    /// discarded when it completes.
    #[instrument(skip(self))]
    pub fn remove_pin(&mut self, coordinate: &LatLon) -> Result<(), PhotoSetError> {
        self.store.delete_pin(coordinate)?;
        self.store.save()?;
        self.states.remove(coordinate);
        self.pending.remove(coordinate);
        info!(pin = %coordinate, "pin removed");
        Ok(())
    }

    // --- Two-phase fetch ---

    /// Stored photos win: a pin that has any is loaded without a fetch.
    pub fn begin_load(&mut self, pin: &LatLon) -> Result<LoadStep, PhotoSetError> {
        self.require_pin(pin)?;
        if let Some(ticket) = self.pending.get(pin) {
            return Ok(LoadStep::Pending(ticket.clone()));
        }

        let count = self.store.photo_count(pin);
        if count > 0 {
            self.states.insert(*pin, LoadState::Loaded);
            debug!(pin = %pin, count, "photos already stored");
            return Ok(LoadStep::Ready(LoadOutcome::AlreadyLoaded { count }));
        }

        self.states.insert(*pin, LoadState::Loading);
        Ok(LoadStep::Fetch(self.issue(*pin, 1, FetchKind::Initial)))
    }

    /// Deletes every photo of `pin`, then issues a ticket for the next page.
    ///
    /// The delete is committed before the fetch starts. If the fetch then
    /// fails, the pin is left without photos.
    pub fn begin_refresh(&mut self, pin: &LatLon) -> Result<FetchTicket, PhotoSetError> {
        let record = self.require_pin(pin)?.clone();

        let ids: Vec<PhotoId> = self
            .store
            .list_ordered_by_url(pin)
            .into_iter()
            .map(|photo| photo.id)
            .collect();
        self.commit_deletes(&ids)?;

        let page = next_page(record.current_page, record.total_pages.count());
        info!(
            pin = %pin,
            cleared = ids.len(),
            from = ?record.current_page,
            page,
            "refreshing photo set"
        );
        self.states.insert(*pin, LoadState::Refreshing);
        Ok(self.issue(*pin, page, FetchKind::Refresh))
    }

    /// Applies a finished search if its ticket is still the current one.
    ///
    /// On a failed search the pin drops back to `Unloaded` and the error is
    /// returned; nothing is retried.
    #[instrument(skip_all, fields(pin = %completion.ticket.pin, page = completion.ticket.page))]
    pub fn complete(
        &mut self,
        completion: FetchCompletion,
    ) -> Result<FetchResolution, PhotoSetError> {
        let FetchCompletion { ticket, result } = completion;

        let is_current = self
            .pending
            .get(&ticket.pin)
            .is_some_and(|pending| pending.seq == ticket.seq);
        if !is_current {
            debug!(seq = ticket.seq, "discarding stale fetch result");
            return Ok(FetchResolution::Discarded);
        }
        self.pending.remove(&ticket.pin);

        let Some(mut pin) = self.store.pin(&ticket.pin).cloned() else {
            self.states.remove(&ticket.pin);
            return Ok(FetchResolution::Discarded);
        };

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(kind = ?ticket.kind, error = %e, "photo fetch failed");
                self.states.insert(ticket.pin, LoadState::Unloaded);
                return Err(e);
            }
        };

        pin.record_fetch(ticket.page, page.total_pages);
        if let Err(e) = self.commit_page(pin, &page.urls) {
            self.states.insert(ticket.pin, LoadState::Unloaded);
            return Err(e.into());
        }
        self.states.insert(ticket.pin, LoadState::Loaded);

        let outcome = if page.is_no_results() {
            info!("no photos at this location");
            LoadOutcome::NoPhotosFound
        } else {
            info!(count = page.urls.len(), total_pages = page.total_pages, "photo page stored");
            LoadOutcome::Loaded {
                count: page.urls.len(),
            }
        };
        Ok(FetchResolution::Applied(outcome))
    }

    // --- Async conveniences over the two-phase API ---

    #[instrument(skip(self), fields(pin = %pin))]
    pub async fn ensure_loaded(&mut self, pin: &LatLon) -> Result<LoadOutcome, PhotoSetError> {
        let ticket = match self.begin_load(pin)? {
            LoadStep::Ready(outcome) => return Ok(outcome),
            LoadStep::Fetch(ticket) => ticket,
            LoadStep::Pending(pending) => self.issue(*pin, pending.page, pending.kind),
        };
        self.run(ticket).await
    }

    #[instrument(skip(self), fields(pin = %pin))]
    pub async fn refresh(&mut self, pin: &LatLon) -> Result<LoadOutcome, PhotoSetError> {
        let ticket = self.begin_refresh(pin)?;
        self.run(ticket).await
    }

    /// Deletes the named photos of `pin`. Ids belonging to other pins or not
    /// stored at all are ignored. Returns how many were deleted.
    #[instrument(skip(self, ids), fields(pin = %pin, requested = ids.len()))]
    pub fn delete_selected(
        &mut self,
        pin: &LatLon,
        ids: &[PhotoId],
    ) -> Result<usize, PhotoSetError> {
        let mut seen = HashSet::new();
        let targets: Vec<PhotoId> = ids
            .iter()
            .filter(|id| self.store.photo(id).is_some_and(|photo| photo.pin == *pin))
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        self.commit_deletes(&targets)?;
        info!(deleted = targets.len(), "deleted selected photos");
        Ok(targets.len())
    }

    async fn run(&mut self, ticket: FetchTicket) -> Result<LoadOutcome, PhotoSetError> {
        let search = Arc::clone(&self.search);
        let completion = ticket.execute(search.as_ref()).await;
        match self.complete(completion)? {
            FetchResolution::Applied(outcome) => Ok(outcome),
            FetchResolution::Discarded => Err(PhotoSetError::invalid_input(
                "the fetch was superseded by a newer request",
            )),
        }
    }

    fn require_pin(&self, pin: &LatLon) -> Result<&Pin, PhotoSetError> {
        self.store
            .pin(pin)
            .ok_or_else(|| PhotoSetError::invalid_input(format!("no pin at {pin}")))
    }

    fn issue(&mut self, pin: LatLon, page: u32, kind: FetchKind) -> FetchTicket {
        let ticket = FetchTicket {
            pin,
            page,
            seq: self.next_seq,
            kind,
        };
        self.next_seq += 1;
        if let Some(previous) = self.pending.insert(pin, ticket.clone()) {
            debug!(pin = %pin, superseded = previous.seq, "superseding in-flight fetch");
        }
        ticket
    }

    fn commit_deletes(&mut self, ids: &[PhotoId]) -> Result<(), StoreError> {
        let staged = ids.iter().try_for_each(|id| self.store.delete(id));
        if staged.is_err() {
            self.store.discard_changes();
        }
        staged?;
        self.store.save()
    }

    fn commit_page(&mut self, pin: Pin, urls: &[String]) -> Result<(), StoreError> {
        let coordinate = pin.coordinate;
        let staged = self.store.update_pin(pin).and_then(|()| {
            urls.iter()
                .try_for_each(|url| self.store.insert(&coordinate, url.as_str()).map(drop))
        });
        if staged.is_err() {
            self.store.discard_changes();
        }
        staged?;
        self.store.save()
    }
}
