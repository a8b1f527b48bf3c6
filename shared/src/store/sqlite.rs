use bytes::Bytes;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use tracing::{debug, info, instrument};

use super::{Mutation, Snapshot, StoreBackend, StoreError, CURRENT_SCHEMA_VERSION};
use crate::model::{LatLon, PageState, PageTotal, Photo, PhotoId, Pin};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pins (
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    current_page INTEGER,
    total_pages INTEGER,
    PRIMARY KEY (latitude, longitude)
);

CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY,
    pin_latitude REAL NOT NULL,
    pin_longitude REAL NOT NULL,
    remote_url TEXT NOT NULL,
    image_bytes BLOB,
    FOREIGN KEY (pin_latitude, pin_longitude)
        REFERENCES pins (latitude, longitude) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_photos_pin_url
    ON photos (pin_latitude, pin_longitude, remote_url);
"#;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

/// SQLite-backed storage. Each commit runs in a single transaction.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Cascading deletes depend on this; it is per-connection.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::FutureSchema {
                found: version,
                max: CURRENT_SCHEMA_VERSION,
            });
        }

        conn.execute_batch(SCHEMA)?;
        if version < CURRENT_SCHEMA_VERSION {
            conn.execute_batch(&format!("PRAGMA user_version = {};", CURRENT_SCHEMA_VERSION))?;
            info!(from = version, to = CURRENT_SCHEMA_VERSION, "photo database schema initialized");
        }
        Ok(Self { conn })
    }

    fn load_pins(&self) -> Result<Vec<Pin>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT latitude, longitude, current_page, total_pages FROM pins")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut pins = Vec::new();
        for row in rows {
            let (lat, lon, current, total) = row?;
            let record = || format!("pin ({}, {})", lat, lon);
            let coordinate = LatLon::new(lat, lon).map_err(|e| StoreError::Corrupted {
                record: record(),
                reason: e.to_string(),
            })?;
            let current_page = match current {
                None => PageState::Unset,
                Some(n) => PageState::Page(page_number(n).ok_or_else(|| StoreError::Corrupted {
                    record: record(),
                    reason: format!("invalid current_page {}", n),
                })?),
            };
            let total_pages = match total {
                None => PageTotal::Unset,
                Some(n) => PageTotal::Known(page_number(n).ok_or_else(|| StoreError::Corrupted {
                    record: record(),
                    reason: format!("invalid total_pages {}", n),
                })?),
            };
            pins.push(Pin {
                coordinate,
                current_page,
                total_pages,
            });
        }
        Ok(pins)
    }

    fn load_photos(&self) -> Result<Vec<Photo>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, pin_latitude, pin_longitude, remote_url, image_bytes FROM photos",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
            ))
        })?;

        let mut photos = Vec::new();
        for row in rows {
            let (id, lat, lon, remote_url, image_bytes) = row?;
            let corrupted = |reason: String| StoreError::Corrupted {
                record: format!("photo {}", id),
                reason,
            };
            let pin = LatLon::new(lat, lon).map_err(|e| corrupted(e.to_string()))?;
            let photo_id = PhotoId::new(id.as_str()).map_err(|e| corrupted(e.to_string()))?;
            photos.push(Photo {
                id: photo_id,
                pin,
                remote_url,
                image_bytes: image_bytes.map(Bytes::from),
            });
        }
        Ok(photos)
    }
}

fn page_number(raw: i64) -> Option<u32> {
    u32::try_from(raw).ok()
}

fn current_page_column(state: PageState) -> Option<i64> {
    state.page().map(i64::from)
}

fn total_pages_column(total: PageTotal) -> Option<i64> {
    match total {
        PageTotal::Unset => None,
        PageTotal::Known(n) => Some(i64::from(n)),
    }
}

fn apply(tx: &Transaction<'_>, mutation: &Mutation) -> Result<(), StoreError> {
    match mutation {
        Mutation::InsertPin(pin) => {
            tx.execute(
                "INSERT INTO pins (latitude, longitude, current_page, total_pages)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    pin.coordinate.lat(),
                    pin.coordinate.lon(),
                    current_page_column(pin.current_page),
                    total_pages_column(pin.total_pages),
                ],
            )?;
        }
        Mutation::UpdatePin(pin) => {
            let changed = tx.execute(
                "UPDATE pins SET current_page = ?3, total_pages = ?4
                 WHERE latitude = ?1 AND longitude = ?2",
                params![
                    pin.coordinate.lat(),
                    pin.coordinate.lon(),
                    current_page_column(pin.current_page),
                    total_pages_column(pin.total_pages),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::UnknownPin(pin.coordinate));
            }
        }
        Mutation::DeletePin(coordinate) => {
            let changed = tx.execute(
                "DELETE FROM pins WHERE latitude = ?1 AND longitude = ?2",
                params![coordinate.lat(), coordinate.lon()],
            )?;
            if changed == 0 {
                return Err(StoreError::UnknownPin(*coordinate));
            }
        }
        Mutation::InsertPhoto(photo) => {
            tx.execute(
                "INSERT INTO photos (id, pin_latitude, pin_longitude, remote_url, image_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    photo.id.as_str(),
                    photo.pin.lat(),
                    photo.pin.lon(),
                    photo.remote_url,
                    photo.image_bytes.as_deref(),
                ],
            )?;
        }
        Mutation::DeletePhoto(id) => {
            let changed = tx.execute("DELETE FROM photos WHERE id = ?1", params![id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::PhotoNotFound(id.clone()));
            }
        }
        Mutation::SetImageBytes { id, bytes } => {
            let changed = tx.execute(
                "UPDATE photos SET image_bytes = ?2 WHERE id = ?1",
                params![id.as_str(), &bytes[..]],
            )?;
            if changed == 0 {
                return Err(StoreError::PhotoNotFound(id.clone()));
            }
        }
    }
    Ok(())
}

impl StoreBackend for SqliteBackend {
    fn load(&mut self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            pins: self.load_pins()?,
            photos: self.load_photos()?,
        })
    }

    fn commit(&mut self, batch: &[Mutation]) -> Result<(), StoreError> {
        // An early return drops the transaction, which rolls it back.
        let tx = self.conn.transaction()?;
        for mutation in batch {
            apply(&tx, mutation)?;
        }
        tx.commit()?;
        debug!(mutations = batch.len(), "sqlite commit");
        Ok(())
    }
}
