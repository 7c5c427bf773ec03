/// This module implements the spatial reservation allocator for the 100x100
/// pixel grid. A reservation claims an axis-aligned rectangle of grid cells,
/// each cell standing for a 10x10 block of pixels. The store persists
/// reservations in RocksDB with one key per covered cell; the serialized
/// check-then-batch-commit over those cell keys is the persistence-layer
/// exclusion constraint that guarantees the grid never holds two overlapping
/// reservations, regardless of how many purchase flows race.
use crate::db::Database;
use crate::error::ApiError;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use rocksdb::WriteBatch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Side length of the grid in cells.
pub const GRID_SIZE: u16 = 100;
/// Pixels represented by one grid cell (a 10x10 block).
pub const PIXELS_PER_CELL: u64 = 100;

const RESERVATION_PREFIX: &str = "res:";

/// An axis-aligned rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Checks the rectangle against the grid bounds.
    ///
    /// Accepts x,y in [0,99], width/height >= 1, and x+width <= 100,
    /// y+height <= 100. Anything else is `InvalidGeometry`, rejected before
    /// any payment is attempted.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.width == 0 || self.height == 0 {
            return Err(ApiError::InvalidGeometry(
                "width and height must be at least 1".to_string(),
            ));
        }
        if self.x >= GRID_SIZE || self.y >= GRID_SIZE {
            return Err(ApiError::InvalidGeometry(format!(
                "origin ({}, {}) is outside the {}x{} grid",
                self.x, self.y, GRID_SIZE, GRID_SIZE
            )));
        }
        let right = self.x as u32 + self.width as u32;
        let bottom = self.y as u32 + self.height as u32;
        if right > GRID_SIZE as u32 || bottom > GRID_SIZE as u32 {
            return Err(ApiError::InvalidGeometry(format!(
                "region extends to ({}, {}), beyond the {}x{} grid",
                right, bottom, GRID_SIZE, GRID_SIZE
            )));
        }
        Ok(())
    }

    /// Strict axis-interval intersection test. Rectangles that only share an
    /// edge or a corner (zero-area intersection) do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// Number of grid cells covered.
    pub fn cell_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Iterates the (x, y) coordinates of every covered cell.
    pub fn cells(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        let (x0, y0, w, h) = (self.x, self.y, self.width, self.height);
        (y0..y0 + h).flat_map(move |y| (x0..x0 + w).map(move |x| (x, y)))
    }
}

/// A confirmed, permanent claim on a region of the grid.
///
/// Geometry is immutable for the life of the record and reservations are never
/// deleted; only the attached image reference and link may change, and only at
/// the owner's request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub rect: Rect,
    /// Wallet address of the owner.
    pub owner: String,
    /// Price paid, in lamports.
    pub price_lamports: u64,
    /// Signature of the confirmed payment transaction.
    pub payment_signature: String,
    /// Content-addressed reference into the image store.
    pub image_ref: Option<String>,
    pub link: Option<String>,
    /// Unix timestamp of creation.
    pub created_at: i64,
}

impl Reservation {
    pub fn new(
        rect: Rect,
        owner: String,
        price_lamports: u64,
        payment_signature: String,
        image_ref: Option<String>,
        link: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rect,
            owner,
            price_lamports,
            payment_signature,
            image_ref,
            link,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Persistent store of reservations with the grid's overlap invariant.
///
/// Layout in RocksDB:
/// - `res:{uuid}` -> reservation JSON
/// - `cell:{x:02}:{y:02}` -> owning reservation uuid, one key per covered cell
///
/// `insert` re-checks every covered cell key against the persisted state under
/// the database-wide write lock and then commits the record plus all cell keys
/// in one `WriteBatch`. Two overlapping reservations necessarily contend on at
/// least one shared cell key, and every store handle over the same `Database`
/// serializes on the same lock, so at most one of two racing inserts can
/// commit; the loser gets `Overlap`. The in-memory `DashMap` snapshot only
/// serves the cheap advisory pre-check and grid reads, never the commit
/// decision.
pub struct ReservationStore {
    db: Arc<Database>,
    cache: DashMap<Uuid, Reservation>,
}

impl ReservationStore {
    /// Opens the store and rebuilds the in-memory snapshot from RocksDB.
    pub fn open(db: Arc<Database>) -> Result<Self, ApiError> {
        let cache = DashMap::new();
        for entry in db.inner.prefix_iterator(RESERVATION_PREFIX.as_bytes()) {
            let (key, value) = entry?;
            if !key.starts_with(RESERVATION_PREFIX.as_bytes()) {
                break;
            }
            let reservation: Reservation = serde_json::from_slice(&value)?;
            cache.insert(reservation.id, reservation);
        }
        info!("Loaded {} reservation(s) from disk", cache.len());
        Ok(Self { db, cache })
    }

    fn record_key(id: &Uuid) -> String {
        format!("{}{}", RESERVATION_PREFIX, id)
    }

    fn cell_key(x: u16, y: u16) -> String {
        format!("cell:{:02}:{:02}", x, y)
    }

    /// Advisory overlap check against the in-memory snapshot. Cheap, and
    /// allowed to be stale; the commit in `insert` is the real arbiter.
    pub fn find_conflict(&self, rect: &Rect) -> Option<Uuid> {
        self.cache
            .iter()
            .find(|entry| entry.value().rect.overlaps(rect))
            .map(|entry| *entry.key())
    }

    /// Commits a reservation, enforcing the overlap invariant at the
    /// persistence layer.
    ///
    /// # Errors
    ///
    /// * `ApiError::Overlap` - Some covered cell is already claimed; the
    ///   caller lost a race or skipped the pre-check.
    /// * `ApiError::Database` - RocksDB failure; nothing was committed.
    pub async fn insert(&self, reservation: Reservation) -> Result<(), ApiError> {
        reservation.rect.validate()?;
        let _guard = self.db.lock_writes().await;

        // Re-check against persisted state, not the snapshot: the pre-check
        // and this commit are not atomic together.
        for (x, y) in reservation.rect.cells() {
            if self
                .db
                .inner
                .get(Self::cell_key(x, y).as_bytes())?
                .is_some()
            {
                warn!(
                    "Reservation {} lost cell ({}, {}) to an earlier claim",
                    reservation.id, x, y
                );
                return Err(ApiError::Overlap);
            }
        }

        let mut batch = WriteBatch::default();
        let id_bytes = reservation.id.to_string();
        for (x, y) in reservation.rect.cells() {
            batch.put(Self::cell_key(x, y).as_bytes(), id_bytes.as_bytes());
        }
        batch.put(
            Self::record_key(&reservation.id).as_bytes(),
            serde_json::to_vec(&reservation)?,
        );
        self.db.write_batch(batch)?;

        debug!(
            "Reserved ({}, {}) {}x{} for {}",
            reservation.rect.x,
            reservation.rect.y,
            reservation.rect.width,
            reservation.rect.height,
            reservation.owner
        );
        self.cache.insert(reservation.id, reservation);
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<Reservation> {
        self.cache.get(id).map(|entry| entry.value().clone())
    }

    /// All reservations, unordered. Render source for the canvas.
    pub fn list(&self) -> Vec<Reservation> {
        self.cache
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Updates the image reference and/or link of an existing reservation.
    /// Geometry and ownership never change.
    ///
    /// # Errors
    ///
    /// * `ApiError::NotFound` - No reservation with this id.
    /// * `ApiError::NotOwner` - `caller` does not own the reservation.
    pub async fn update_art(
        &self,
        id: &Uuid,
        caller: &str,
        image_ref: Option<String>,
        link: Option<String>,
    ) -> Result<Reservation, ApiError> {
        let _guard = self.db.lock_writes().await;
        let mut reservation = self.get(id).ok_or(ApiError::NotFound)?;
        if reservation.owner != caller {
            return Err(ApiError::NotOwner);
        }
        if image_ref.is_some() {
            reservation.image_ref = image_ref;
        }
        if link.is_some() {
            reservation.link = link;
        }
        self.db.inner.put(
            Self::record_key(id).as_bytes(),
            serde_json::to_vec(&reservation)?,
        )?;
        self.cache.insert(*id, reservation.clone());
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (ReservationStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(dir.path().to_str().unwrap()).unwrap());
        (ReservationStore::open(db).unwrap(), dir)
    }

    fn reservation(rect: Rect) -> Reservation {
        Reservation::new(
            rect,
            "owner11111111111111111111111111111111111111".to_string(),
            1_000,
            "sig".to_string(),
            None,
            None,
        )
    }

    #[test]
    fn disjoint_rects_do_not_overlap() {
        let a = Rect::new(0, 0, 5, 5);
        let b = Rect::new(10, 10, 5, 5);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn interior_intersection_overlaps() {
        let a = Rect::new(0, 0, 5, 5);
        let b = Rect::new(3, 3, 5, 5);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn containment_overlaps() {
        let outer = Rect::new(0, 0, 10, 10);
        let inner = Rect::new(2, 2, 3, 3);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn shared_edge_does_not_overlap() {
        let a = Rect::new(0, 0, 5, 5);
        let right = Rect::new(5, 0, 5, 5);
        let below = Rect::new(0, 5, 5, 5);
        assert!(!a.overlaps(&right));
        assert!(!a.overlaps(&below));
    }

    #[test]
    fn shared_corner_does_not_overlap() {
        let a = Rect::new(0, 0, 5, 5);
        let diagonal = Rect::new(5, 5, 5, 5);
        assert!(!a.overlaps(&diagonal));
        assert!(!diagonal.overlaps(&a));
    }

    #[test]
    fn valid_geometry_passes() {
        assert!(Rect::new(0, 0, 1, 1).validate().is_ok());
        assert!(Rect::new(99, 99, 1, 1).validate().is_ok());
        assert!(Rect::new(0, 0, 100, 100).validate().is_ok());
        assert!(Rect::new(50, 50, 50, 50).validate().is_ok());
    }

    #[test]
    fn out_of_bounds_geometry_is_rejected() {
        for rect in [
            Rect::new(0, 0, 0, 1),
            Rect::new(0, 0, 1, 0),
            Rect::new(100, 0, 1, 1),
            Rect::new(0, 100, 1, 1),
            Rect::new(99, 0, 2, 1),
            Rect::new(0, 99, 1, 2),
            Rect::new(50, 50, 51, 1),
        ] {
            assert!(
                matches!(rect.validate(), Err(ApiError::InvalidGeometry(_))),
                "{:?} should be invalid",
                rect
            );
        }
    }

    #[tokio::test]
    async fn insert_disjoint_reservations_keeps_invariant() {
        let (store, _dir) = store();
        store.insert(reservation(Rect::new(0, 0, 5, 5))).await.unwrap();
        store.insert(reservation(Rect::new(5, 0, 5, 5))).await.unwrap();
        store.insert(reservation(Rect::new(0, 5, 5, 5))).await.unwrap();

        let all = store.list();
        assert_eq!(all.len(), 3);
        for a in &all {
            for b in &all {
                if a.id != b.id {
                    assert!(!a.rect.overlaps(&b.rect));
                }
            }
        }
    }

    #[tokio::test]
    async fn overlapping_insert_is_rejected() {
        let (store, _dir) = store();
        store.insert(reservation(Rect::new(0, 0, 5, 5))).await.unwrap();
        let result = store.insert(reservation(Rect::new(3, 3, 5, 5))).await;
        assert!(matches!(result, Err(ApiError::Overlap)));
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_overlapping_inserts_exactly_one_wins() {
        let (store, _dir) = store();
        let store = Arc::new(store);

        let a = store.clone();
        let b = store.clone();
        let first = tokio::spawn(async move { a.insert(reservation(Rect::new(0, 0, 5, 5))).await });
        let second =
            tokio::spawn(async move { b.insert(reservation(Rect::new(3, 3, 5, 5))).await });

        let results = [first.await.unwrap(), second.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let overlaps = results
            .iter()
            .filter(|r| matches!(r, Err(ApiError::Overlap)))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(overlaps, 1);
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_through_separate_stores_share_one_arbiter() {
        // Two store handles over the same database, each with its own blind
        // snapshot. The database-wide write lock must still let only one of
        // two overlapping inserts commit.
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(dir.path().to_str().unwrap()).unwrap());
        let store_a = Arc::new(ReservationStore::open(db.clone()).unwrap());
        let store_b = Arc::new(ReservationStore::open(db.clone()).unwrap());

        let a = store_a.clone();
        let b = store_b.clone();
        let first =
            tokio::spawn(async move { a.insert(reservation(Rect::new(0, 0, 60, 60))).await });
        let second =
            tokio::spawn(async move { b.insert(reservation(Rect::new(30, 30, 60, 60))).await });

        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ApiError::Overlap)))
                .count(),
            1
        );

        // A fresh store over the same files sees exactly one reservation.
        let fresh = ReservationStore::open(db).unwrap();
        assert_eq!(fresh.list().len(), 1);
    }

    #[tokio::test]
    async fn find_conflict_sees_committed_reservations() {
        let (store, _dir) = store();
        let existing = reservation(Rect::new(0, 0, 5, 5));
        let existing_id = existing.id;
        store.insert(existing).await.unwrap();

        assert_eq!(store.find_conflict(&Rect::new(3, 3, 5, 5)), Some(existing_id));
        assert_eq!(store.find_conflict(&Rect::new(5, 5, 5, 5)), None);
    }

    #[tokio::test]
    async fn snapshot_is_rebuilt_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        let id;
        {
            let db = Arc::new(Database::new(&path).unwrap());
            let store = ReservationStore::open(db).unwrap();
            let r = reservation(Rect::new(10, 10, 2, 2));
            id = r.id;
            store.insert(r).await.unwrap();
        }
        let db = Arc::new(Database::new(&path).unwrap());
        let store = ReservationStore::open(db).unwrap();
        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.rect, Rect::new(10, 10, 2, 2));
    }

    #[tokio::test]
    async fn update_art_is_owner_gated() {
        let (store, _dir) = store();
        let r = reservation(Rect::new(0, 0, 2, 2));
        let id = r.id;
        let owner = r.owner.clone();
        store.insert(r).await.unwrap();

        let denied = store
            .update_art(&id, "someone-else", Some("img".into()), None)
            .await;
        assert!(matches!(denied, Err(ApiError::NotOwner)));

        let updated = store
            .update_art(&id, &owner, Some("imgref".into()), Some("https://example.com".into()))
            .await
            .unwrap();
        assert_eq!(updated.image_ref.as_deref(), Some("imgref"));
        assert_eq!(updated.link.as_deref(), Some("https://example.com"));
        // geometry untouched
        assert_eq!(updated.rect, Rect::new(0, 0, 2, 2));
    }
}
