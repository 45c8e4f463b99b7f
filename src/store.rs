//! Persistent work store: records, the storage seam, and an in-memory store
//!
//! The enumeration coordinates through three logical tables — the *working*
//! set (this generation's points), the *known* set (every point ever
//! discovered), and the *run-status* task table. [`WorkStore`] captures that
//! contract independently of SQL; [`crate::db::MySqlStore`] implements it
//! over MySQL and [`MemoryStore`] implements it over owned collections for
//! single-process runs and the test battery.
//!
//! ## Invariants
//!
//! - A point's decimal projection is unique in each of *working* and
//!   *known*; duplicate inserts are ignored, never doubled.
//! - `checkout` is mutually exclusive across every caller of the same
//!   store, so a task is leased to at most one client.
//! - `promote_known_to_working` is idempotent.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use crate::point::{Point, PointKey};
use crate::scalar::Ctx;

/// Errors surfaced by a work store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Any failure reported by the database driver.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A cross-worker lock could not be acquired in time.
    #[error("store lock `{0}` unavailable")]
    LockUnavailable(String),
    /// A persisted row could not be interpreted.
    #[error("malformed row: {0}")]
    MalformedRow(String),
}

/// One pivot-point assignment within one `(batch, iteration)`.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task id.
    pub id: i64,
    /// Campaign identifier.
    pub batch_id: i32,
    /// Claiming worker, `None` while the task is available.
    pub client_id: Option<i16>,
    /// Working-set row the pivot point lives in.
    pub point_id: i64,
    /// Generation this task belongs to.
    pub iteration: u8,
    /// Set while a worker holds the lease.
    pub is_running: bool,
    /// Terminal flag; implies `end_time` is set.
    pub is_done: bool,
    /// Whether the worker recorded a failure.
    pub has_error: bool,
    /// Failure detail, if any.
    pub error_info: Option<String>,
    /// Lease acquisition time.
    pub start_time: Option<NaiveDateTime>,
    /// Completion time.
    pub end_time: Option<NaiveDateTime>,
}

/// The three aggregations the root consults before a generation rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStatus {
    /// Highest iteration with a completed task, `None` before any finish.
    pub last_complete_iteration: Option<u8>,
    /// Whether any task is currently leased and unfinished.
    pub is_currently_running: bool,
    /// Whether any task (leased or not) is unfinished.
    pub any_incomplete: bool,
}

impl BatchStatus {
    /// True when nothing is running and nothing is outstanding.
    pub fn idle(&self) -> bool {
        !self.is_currently_running && !self.any_incomplete
    }
}

/// Storage contract shared by the MySQL and in-memory stores.
#[allow(async_fn_in_trait)]
pub trait WorkStore {
    /// Upserts one point into the known set. Returns 1 if the point was
    /// added, 0 if its projection already existed.
    async fn insert_known(&self, point: &Point) -> Result<u64, StoreError>;

    /// Upserts a batch of points into the known set in a single
    /// transaction, holding the cross-worker known-set lease for its
    /// duration. Returns the number of rows affected.
    async fn insert_many_known(&self, batch: &[Point]) -> Result<u64, StoreError>;

    /// Loads working rows with `id >= after`, ordered by the `(x, y)`
    /// rendering, each carrying its persistent id.
    async fn load_working_after(&self, ctx: &Ctx, after: i64) -> Result<Vec<Point>, StoreError>;

    /// Copies every known row into the working set, stamping
    /// `iteration_origin`; rows already present are left untouched.
    async fn promote_known_to_working(&self, iteration: u8) -> Result<(), StoreError>;

    /// Creates one available task per working row for the given batch and
    /// iteration. Returns the number of tasks created.
    async fn seed_tasks(&self, batch_id: i32, iteration: u8) -> Result<u64, StoreError>;

    /// Under store-wide mutual exclusion, claims the available task with
    /// the smallest `point_id` for this batch, setting `client_id`,
    /// `is_running`, and `start_time`. Returns `None` when no task is
    /// available.
    async fn checkout(&self, batch_id: i32, client_id: i16) -> Result<Option<Task>, StoreError>;

    /// Marks a task finished: `is_running = false`, `is_done = true`,
    /// `end_time = now`, and persists the record.
    async fn checkin(&self, task: &mut Task) -> Result<(), StoreError>;

    /// Computes the rollover aggregations for a batch.
    async fn batch_status(&self, batch_id: i32) -> Result<BatchStatus, StoreError>;

    /// Loads every known point ordered by the `(x, y)` rendering.
    async fn load_known(&self, ctx: &Ctx) -> Result<Vec<Point>, StoreError>;
}

/// Shared references delegate, so several workers can drive one store.
impl<S: WorkStore> WorkStore for &S {
    async fn insert_known(&self, point: &Point) -> Result<u64, StoreError> {
        (**self).insert_known(point).await
    }

    async fn insert_many_known(&self, batch: &[Point]) -> Result<u64, StoreError> {
        (**self).insert_many_known(batch).await
    }

    async fn load_working_after(&self, ctx: &Ctx, after: i64) -> Result<Vec<Point>, StoreError> {
        (**self).load_working_after(ctx, after).await
    }

    async fn promote_known_to_working(&self, iteration: u8) -> Result<(), StoreError> {
        (**self).promote_known_to_working(iteration).await
    }

    async fn seed_tasks(&self, batch_id: i32, iteration: u8) -> Result<u64, StoreError> {
        (**self).seed_tasks(batch_id, iteration).await
    }

    async fn checkout(&self, batch_id: i32, client_id: i16) -> Result<Option<Task>, StoreError> {
        (**self).checkout(batch_id, client_id).await
    }

    async fn checkin(&self, task: &mut Task) -> Result<(), StoreError> {
        (**self).checkin(task).await
    }

    async fn batch_status(&self, batch_id: i32) -> Result<BatchStatus, StoreError> {
        (**self).batch_status(batch_id).await
    }

    async fn load_known(&self, ctx: &Ctx) -> Result<Vec<Point>, StoreError> {
        (**self).load_known(ctx).await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Point row as persisted: the fingerprint pair is the stored coordinate
/// text, exactly like the string columns of the MySQL tables.
#[derive(Debug, Clone)]
struct PointRow {
    id: i64,
    iteration_origin: u8,
}

#[derive(Debug, Default)]
struct Tables {
    /// Keyed by fingerprint; `BTreeMap` iteration *is* the `(x, y)` order.
    working: BTreeMap<PointKey, PointRow>,
    known: BTreeMap<PointKey, PointRow>,
    tasks: Vec<Task>,
    next_working_id: i64,
    next_known_id: i64,
    next_task_id: i64,
}

/// A [`WorkStore`] over owned collections behind one async mutex. The
/// mutex doubles as the checkout lock: every operation is serialized, which
/// is a strictly stronger guarantee than the table contract requires.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the task table, for diagnostics and tests.
    pub async fn tasks(&self) -> Vec<Task> {
        self.tables.lock().await.tasks.clone()
    }

    /// Number of known points.
    pub async fn known_len(&self) -> usize {
        self.tables.lock().await.known.len()
    }

    /// Number of working points.
    pub async fn working_len(&self) -> usize {
        self.tables.lock().await.working.len()
    }
}

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

impl WorkStore for MemoryStore {
    async fn insert_known(&self, point: &Point) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(insert_known_row(&mut tables, point.key().clone()))
    }

    async fn insert_many_known(&self, batch: &[Point]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut affected = 0;
        for point in batch {
            affected += insert_known_row(&mut tables, point.key().clone());
        }
        Ok(affected)
    }

    async fn load_working_after(&self, ctx: &Ctx, after: i64) -> Result<Vec<Point>, StoreError> {
        let tables = self.tables.lock().await;
        let mut out = Vec::new();
        for (key, row) in &tables.working {
            if row.id < after {
                continue;
            }
            let point = Point::from_row(ctx, &key.x, &key.y, row.id)
                .map_err(|e| StoreError::MalformedRow(format!("working row {}: {e}", row.id)))?;
            out.push(point);
        }
        Ok(out)
    }

    async fn promote_known_to_working(&self, iteration: u8) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let known: Vec<PointKey> = tables.known.keys().cloned().collect();
        for key in known {
            if tables.working.contains_key(&key) {
                continue;
            }
            let id = tables.next_working_id + 1;
            tables.next_working_id = id;
            tables.working.insert(key, PointRow { id, iteration_origin: iteration });
        }
        Ok(())
    }

    async fn seed_tasks(&self, batch_id: i32, iteration: u8) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let point_ids: Vec<i64> = tables.working.values().map(|row| row.id).collect();
        let mut created = 0;
        for point_id in point_ids {
            let id = tables.next_task_id + 1;
            tables.next_task_id = id;
            tables.tasks.push(Task {
                id,
                batch_id,
                client_id: None,
                point_id,
                iteration,
                is_running: false,
                is_done: false,
                has_error: false,
                error_info: None,
                start_time: None,
                end_time: None,
            });
            created += 1;
        }
        Ok(created)
    }

    async fn checkout(&self, batch_id: i32, client_id: i16) -> Result<Option<Task>, StoreError> {
        // Holding the table mutex for the whole select-then-claim is the
        // in-memory equivalent of the status-table write lock.
        let mut tables = self.tables.lock().await;
        let candidate = tables
            .tasks
            .iter_mut()
            .filter(|t| t.batch_id == batch_id && t.client_id.is_none())
            .min_by_key(|t| t.point_id);
        Ok(candidate.map(|task| {
            task.client_id = Some(client_id);
            task.is_running = true;
            task.start_time = Some(now());
            task.clone()
        }))
    }

    async fn checkin(&self, task: &mut Task) -> Result<(), StoreError> {
        task.is_running = false;
        task.is_done = true;
        task.end_time = Some(now());
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.tasks.iter_mut().find(|t| t.id == task.id) {
            *row = task.clone();
        }
        Ok(())
    }

    async fn batch_status(&self, batch_id: i32) -> Result<BatchStatus, StoreError> {
        let tables = self.tables.lock().await;
        let batch = tables.tasks.iter().filter(|t| t.batch_id == batch_id);
        let mut status = BatchStatus {
            last_complete_iteration: None,
            is_currently_running: false,
            any_incomplete: false,
        };
        for task in batch {
            if task.is_done {
                let best = status.last_complete_iteration.unwrap_or(0);
                if task.iteration >= best {
                    status.last_complete_iteration = Some(task.iteration);
                }
            } else {
                status.any_incomplete = true;
                if task.is_running {
                    status.is_currently_running = true;
                }
            }
        }
        Ok(status)
    }

    async fn load_known(&self, ctx: &Ctx) -> Result<Vec<Point>, StoreError> {
        let tables = self.tables.lock().await;
        let mut out = Vec::new();
        for (key, row) in &tables.known {
            let point = Point::from_row(ctx, &key.x, &key.y, row.id)
                .map_err(|e| StoreError::MalformedRow(format!("known row {}: {e}", row.id)))?;
            out.push(point);
        }
        Ok(out)
    }
}

fn insert_known_row(tables: &mut Tables, key: PointKey) -> u64 {
    if tables.known.contains_key(&key) {
        return 0;
    }
    let id = tables.next_known_id + 1;
    tables.next_known_id = id;
    tables.known.insert(key, PointRow { id, iteration_origin: 0 });
    1
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::new(200, "1e-20", 60).unwrap()
    }

    #[tokio::test]
    async fn known_insert_ignores_duplicates() {
        let c = ctx();
        let store = MemoryStore::new();
        let p = Point::from_i64(&c, 1, 2);

        assert_eq!(store.insert_known(&p).await.unwrap(), 1);
        assert_eq!(store.insert_known(&p).await.unwrap(), 0);

        let near = Point::parse(&c, "1.0", "2.0").unwrap();
        assert_eq!(store.insert_known(&near).await.unwrap(), 0);
        assert_eq!(store.known_len().await, 1);
    }

    #[tokio::test]
    async fn promotion_is_idempotent_and_ordered() {
        let c = ctx();
        let store = MemoryStore::new();
        let pts = [
            Point::from_i64(&c, 1, 0),
            Point::from_i64(&c, 0, 0),
            Point::from_i64(&c, 0, 1),
        ];
        assert_eq!(store.insert_many_known(&pts).await.unwrap(), 3);

        store.promote_known_to_working(1).await.unwrap();
        let first = store.load_working_after(&c, 0).await.unwrap();
        assert_eq!(first.len(), 3);

        // Promotion of the identical known set changes nothing.
        store.promote_known_to_working(2).await.unwrap();
        let second = store.load_working_after(&c, 0).await.unwrap();
        assert_eq!(second.len(), 3);
        let ids: Vec<_> = first.iter().map(|p| p.id).collect();
        let ids2: Vec<_> = second.iter().map(|p| p.id).collect();
        assert_eq!(ids, ids2);

        // Rows come back in (x, y) order with ids attached.
        assert!(second.windows(2).all(|w| w[0].key() < w[1].key()));
        assert!(second.iter().all(|p| p.id.is_some() && p.in_store));
    }

    #[tokio::test]
    async fn incremental_working_loads_only_new_rows() {
        let c = ctx();
        let store = MemoryStore::new();
        store.insert_known(&Point::from_i64(&c, 0, 0)).await.unwrap();
        store.promote_known_to_working(1).await.unwrap();
        let first = store.load_working_after(&c, 0).await.unwrap();
        let seen = first.iter().filter_map(|p| p.id).max().unwrap();

        store.insert_known(&Point::from_i64(&c, 5, 5)).await.unwrap();
        store.promote_known_to_working(2).await.unwrap();
        let fresh = store.load_working_after(&c, seen + 1).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0], Point::from_i64(&c, 5, 5));
    }

    #[tokio::test]
    async fn checkout_leases_each_task_once() {
        let c = ctx();
        let store = MemoryStore::new();
        for v in 0..3 {
            store.insert_known(&Point::from_i64(&c, v, 0)).await.unwrap();
        }
        store.promote_known_to_working(1).await.unwrap();
        assert_eq!(store.seed_tasks(9, 1).await.unwrap(), 3);

        let a = store.checkout(9, 0).await.unwrap().unwrap();
        let b = store.checkout(9, 1).await.unwrap().unwrap();
        let d = store.checkout(9, 2).await.unwrap().unwrap();
        assert!(store.checkout(9, 3).await.unwrap().is_none());

        // Distinct tasks, claimed smallest point_id first.
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, d.id);
        assert!(a.point_id < b.point_id && b.point_id < d.point_id);
        assert!(a.is_running && a.start_time.is_some());

        // A different batch sees nothing.
        assert!(store.checkout(8, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkin_completes_the_task() {
        let c = ctx();
        let store = MemoryStore::new();
        store.insert_known(&Point::from_i64(&c, 0, 0)).await.unwrap();
        store.promote_known_to_working(1).await.unwrap();
        store.seed_tasks(1, 1).await.unwrap();

        let mut task = store.checkout(1, 0).await.unwrap().unwrap();
        let mid = store.batch_status(1).await.unwrap();
        assert!(mid.is_currently_running && mid.any_incomplete);

        store.checkin(&mut task).await.unwrap();
        assert!(task.is_done && !task.is_running && task.end_time.is_some());

        let done = store.batch_status(1).await.unwrap();
        assert!(done.idle());
        assert_eq!(done.last_complete_iteration, Some(1));
    }

    #[tokio::test]
    async fn batch_status_starts_empty() {
        let store = MemoryStore::new();
        let status = store.batch_status(1).await.unwrap();
        assert_eq!(status.last_complete_iteration, None);
        assert!(status.idle());
    }
}
