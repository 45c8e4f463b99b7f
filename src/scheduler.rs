//! Iteration coordinator: the worker loops and the expansion driver
//!
//! A [`Worker`] repeatedly leases a task naming one *pivot point*, expands
//! the working set around that pivot, flushes its dedup cache, and checks
//! the task back in. The root worker (client id 0) additionally seeds the
//! campaign at cold start and performs the generation rollover: when no
//! task is left and none is outstanding it promotes known → working and
//! emits the next generation's tasks, or terminates once the generation
//! limit is reached.
//!
//! ## Invariants
//!
//! - Strict generation barrier: rollover is gated on `batch_status`
//!   reporting nothing running and nothing incomplete, so no worker starts
//!   iteration `k+1` before every task of iteration `k` is done.
//! - The working list is kept sorted by the fingerprint `(x, y)` order
//!   across incremental loads, so every worker sees the same total order
//!   and the ordering tiebreak partitions pair coverage without gaps.
//! - A storage error aborts the run; the leased task stays
//!   `is_running = true` (no recovery at this layer).

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bound;
use crate::cache::{Offer, PointCache};
use crate::circle::{circle_circle, circle_line, Circle};
use crate::config::Config;
use crate::line::{line_line, Line};
use crate::point::{self, Intersections};
use crate::scalar::Ctx;
use crate::seed::{self, SeedError};
use crate::store::{StoreError, Task, WorkStore};
use crate::ROOT_CLIENT_ID;

/// Errors that abort a worker run.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The store failed; the store is authoritative, so this is fatal.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The seed file could not be read at root cold start.
    #[error(transparent)]
    Seed(#[from] SeedError),
    /// A leased task names a point the working set does not contain.
    #[error("task {task_id} names point {point_id} missing from the working set")]
    PivotMissing {
        /// The task id.
        task_id: i64,
        /// The missing working-set row.
        point_id: i64,
    },
    /// The final dump could not be written.
    #[error("writing {path}: {source}")]
    Dump {
        /// Dump destination.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}

/// How a worker run ended. All three map to exit code 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Root reached the generation limit.
    Completed,
    /// An ordinary worker found no task to lease.
    NoWork,
    /// The benchmark budget expired; the current task was left running.
    BenchmarkExpired,
}

/// Worker-facing settings distilled from the configuration file.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// This worker's identity; [`ROOT_CLIENT_ID`] is the root.
    pub client_id: i16,
    /// Campaign identifier.
    pub batch_id: i32,
    /// Generation limit.
    pub max_iterations: u8,
    /// Dedup cache capacity.
    pub max_point_cache: usize,
    /// Seed file, read by the root at cold start.
    pub starting_points_file: PathBuf,
    /// Seed reader buffer size.
    pub seed_line_buffer: usize,
    /// Status cadence, `None` disabled.
    pub update_interval: Option<Duration>,
    /// Checkpoint cadence, `None` disabled.
    pub checkpoint_interval: Option<Duration>,
    /// Wallclock budget, `None` disabled.
    pub benchmark_budget: Option<Duration>,
    /// Digits for human-facing output.
    pub print_digits: usize,
    /// Final dump destination, `None` disabled.
    pub output_file: Option<PathBuf>,
    /// How long the root sleeps while other workers are mid-task.
    pub idle_wait: Duration,
}

impl RunSettings {
    /// Distills the worker settings from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let app = &config.app;
        Self {
            client_id: app.client_id,
            batch_id: app.batch_id,
            max_iterations: app.max_iterations,
            max_point_cache: app.max_point_cache,
            starting_points_file: app.starting_points_file.clone(),
            seed_line_buffer: app.starting_points_file_line_buffer,
            update_interval: interval(app.update_interval_sec),
            checkpoint_interval: interval(app.checkpoint_interval_sec),
            benchmark_budget: interval(app.benchmark_time_sec),
            print_digits: app.print_digits,
            output_file: if app.write_points_to_file {
                app.output_filename.clone()
            } else {
                None
            },
            idle_wait: Duration::from_secs(5),
        }
    }
}

fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// How one leased task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskEnd {
    Done,
    Budget,
}

/// What the root decided while idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootStep {
    Waited,
    RolledOver,
    Finished,
}

#[derive(Debug, Default, Clone, Copy)]
struct ExpansionStats {
    emitted: u64,
    fresh: u64,
}

/// Loop position snapshot handed to the pacing clock.
struct Probe<'a> {
    pivot: usize,
    i2: usize,
    i3: usize,
    i4: usize,
    working: usize,
    cached: usize,
    stats: &'a ExpansionStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pace {
    Continue,
    Budget,
}

/// Monotonic-clock pacing: status lines, checkpoint markers, and the
/// voluntary benchmark deadline.
#[derive(Debug)]
struct Pacing {
    started: Instant,
    last_status: Instant,
    last_checkpoint: Instant,
    update_interval: Option<Duration>,
    checkpoint_interval: Option<Duration>,
    benchmark_budget: Option<Duration>,
}

impl Pacing {
    fn new(settings: &RunSettings) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_status: now,
            last_checkpoint: now,
            update_interval: settings.update_interval,
            checkpoint_interval: settings.checkpoint_interval,
            benchmark_budget: settings.benchmark_budget,
        }
    }

    fn tick(&mut self, probe: &Probe<'_>) -> Pace {
        let now = Instant::now();
        if let Some(every) = self.update_interval {
            if now.duration_since(self.last_status) >= every {
                info!(
                    elapsed_sec = now.duration_since(self.started).as_secs(),
                    pivot = probe.pivot,
                    i2 = probe.i2,
                    i3 = probe.i3,
                    i4 = probe.i4,
                    working = probe.working,
                    cached = probe.cached,
                    emitted = probe.stats.emitted,
                    fresh = probe.stats.fresh,
                    "status"
                );
                self.last_status = now;
            }
        }
        if let Some(every) = self.checkpoint_interval {
            if now.duration_since(self.last_checkpoint) >= every {
                info!(
                    target: "checkpoint",
                    pivot = probe.pivot,
                    i2 = probe.i2,
                    i3 = probe.i3,
                    i4 = probe.i4,
                    "checkpoint"
                );
                self.last_checkpoint = now;
            }
        }
        if let Some(budget) = self.benchmark_budget {
            if now.duration_since(self.started) >= budget {
                return Pace::Budget;
            }
        }
        Pace::Continue
    }
}

/// One worker process: the lease → expand → checkin loop over a store.
#[derive(Debug)]
pub struct Worker<S> {
    settings: RunSettings,
    ctx: Ctx,
    store: S,
    cache: PointCache,
    /// The working list, sorted by fingerprint across incremental loads.
    working: Vec<point::Point>,
    /// Next row id to ask the store for.
    next_load_id: i64,
    pacing: Pacing,
}

impl<S: WorkStore> Worker<S> {
    /// Builds a worker over a store.
    pub fn new(settings: RunSettings, ctx: Ctx, store: S) -> Self {
        let cache = PointCache::new(settings.max_point_cache);
        let pacing = Pacing::new(&settings);
        Self {
            settings,
            ctx,
            store,
            cache,
            working: Vec::new(),
            next_load_id: 0,
            pacing,
        }
    }

    /// Whether this worker carries root responsibilities.
    pub fn is_root(&self) -> bool {
        self.settings.client_id == ROOT_CLIENT_ID
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs the worker to completion.
    pub async fn run(&mut self) -> Result<Outcome, WorkerError> {
        if self.is_root() {
            self.seed_if_cold().await?;
        }

        loop {
            let leased = self
                .store
                .checkout(self.settings.batch_id, self.settings.client_id)
                .await?;
            match leased {
                Some(mut task) => {
                    info!(
                        task = task.id,
                        point = task.point_id,
                        iteration = task.iteration,
                        "task checked out"
                    );
                    match self.process_task(&task).await? {
                        TaskEnd::Done => {
                            self.store.checkin(&mut task).await?;
                            debug!(task = task.id, "task checked in");
                        }
                        TaskEnd::Budget => {
                            info!(task = task.id, "benchmark budget exhausted");
                            return Ok(Outcome::BenchmarkExpired);
                        }
                    }
                }
                None if self.is_root() => match self.root_idle().await? {
                    RootStep::Waited | RootStep::RolledOver => {}
                    RootStep::Finished => {
                        self.final_dump().await?;
                        return Ok(Outcome::Completed);
                    }
                },
                None => {
                    info!("no task available; exiting");
                    return Ok(Outcome::NoWork);
                }
            }
        }
    }

    /// Root cold start: an empty working set means the campaign has never
    /// rolled over, so the seed file populates the known set.
    async fn seed_if_cold(&mut self) -> Result<(), WorkerError> {
        self.refresh_working().await?;
        if !self.working.is_empty() {
            return Ok(());
        }
        let points = seed::read_starting_points(
            &self.ctx,
            &self.settings.starting_points_file,
            self.settings.seed_line_buffer,
        )?;
        let added = self.store.insert_many_known(&points).await?;
        info!(read = points.len(), added, "seeded known set from file");
        Ok(())
    }

    /// Pulls rows the store gained since the last load and merges them
    /// into the sorted working list.
    async fn refresh_working(&mut self) -> Result<(), WorkerError> {
        let rows = self
            .store
            .load_working_after(&self.ctx, self.next_load_id)
            .await?;
        for row in rows {
            if let Some(id) = row.id {
                if id >= self.next_load_id {
                    self.next_load_id = id + 1;
                }
            }
            match self
                .working
                .binary_search_by(|probe| probe.key().cmp(row.key()))
            {
                Ok(_) => {}
                Err(position) => self.working.insert(position, row),
            }
        }
        Ok(())
    }

    async fn process_task(&mut self, task: &Task) -> Result<TaskEnd, WorkerError> {
        self.refresh_working().await?;
        let pivot = self
            .working
            .iter()
            .position(|p| p.id == Some(task.point_id))
            .ok_or(WorkerError::PivotMissing {
                task_id: task.id,
                point_id: task.point_id,
            })?;
        let end = self.drive_expansion(pivot).await?;
        let flushed = self.cache.flush(&self.store).await?;
        debug!(task = task.id, flushed, "cache flushed");
        Ok(end)
    }

    /// The expansion around one pivot.
    ///
    /// The pivot pairs with every later partner to form the *left* frame
    /// (one line, two pair-distance circles); each left frame is crossed
    /// with every ordered pair from the pivot onward as the *right* frame.
    /// The three skip tests are load-bearing: the ordering tiebreak keeps
    /// each frame pair from being counted twice, and the distance tests
    /// keep degenerate and identical frames out.
    async fn drive_expansion(&mut self, pivot: usize) -> Result<TaskEnd, WorkerError> {
        let Self {
            ref ctx,
            ref working,
            ref store,
            ref mut cache,
            ref mut pacing,
            ..
        } = *self;

        let count = working.len();
        let p1 = &working[pivot];
        let mut stats = ExpansionStats::default();

        for i2 in pivot + 1..count {
            let p2 = &working[i2];
            let d1 = point::distance(ctx, p1, p2);
            if ctx.is_zero(&d1) {
                continue;
            }

            let left_line = Line::through(p1, p2);
            let left_a = Circle::new(p1, d1.clone());
            let left_b = Circle::new(p2, d1);

            // Self intersections for the left frame.
            offer_all(cache, store, circle_line(ctx, &left_a, &left_line), &mut stats).await?;
            offer_all(cache, store, circle_line(ctx, &left_b, &left_line), &mut stats).await?;
            offer_all(cache, store, circle_circle(ctx, &left_a, &left_b), &mut stats).await?;

            for i3 in pivot..count {
                for i4 in i3 + 1..count {
                    // Pairs on the pivot up to (pivot, i2) were already
                    // covered with the roles reversed.
                    if i3 == pivot && i4 <= i2 {
                        continue;
                    }

                    let probe = Probe {
                        pivot,
                        i2,
                        i3,
                        i4,
                        working: count,
                        cached: cache.len(),
                        stats: &stats,
                    };
                    if pacing.tick(&probe) == Pace::Budget {
                        return Ok(TaskEnd::Budget);
                    }

                    let p3 = &working[i3];
                    let p4 = &working[i4];
                    let d2 = point::distance(ctx, p3, p4);
                    if ctx.is_zero(&d2) {
                        continue;
                    }
                    // Identical frame: same endpoints within ε.
                    if ctx.is_zero(&point::distance(ctx, p1, p3))
                        && ctx.is_zero(&point::distance(ctx, p2, p4))
                    {
                        continue;
                    }

                    let right_line = Line::through(p3, p4);
                    let right_a = Circle::new(p3, d2.clone());
                    let right_b = Circle::new(p4, d2);

                    // The nine cross intersections.
                    offer_all(cache, store, line_line(ctx, &left_line, &right_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_line(ctx, &right_a, &left_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_line(ctx, &right_b, &left_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_line(ctx, &left_a, &right_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_circle(ctx, &left_a, &right_a), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_circle(ctx, &left_a, &right_b), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_line(ctx, &left_b, &right_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_circle(ctx, &left_b, &right_a), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_circle(ctx, &left_b, &right_b), &mut stats)
                        .await?;

                    // Self intersections for the right frame.
                    offer_all(cache, store, circle_line(ctx, &right_a, &right_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_line(ctx, &right_b, &right_line), &mut stats)
                        .await?;
                    offer_all(cache, store, circle_circle(ctx, &right_a, &right_b), &mut stats)
                        .await?;
                }
            }
        }

        debug!(emitted = stats.emitted, fresh = stats.fresh, "expansion complete");
        Ok(TaskEnd::Done)
    }

    /// Root decision when no task is available: wait while others are
    /// mid-task, terminate past the generation limit, otherwise roll the
    /// generation over.
    async fn root_idle(&mut self) -> Result<RootStep, WorkerError> {
        let status = self.store.batch_status(self.settings.batch_id).await?;
        if status.is_currently_running || status.any_incomplete {
            debug!("tasks outstanding; waiting");
            tokio::time::sleep(self.settings.idle_wait).await;
            return Ok(RootStep::Waited);
        }

        let last = status.last_complete_iteration.unwrap_or(0);
        let Some(next) = last.checked_add(1) else {
            return Ok(RootStep::Finished);
        };
        if next > self.settings.max_iterations {
            info!(completed = last, "generation limit reached");
            return Ok(RootStep::Finished);
        }

        info!(iteration = next, "generation rollover");
        self.store.promote_known_to_working(next).await?;
        let created = self.store.seed_tasks(self.settings.batch_id, next).await?;
        let ceiling = bound::next_upper_bound(&rug::Integer::from(created));
        info!(iteration = next, tasks = created, ceiling = %ceiling, "seeded generation");
        Ok(RootStep::RolledOver)
    }

    /// Writes the known set to the configured output file, one `x,y` pair
    /// per line in `(x, y)` order.
    async fn final_dump(&self) -> Result<(), WorkerError> {
        let Some(path) = self.settings.output_file.as_deref() else {
            return Ok(());
        };
        let points = self.store.load_known(&self.ctx).await?;
        let digits = self.settings.print_digits;
        let mut text = String::new();
        for p in &points {
            let _ = writeln!(text, "{:.*},{:.*}", digits, p.x(), digits, p.y());
        }
        std::fs::write(path, text).map_err(|source| WorkerError::Dump {
            path: path.to_owned(),
            source,
        })?;
        info!(count = points.len(), path = %path.display(), "wrote known points");
        Ok(())
    }
}

/// Offers every intersection point to the cache.
async fn offer_all<S: WorkStore>(
    cache: &mut PointCache,
    store: &S,
    found: Intersections,
    stats: &mut ExpansionStats,
) -> Result<(), StoreError> {
    for p in found {
        stats.emitted += 1;
        if cache.offer(store, p).await? != Offer::Seen {
            stats.fresh += 1;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
