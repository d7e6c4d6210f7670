//! Simulation controller and worker pool.
//!
//! The grid is split into horizontal partitions, one worker thread per
//! partition. Each generation a worker reads the published buffer, writes
//! its own rows of the back buffer, stages the coordinates its change policy
//! selects, and meets the others at the generation barrier. The barrier's
//! publish action flips the buffers, hands the staged change list to the
//! consumer, and decides once per cycle whether the pool should keep going,
//! so workers that ran a generation all leave on the same cycle. A stop
//! landing while the pool is quiescent is honored at the pause gate
//! instead, under the same lock that counts workers past the gate, so the
//! barrier is never left waiting for a worker that already exited.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::barrier::GenerationBarrier;
use crate::grid::{count_neighbors, next_state, CellState, Grid};

/// Construction-time failures. Steady-state simulation has no recoverable
/// errors; everything here prevents the worker pool from starting at all.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("grid dimensions must be non-zero, got {width}x{height}")]
    EmptyGrid { width: usize, height: usize },
    #[error("seed density must be within 0.0..=1.0, got {0}")]
    InvalidDensity(f64),
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("worker count {workers} exceeds grid height {height}")]
    TooManyWorkers { workers: usize, height: usize },
    #[error("simulation threads already started")]
    AlreadyStarted,
    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}

/// Contiguous row range `[start, end)` owned by exactly one worker for
/// writing. Computed once at seed time, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: usize,
    pub end: usize,
}

impl Partition {
    pub fn rows(&self) -> usize {
        self.end - self.start
    }
}

/// Splits `height` rows across `workers` partitions. Rows divide evenly;
/// the last partition absorbs the remainder. Every partition gets at least
/// one row, so a worker count above the grid height is rejected.
pub fn compute_partitions(height: usize, workers: usize) -> Result<Vec<Partition>, EngineError> {
    if workers == 0 {
        return Err(EngineError::NoWorkers);
    }
    if workers > height {
        return Err(EngineError::TooManyWorkers { workers, height });
    }

    let rows_per_worker = height / workers;
    Ok((0..workers)
        .map(|i| {
            let start = i * rows_per_worker;
            let end = if i == workers - 1 {
                height
            } else {
                start + rows_per_worker
            };
            Partition { start, end }
        })
        .collect())
}

/// Which cells a generation reports to the change-list consumer. The source
/// material disagrees with itself between revisions, so the policy is
/// configurable rather than fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangePolicy {
    /// Cells whose new state differs from the last published state. Entries
    /// compose as toggles, so a consumer that drains late still converges.
    #[default]
    Changed,
    /// Only Dead to Alive transitions.
    NewlyAlive,
    /// Every Alive cell, every generation.
    AllAlive,
}

/// A changed-cell coordinate handed to the consumer at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellPosition {
    pub x: usize,
    pub y: usize,
}

/// Observable rectangle in grid coordinates. Owned by the input layer; the
/// engine only reads it to keep the change list bounded by the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Viewport {
    /// A viewport covering the whole grid.
    pub fn covering(width: usize, height: usize) -> Viewport {
        Viewport {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Everything needed to seed a world.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub width: usize,
    pub height: usize,
    /// RNG seed for reproducible worlds; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Probability that a seeded cell starts Alive.
    pub density: f64,
    pub workers: usize,
    pub policy: ChangePolicy,
    pub start_paused: bool,
    /// Stop on its own after this many generations. Used for bounded runs.
    pub max_generations: Option<u64>,
    /// Minimum wall-clock spacing between generations; `None` free-runs.
    pub generation_interval: Option<Duration>,
}

impl SimConfig {
    pub fn new(width: usize, height: usize) -> SimConfig {
        SimConfig {
            width,
            height,
            seed: None,
            density: 0.5,
            workers: height.min(4),
            policy: ChangePolicy::default(),
            start_paused: false,
            max_generations: None,
            generation_interval: None,
        }
    }
}

struct RunState {
    running: bool,
    stopping: bool,
    /// Workers currently past the pause gate, counted under this mutex.
    /// Non-zero means a generation is in flight and the barrier expects
    /// the full pool.
    in_flight: usize,
}

/// State shared between the controller, the workers and the publish action.
struct Shared {
    grid: Grid,
    /// Appended by workers during a generation, under a lock held only for
    /// the append.
    staged: Mutex<Vec<CellPosition>>,
    /// Handed off at publish; drained by the consumer.
    published: Mutex<Vec<CellPosition>>,
    viewport: Mutex<Viewport>,
    run: Mutex<RunState>,
    paused: Condvar,
    /// Set by the publish action on the pool's final cycle.
    exit: AtomicBool,
    generation: AtomicU64,
    max_generations: Option<u64>,
    generation_interval: Option<Duration>,
}

/// Runs exactly once per generation, on the last worker to arrive at the
/// barrier, before any worker is released.
fn publish(shared: &Shared) {
    {
        let mut staged = shared.staged.lock().unwrap();
        let mut published = shared.published.lock().unwrap();
        // Flipping under the published-list lock lets a consumer drain
        // and snapshot as one step, with no generation slipping between.
        shared.grid.flip();
        published.append(&mut staged);
    }

    let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;

    let stopping = shared.run.lock().unwrap().stopping;
    let limit_reached = shared
        .max_generations
        .map_or(false, |limit| generation >= limit);
    if stopping || limit_reached {
        shared.exit.store(true, Ordering::Release);
    }

    trace!(generation, "generation published");
}

fn worker_loop(
    shared: Arc<Shared>,
    barrier: Arc<GenerationBarrier>,
    partition: Partition,
    policy: ChangePolicy,
) {
    let width = shared.grid.width();
    let mut local = Vec::new();

    loop {
        {
            let mut run = shared.run.lock().unwrap();
            while !run.running && !run.stopping {
                run = shared.paused.wait(run).unwrap();
            }
            // Leaving from the gate is only safe when no peer is past it:
            // anyone in flight will block at the barrier expecting the
            // full pool. The count shares the gate's mutex, so once a
            // stop is pending and the count reads zero, no worker can
            // slip past the gate again and every remaining worker takes
            // this same exit.
            if run.stopping && run.in_flight == 0 {
                break;
            }
            run.in_flight += 1;
        }

        let viewport = *shared.viewport.lock().unwrap();
        let (prev, next) = shared.grid.generation_buffers();

        for y in partition.start..partition.end {
            for x in 0..width {
                let live_neighbors = count_neighbors(prev, x, y);
                let old_state = prev.get(x, y);
                let new_state = next_state(old_state, live_neighbors);
                next.set(x, y, new_state);

                let record = match policy {
                    ChangePolicy::Changed => new_state != old_state,
                    ChangePolicy::NewlyAlive => {
                        old_state == CellState::Dead && new_state == CellState::Alive
                    }
                    ChangePolicy::AllAlive => new_state == CellState::Alive,
                };
                if record && viewport.contains(x, y) {
                    local.push(CellPosition { x, y });
                }
            }
        }

        if !local.is_empty() {
            shared.staged.lock().unwrap().append(&mut local);
        }

        barrier.wait();
        shared.run.lock().unwrap().in_flight -= 1;

        if shared.exit.load(Ordering::Acquire) {
            break;
        }

        if let Some(interval) = shared.generation_interval {
            thread::sleep(interval);
        }
    }
}

/// Owns the grid, the worker pool and the run/pause/stop lifecycle.
///
/// Lifecycle: seeded by [`Simulation::new`], threads spawned by
/// [`Simulation::start`] (legal exactly once), paused and resumed by
/// [`Simulation::toggle_run`], and shut down by [`Simulation::stop`], which
/// joins every worker before returning. Dropping the controller stops it.
pub struct Simulation {
    shared: Arc<Shared>,
    barrier: Arc<GenerationBarrier>,
    partitions: Vec<Partition>,
    policy: ChangePolicy,
    start_paused: bool,
    workers: Vec<JoinHandle<()>>,
    started: bool,
}

impl Simulation {
    /// Seeds a world: validates the configuration, allocates both cell
    /// buffers, fills the published buffer with a random draw, and computes
    /// the partitions. No threads run yet.
    pub fn new(config: SimConfig) -> Result<Simulation, EngineError> {
        let SimConfig {
            width,
            height,
            seed,
            density,
            workers,
            policy,
            start_paused,
            max_generations,
            generation_interval,
        } = config;

        if width == 0 || height == 0 {
            return Err(EngineError::EmptyGrid { width, height });
        }
        if !(0.0..=1.0).contains(&density) {
            return Err(EngineError::InvalidDensity(density));
        }
        let partitions = compute_partitions(height, workers)?;

        let grid = Grid::new(width, height);
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        grid.front().randomize(&mut rng, density);

        let shared = Arc::new(Shared {
            grid,
            staged: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            viewport: Mutex::new(Viewport::covering(width, height)),
            run: Mutex::new(RunState {
                running: false,
                stopping: false,
                in_flight: 0,
            }),
            paused: Condvar::new(),
            exit: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            max_generations,
            generation_interval,
        });

        // The publish action reaches the simulation through this closure;
        // the barrier never needs a global handle to the running instance.
        let publish_state = Arc::clone(&shared);
        let barrier = Arc::new(GenerationBarrier::new(partitions.len(), move || {
            publish(&publish_state)
        }));

        debug!(width, height, workers, ?seed, density, "world seeded");

        Ok(Simulation {
            shared,
            barrier,
            partitions,
            policy,
            start_paused,
            workers: Vec::new(),
            started: false,
        })
    }

    /// Spawns one worker per partition and returns once they are running.
    /// A second call, including after `stop`, is rejected.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.started = true;

        // Workers park on the pause condvar until every spawn has
        // succeeded, so a failed spawn can still unwind without leaving a
        // peer stranded at the barrier.
        for (i, partition) in self.partitions.iter().copied().enumerate() {
            let shared = Arc::clone(&self.shared);
            let barrier = Arc::clone(&self.barrier);
            let policy = self.policy;
            let spawned = thread::Builder::new()
                .name(format!("life-worker-{i}"))
                .spawn(move || worker_loop(shared, barrier, partition, policy));

            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(err) => {
                    self.stop();
                    return Err(EngineError::Spawn(err));
                }
            }
        }

        if !self.start_paused {
            let mut run = self.shared.run.lock().unwrap();
            run.running = true;
            drop(run);
            self.shared.paused.notify_all();
        }

        info!(workers = self.workers.len(), "simulation started");
        Ok(())
    }

    /// Flips the run flag. Resuming wakes every parked worker. Pausing
    /// never splits a generation: a worker that already began one finishes
    /// and publishes it before parking, while a worker still at the gate
    /// parks right away and resumes exactly where it left off. Returns the
    /// new flag.
    pub fn toggle_run(&self) -> bool {
        let mut run = self.shared.run.lock().unwrap();
        run.running = !run.running;
        let running = run.running;
        drop(run);

        if running {
            self.shared.paused.notify_all();
        }
        debug!(running, "run state toggled");
        running
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.lock().unwrap().running
    }

    /// Requests shutdown, wakes any parked worker so it can observe the
    /// request, and joins the whole pool before returning. A parked pool
    /// leaves without computing anything further; workers mid-generation
    /// finish and publish it first. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut run = self.shared.run.lock().unwrap();
            run.stopping = true;
        }
        self.shared.paused.notify_all();
        self.join_workers();
        info!("simulation stopped");
    }

    /// Joins the pool without requesting a stop. Only sensible together
    /// with `max_generations`, which ends the run from the publish action.
    pub fn wait(&mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    /// Generations published so far.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn width(&self) -> usize {
        self.shared.grid.width()
    }

    pub fn height(&self) -> usize {
        self.shared.grid.height()
    }

    /// State of one cell in the last published generation.
    pub fn cell(&self, x: usize, y: usize) -> CellState {
        self.shared.grid.front().get(x, y)
    }

    /// Overwrites one cell of the published generation. Meant for placing
    /// patterns after seeding, before the workers start.
    pub fn set_cell(&self, x: usize, y: usize, state: CellState) {
        self.shared.grid.front().set(x, y, state);
    }

    /// Row-major copy of the last published generation.
    pub fn snapshot(&self) -> Vec<CellState> {
        self.shared.grid.front().snapshot()
    }

    /// Alive cells in the last published generation.
    pub fn population(&self) -> usize {
        self.shared.grid.front().live_count()
    }

    /// Drains every change published since the last drain, oldest first.
    pub fn take_changes(&self) -> Vec<CellPosition> {
        std::mem::take(&mut *self.shared.published.lock().unwrap())
    }

    /// Snapshots the published generation and discards the pending change
    /// list as one atomic step with respect to publishes. For consumers
    /// rebuilding a mirror: every discarded entry is already baked into
    /// the returned snapshot, and later drains compose on top of it.
    pub fn sync_snapshot(&self) -> Vec<CellState> {
        let mut published = self.shared.published.lock().unwrap();
        let snapshot = self.shared.grid.front().snapshot();
        published.clear();
        snapshot
    }

    pub fn viewport(&self) -> Viewport {
        *self.shared.viewport.lock().unwrap()
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        *self.shared.viewport.lock().unwrap() = viewport;
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_the_grid_exactly() {
        for height in 1..40 {
            for workers in 1..=height {
                let partitions = compute_partitions(height, workers).unwrap();
                assert_eq!(partitions.len(), workers);
                assert_eq!(partitions[0].start, 0);
                assert_eq!(partitions[workers - 1].end, height);
                for pair in partitions.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                assert!(partitions.iter().all(|p| p.rows() >= 1));
            }
        }
    }

    #[test]
    fn last_partition_absorbs_the_remainder() {
        let partitions = compute_partitions(10, 4).unwrap();
        assert_eq!(
            partitions,
            vec![
                Partition { start: 0, end: 2 },
                Partition { start: 2, end: 4 },
                Partition { start: 4, end: 6 },
                Partition { start: 6, end: 10 },
            ]
        );
        // height/workers + height%workers rows in the final partition.
        assert_eq!(partitions[3].rows(), 10 / 4 + 10 % 4);
    }

    #[test]
    fn invalid_partitionings_are_rejected() {
        assert!(matches!(
            compute_partitions(10, 0),
            Err(EngineError::NoWorkers)
        ));
        assert!(matches!(
            compute_partitions(3, 5),
            Err(EngineError::TooManyWorkers {
                workers: 5,
                height: 3
            })
        ));
    }

    #[test]
    fn seed_rejects_bad_configurations() {
        assert!(matches!(
            Simulation::new(SimConfig::new(0, 10)),
            Err(EngineError::EmptyGrid { .. })
        ));

        let mut config = SimConfig::new(8, 8);
        config.density = 1.5;
        assert!(matches!(
            Simulation::new(config),
            Err(EngineError::InvalidDensity(_))
        ));

        let mut config = SimConfig::new(8, 4);
        config.workers = 9;
        assert!(matches!(
            Simulation::new(config),
            Err(EngineError::TooManyWorkers { .. })
        ));
    }

    #[test]
    fn seeding_is_reproducible() {
        let mut config = SimConfig::new(16, 16);
        config.seed = Some(7);
        let a = Simulation::new(config.clone()).unwrap();
        let b = Simulation::new(config).unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.generation(), 0);
    }

    #[test]
    fn start_is_rejected_after_stop() {
        let mut config = SimConfig::new(8, 8);
        config.start_paused = true;
        let mut sim = Simulation::new(config).unwrap();
        sim.start().unwrap();
        sim.stop();
        assert!(matches!(sim.start(), Err(EngineError::AlreadyStarted)));
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let mut sim = Simulation::new(SimConfig::new(8, 8)).unwrap();
        sim.stop();
        sim.stop();
    }

    #[test]
    fn viewport_containment() {
        let viewport = Viewport {
            x: 2,
            y: 3,
            width: 4,
            height: 2,
        };
        assert!(viewport.contains(2, 3));
        assert!(viewport.contains(5, 4));
        assert!(!viewport.contains(1, 3));
        assert!(!viewport.contains(6, 4));
        assert!(!viewport.contains(2, 5));
    }
}
