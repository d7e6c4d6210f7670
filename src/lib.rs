//! # parlife
//!
//! A multithreaded Conway's Game of Life engine on a toroidal grid.
//!
//! The grid is double-buffered and split into horizontal partitions, one
//! worker thread per partition. Workers advance their rows against the
//! published generation and rendezvous at a reusable barrier whose publish
//! action flips the buffers and hands the changed-cell list to whoever is
//! rendering. The engine never draws; the binary in this crate is one
//! possible consumer, a ratatui terminal front end.
//!
//! ```no_run
//! use parlife::{SimConfig, Simulation};
//!
//! let mut config = SimConfig::new(256, 192);
//! config.seed = Some(42);
//! config.max_generations = Some(100);
//!
//! let mut sim = Simulation::new(config)?;
//! sim.start()?;
//! sim.wait();
//! assert_eq!(sim.generation(), 100);
//! # Ok::<(), parlife::EngineError>(())
//! ```

pub mod barrier;
pub mod engine;
pub mod grid;

pub use engine::{
    compute_partitions, CellPosition, ChangePolicy, EngineError, Partition, SimConfig, Simulation,
    Viewport,
};
pub use grid::{count_neighbors, next_state, step_reference, CellBuffer, CellState, Grid};
