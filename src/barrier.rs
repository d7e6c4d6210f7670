//! Cyclic rendezvous for the worker pool.
//!
//! `std::sync::Barrier` has no completion hook, so the primitive is built
//! from a mutex, a condvar and a cycle counter. The last thread to arrive in
//! a cycle runs the publish action exactly once, resets the arrival count,
//! bumps the cycle and wakes everyone. Waiters block until the cycle number
//! changes, which both handles spurious wakeups and keeps a fast thread from
//! slipping into the next generation before the publish has completed.

use std::sync::{Condvar, Mutex};

struct BarrierState {
    arrived: usize,
    cycle: u64,
}

/// Reusable barrier for a fixed number of workers, with a publish action
/// owned by the barrier and run once per cycle on the releasing thread.
pub struct GenerationBarrier {
    workers: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
    publish: Box<dyn Fn() + Send + Sync>,
}

impl GenerationBarrier {
    /// `workers` is fixed for the barrier's lifetime; `publish` runs on
    /// whichever thread completes each cycle, before any worker is released.
    pub fn new(workers: usize, publish: impl Fn() + Send + Sync + 'static) -> GenerationBarrier {
        GenerationBarrier {
            workers,
            state: Mutex::new(BarrierState {
                arrived: 0,
                cycle: 0,
            }),
            released: Condvar::new(),
            publish: Box::new(publish),
        }
    }

    /// Signals arrival and blocks until every worker has arrived for this
    /// cycle and the publish action has run.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        state.arrived += 1;

        if state.arrived == self.workers {
            (self.publish)();
            state.arrived = 0;
            state.cycle = state.cycle.wrapping_add(1);
            self.released.notify_all();
        } else {
            let cycle = state.cycle;
            while state.cycle == cycle {
                state = self.released.wait(state).unwrap();
            }
        }
    }
}
