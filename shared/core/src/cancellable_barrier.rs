use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Rendezvous point for a fixed number of local participants.
///
/// Unlike [`std::sync::Barrier`], waiters can be released early with [`CancellableBarrier::cancel`],
/// which is how a process group is torn down while some members are still blocked on it.
pub struct CancellableBarrier {
    state: Mutex<BarrierState>,
    cvar: Condvar,
    participants: usize,
}

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    cancelled: bool,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("barrier was cancelled")]
pub struct CancelledBarrier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWait {
    /// Set for exactly one participant per generation: the last one to arrive.
    pub is_leader: bool,
}

impl CancellableBarrier {
    pub fn new(participants: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
            participants: participants.max(1),
        })
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) -> Result<BarrierWait, CancelledBarrier> {
        let mut state = self.lock();
        if state.cancelled {
            return Err(CancelledBarrier);
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived >= self.participants {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(BarrierWait { is_leader: true });
        }

        while !state.cancelled && state.generation == generation {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.generation != generation {
            Ok(BarrierWait { is_leader: false })
        } else {
            Err(CancelledBarrier)
        }
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.cvar.notify_all();
    }
}
