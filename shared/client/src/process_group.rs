use std::sync::Arc;

use swarm_core::CancellableBarrier;
use tracing::debug;

use crate::{ProcessGroup, RendezvousError};

/// A run with one local process: every rendezvous passes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

#[async_trait::async_trait]
impl ProcessGroup for SingleProcess {
    async fn wait_for_everyone(&self) -> Result<(), RendezvousError> {
        Ok(())
    }

    fn destroy(&self) {}
}

/// Members running in the same process, sharing one barrier. Clone one handle per member.
#[derive(Clone)]
pub struct LocalProcessGroup {
    barrier: Arc<CancellableBarrier>,
}

impl LocalProcessGroup {
    pub fn new(world_size: usize) -> Self {
        Self {
            barrier: CancellableBarrier::new(world_size),
        }
    }

    pub fn world_size(&self) -> usize {
        self.barrier.participants()
    }
}

#[async_trait::async_trait]
impl ProcessGroup for LocalProcessGroup {
    async fn wait_for_everyone(&self) -> Result<(), RendezvousError> {
        let barrier = self.barrier.clone();
        let arrived = tokio::task::spawn_blocking(move || barrier.wait())
            .await
            .map_err(|_| RendezvousError::Crashed)?
            .map_err(|_| RendezvousError::Cancelled)?;
        debug!(leader = arrived.is_leader, "Process group rendezvous");
        Ok(())
    }

    fn destroy(&self) {
        self.barrier.cancel();
    }
}
