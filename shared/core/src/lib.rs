mod cancellable_barrier;
mod node_identity;
mod round_stage;
mod sha256;

pub use cancellable_barrier::{BarrierWait, CancellableBarrier, CancelledBarrier};
pub use node_identity::{ParseWorkerKeyError, WorkerKey};
pub use round_stage::RoundStage;
pub use sha256::{question_hash, sha256, sha256v};
