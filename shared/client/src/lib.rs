mod cli;
mod context;
mod dummy;
mod node;
mod process_group;
mod rounds;
mod schedule;
mod stage_runner;
mod testing;
mod tracker;
mod traits;
mod training;

pub use cli::{read_worker_key, SwarmArgs};
pub use context::{StageContext, StepReporter, CADENCE_OF_UPDATE_STEPS};
pub use dummy::{CorrectnessReward, DummyTrainer};
pub use node::{Role, WorkerNode, MAX_STAGE_CACHE_ENTRIES};
pub use process_group::{LocalProcessGroup, SingleProcess};
pub use rounds::{
    FollowerConfig, PollOutcome, RoundCoordinator, RoundFollower, RoundLimits, TrainingError,
    TrainingOutcome,
};
pub use schedule::{
    DatasetGenerationError, DatasetsFn, RewardFn, Sample, StageDatasets, StageDescriptor,
    StageSchedule,
};
pub use stage_runner::{
    RoundRunner, StageError, StageRunner, StageRunnerConfig, MAX_TRAIN_FAILS, TRAIN_RETRY_DELAY,
};
pub use testing::IntegrationTestLogMarker;
pub use tracker::LogTracker;
pub use traits::{
    ErrorKind, ExperimentTracker, PersistError, ProcessGroup, RendezvousError, TrackerSession,
    TrainMetrics, TrainStepError, Trainer,
};
pub use training::TrainingCoordinator;
