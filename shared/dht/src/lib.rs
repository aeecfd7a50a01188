mod codec;
mod error;
pub mod keys;
mod leaderboard;
mod memory;
mod progress;
mod results;
mod store;

pub use codec::{decode, encode, get_dictionary, get_value, store_value};
pub use error::StoreError;
pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use memory::{MemoryStore, WriteRecord, MAX_WRITE_HISTORY};
pub use progress::{ProgressError, ProgressPublisher};
pub use results::{ResultPublisher, StageOutputRecord, StageOutputs};
pub use store::{DistributedStore, StoreEntry};
