use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub worker: String,
    pub reward: f64,
}

/// Ranked snapshot of every worker's cumulative reward for one (round, stage).
///
/// Always rebuilt from a whole rewards snapshot, never merged into, so a stale snapshot gives
/// a stale board rather than a partially updated one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard(pub Vec<LeaderboardEntry>);

impl Leaderboard {
    /// Sorts descending by `(reward, worker)`; the worker key breaks ties deterministically.
    pub fn from_rewards<'a>(rewards: impl IntoIterator<Item = (&'a String, &'a f64)>) -> Self {
        let mut entries: Vec<LeaderboardEntry> = rewards
            .into_iter()
            .map(|(worker, reward)| LeaderboardEntry {
                worker: worker.clone(),
                reward: *reward,
            })
            .collect();
        entries.sort_by(rank);
        Self(entries)
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.0
    }

    pub fn leader(&self) -> Option<&LeaderboardEntry> {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&BTreeMap<String, f64>> for Leaderboard {
    fn from(rewards: &BTreeMap<String, f64>) -> Self {
        Self::from_rewards(rewards)
    }
}

fn rank(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.reward
        .total_cmp(&a.reward)
        .then_with(|| b.worker.cmp(&a.worker))
}
