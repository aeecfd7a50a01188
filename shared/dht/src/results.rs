use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use swarm_core::{question_hash, RoundStage, WorkerKey};
use time::OffsetDateTime;

use crate::{
    get_dictionary,
    keys::{outputs_key, rewards_key},
    store_value, DistributedStore, StoreError,
};

/// What a worker produced for one question. The core never looks past `question`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    pub question: String,
    pub answer: String,
    pub completions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutputRecord {
    /// Unix time in seconds.
    pub timestamp: f64,
    pub outputs: StageOutputs,
}

impl StageOutputRecord {
    pub fn now(outputs: StageOutputs) -> Self {
        let timestamp = OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9;
        Self { timestamp, outputs }
    }
}

/// Per-worker writes. Every key or subkey written here is owned by `worker` alone.
#[derive(Clone)]
pub struct ResultPublisher {
    store: Arc<dyn DistributedStore>,
    worker: WorkerKey,
    lease: Duration,
}

impl ResultPublisher {
    pub fn new(store: Arc<dyn DistributedStore>, worker: WorkerKey, lease: Duration) -> Self {
        Self {
            store,
            worker,
            lease,
        }
    }

    pub fn worker(&self) -> &WorkerKey {
        &self.worker
    }

    /// Stores `record` in the slot for its question and returns that slot's hash.
    pub async fn publish_outputs(
        &self,
        round_stage: RoundStage,
        record: &StageOutputRecord,
    ) -> Result<String, StoreError> {
        let q_hash = question_hash(&record.outputs.question);
        store_value(
            self.store.as_ref(),
            &outputs_key(&self.worker, round_stage),
            Some(&q_hash),
            record,
            self.lease,
        )
        .await?;
        Ok(q_hash)
    }

    pub async fn publish_reward(
        &self,
        round_stage: RoundStage,
        cumulative_reward: f64,
    ) -> Result<(), StoreError> {
        store_value(
            self.store.as_ref(),
            &rewards_key(round_stage),
            Some(self.worker.as_str()),
            &cumulative_reward,
            self.lease,
        )
        .await
    }

    pub async fn rewards(
        &self,
        round_stage: RoundStage,
    ) -> Result<Option<BTreeMap<String, f64>>, StoreError> {
        get_dictionary(self.store.as_ref(), &rewards_key(round_stage), true).await
    }

    pub async fn outputs_of(
        &self,
        worker: &WorkerKey,
        round_stage: RoundStage,
    ) -> Result<Option<BTreeMap<String, StageOutputRecord>>, StoreError> {
        get_dictionary(
            self.store.as_ref(),
            &outputs_key(worker, round_stage),
            true,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use pretty_assertions::assert_eq;

    fn outputs(question: &str, completion: &str) -> StageOutputs {
        StageOutputs {
            question: question.to_string(),
            answer: "4".to_string(),
            completions: vec![completion.to_string()],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_questions_overwrite_their_slot() {
        let store = MemoryStore::new();
        let worker = WorkerKey::new("alice").unwrap();
        let results =
            ResultPublisher::new(Arc::new(store.clone()), worker.clone(), Duration::from_secs(60));
        let rs = RoundStage::new(0, 1);

        let first = results
            .publish_outputs(rs, &StageOutputRecord::now(outputs("2+2?", "5")))
            .await
            .unwrap();
        let again = results
            .publish_outputs(rs, &StageOutputRecord::now(outputs("2+2?", "4")))
            .await
            .unwrap();
        results
            .publish_outputs(rs, &StageOutputRecord::now(outputs("3+3?", "6")))
            .await
            .unwrap();

        assert_eq!(first, again);
        let stored = results.outputs_of(&worker, rs).await.unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[&first].outputs.completions, vec!["4".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn each_worker_owns_its_reward_subkey() {
        let store: Arc<dyn DistributedStore> = Arc::new(MemoryStore::new());
        let lease = Duration::from_secs(60);
        let rs = RoundStage::new(0, 0);
        let alice = ResultPublisher::new(store.clone(), WorkerKey::new("alice").unwrap(), lease);
        let bob = ResultPublisher::new(store.clone(), WorkerKey::new("bob").unwrap(), lease);

        alice.publish_reward(rs, 1.0).await.unwrap();
        bob.publish_reward(rs, 2.0).await.unwrap();
        alice.publish_reward(rs, 3.0).await.unwrap();

        let rewards = bob.rewards(rs).await.unwrap().unwrap();
        assert_eq!(
            rewards,
            BTreeMap::from([("alice".to_string(), 3.0), ("bob".to_string(), 2.0)])
        );
        assert_eq!(bob.rewards(RoundStage::new(0, 1)).await.unwrap(), None);
    }
}
