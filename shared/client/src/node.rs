use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::Duration,
};

use swarm_core::{RoundStage, WorkerKey};
use swarm_dht::StageOutputRecord;

/// Upper bound on locally cached outputs across all stages of a round.
pub const MAX_STAGE_CACHE_ENTRIES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Advances and publishes the global (round, stage) pointer and the leaderboards.
    Coordinator,
    /// Observes the pointer and replays rounds.
    Follower,
}

/// One worker's identity and position in the schedule.
///
/// Position fields are written only by the coordination loop that owns the node.
#[derive(Debug)]
pub struct WorkerNode {
    key: WorkerKey,
    role: Role,
    round_num: u32,
    stage_num: u32,
    out_lease: Duration,
    stage_cache: HashMap<RoundStage, BTreeMap<String, StageOutputRecord>>,
    cache_order: VecDeque<(RoundStage, String)>,
}

impl WorkerNode {
    pub fn new(key: WorkerKey, role: Role, out_lease: Duration) -> Self {
        Self {
            key,
            role,
            round_num: 0,
            stage_num: 0,
            out_lease,
            stage_cache: HashMap::new(),
            cache_order: VecDeque::new(),
        }
    }

    pub fn coordinator(key: WorkerKey, out_lease: Duration) -> Self {
        Self::new(key, Role::Coordinator, out_lease)
    }

    pub fn follower(key: WorkerKey, out_lease: Duration) -> Self {
        Self::new(key, Role::Follower, out_lease)
    }

    pub fn key(&self) -> &WorkerKey {
        &self.key
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }

    pub fn out_lease(&self) -> Duration {
        self.out_lease
    }

    pub fn round_num(&self) -> u32 {
        self.round_num
    }

    pub fn stage_num(&self) -> u32 {
        self.stage_num
    }

    pub fn position(&self) -> RoundStage {
        RoundStage::new(self.round_num, self.stage_num)
    }

    pub fn set_position(&mut self, round_stage: RoundStage) {
        self.round_num = round_stage.round;
        self.stage_num = round_stage.stage;
    }

    pub fn put_stage_outputs(
        &mut self,
        round_stage: RoundStage,
        q_hash: String,
        record: StageOutputRecord,
    ) {
        let slots = self.stage_cache.entry(round_stage).or_default();
        if slots.insert(q_hash.clone(), record).is_none() {
            self.cache_order.push_back((round_stage, q_hash));
        }

        while self.cache_order.len() > MAX_STAGE_CACHE_ENTRIES {
            let Some((rs, oldest)) = self.cache_order.pop_front() else {
                break;
            };
            if let Some(slots) = self.stage_cache.get_mut(&rs) {
                slots.remove(&oldest);
                if slots.is_empty() {
                    self.stage_cache.remove(&rs);
                }
            }
        }
    }

    pub fn stage_outputs(
        &self,
        round_stage: RoundStage,
    ) -> Option<&BTreeMap<String, StageOutputRecord>> {
        self.stage_cache.get(&round_stage)
    }

    pub fn cached_outputs(&self) -> usize {
        self.cache_order.len()
    }

    pub fn clear_stage_cache(&mut self) {
        self.stage_cache.clear();
        self.cache_order.clear();
    }
}
