use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in the swarm-wide schedule. Ordered by round, then stage.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoundStage {
    pub round: u32,
    pub stage: u32,
}

impl RoundStage {
    pub const fn new(round: u32, stage: u32) -> Self {
        Self { round, stage }
    }
}

impl From<(u32, u32)> for RoundStage {
    fn from((round, stage): (u32, u32)) -> Self {
        Self { round, stage }
    }
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {} stage {}", self.round, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_round_then_stage() {
        let mut positions = vec![
            RoundStage::new(1, 0),
            RoundStage::new(0, 2),
            RoundStage::new(0, 0),
            RoundStage::new(1, 1),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![(0, 0).into(), (0, 2).into(), (1, 0).into(), (1, 1).into()]
        );
    }
}
