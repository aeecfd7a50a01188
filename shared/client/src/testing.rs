use std::str::FromStr;

/// Values of the `integration_test_log_marker` field, so tests can follow a worker through
/// its JSON logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationTestLogMarker {
    RoundStart,
    RoundJoined,
    StageFinished,
    LeaderboardPublished,
    Error,
}

impl std::fmt::Display for IntegrationTestLogMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::RoundStart => "round_start",
                Self::RoundJoined => "round_joined",
                Self::StageFinished => "stage_finished",
                Self::LeaderboardPublished => "leaderboard_published",
                Self::Error => "error",
            }
        )
    }
}

impl FromStr for IntegrationTestLogMarker {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "round_start" => Self::RoundStart,
            "round_joined" => Self::RoundJoined,
            "stage_finished" => Self::StageFinished,
            "leaderboard_published" => Self::LeaderboardPublished,
            "error" => Self::Error,
            _ => return Err(()),
        })
    }
}
