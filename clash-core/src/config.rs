use crate::error::{ClashError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub lobby_name: String,
    pub capacity: usize,
    pub team_count: u32,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub coverage_check_interval: Duration,
    /// `None` waits for coverage indefinitely.
    pub coverage_timeout: Option<Duration>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            lobby_name: "Lobby".to_string(),
            capacity: 4,
            team_count: 2,
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_secs(5),
            coverage_check_interval: Duration::from_secs(1),
            coverage_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl MatchConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_team_count(mut self, team_count: u32) -> Self {
        self.team_count = team_count;
        self
    }

    pub fn with_coverage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.coverage_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.lobby_name.is_empty() {
            return Err(ClashError::config("Lobby name cannot be empty"));
        }

        if self.team_count < 2 {
            return Err(ClashError::config("Team count must be at least 2"));
        }

        if self.capacity < self.team_count as usize {
            return Err(ClashError::config(format!(
                "Capacity {} cannot fill {} teams",
                self.capacity, self.team_count
            )));
        }

        if self.heartbeat_interval.is_zero()
            || self.poll_interval.is_zero()
            || self.coverage_check_interval.is_zero()
        {
            return Err(ClashError::config("Timer intervals must be greater than 0"));
        }

        if matches!(self.coverage_timeout, Some(t) if t.is_zero()) {
            return Err(ClashError::config("Coverage timeout must be greater than 0"));
        }

        Ok(())
    }
}
