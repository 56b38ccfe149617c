//! Protocol parameters

use crate::error::{Error, Result};
use crate::types::Tick;
use serde::{Deserialize, Serialize};

/// Timing and dissemination knobs shared by every node in a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
#[serde(default)]
pub struct ProtocolParams {
    /// Ticks of silence before an entry is excluded from outgoing gossip
    #[cfg_attr(feature = "cli", arg(long, default_value_t = ProtocolParams::default().t_fail))]
    pub t_fail: Tick,
    /// Ticks of silence before an entry is deleted
    #[cfg_attr(feature = "cli", arg(long, default_value_t = ProtocolParams::default().t_remove))]
    pub t_remove: Tick,
    /// Ticks between dissemination rounds
    #[cfg_attr(feature = "cli", arg(long, default_value_t = ProtocolParams::default().gossip_interval))]
    pub gossip_interval: Tick,
    /// Random targets per round
    #[cfg_attr(feature = "cli", arg(long, default_value_t = ProtocolParams::default().fanout))]
    pub fanout: usize,
    /// Ticks to wait for a join reply before asking again
    #[cfg_attr(feature = "cli", arg(long, default_value_t = ProtocolParams::default().join_timeout))]
    pub join_timeout: Tick,
    /// Re-sends of the join request after the first one
    #[cfg_attr(feature = "cli", arg(long, default_value_t = ProtocolParams::default().join_retries))]
    pub join_retries: u32,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            t_fail: 5,
            t_remove: 20,
            gossip_interval: 1,
            fanout: 3,
            join_timeout: 10,
            join_retries: 3,
        }
    }
}

impl ProtocolParams {
    pub fn validate(&self) -> Result<()> {
        if self.t_remove < self.t_fail {
            return Err(Error::InvalidParams(format!(
                "t_remove ({}) must be >= t_fail ({})",
                self.t_remove, self.t_fail
            )));
        }
        if self.gossip_interval == 0 {
            return Err(Error::InvalidParams("gossip_interval must be > 0".into()));
        }
        if self.fanout == 0 {
            return Err(Error::InvalidParams("fanout must be > 0".into()));
        }
        if self.join_timeout == 0 {
            return Err(Error::InvalidParams("join_timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Total join requests sent before giving up.
    pub fn join_attempts(&self) -> u32 {
        self.join_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ProtocolParams::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_remove_before_fail() {
        let params = ProtocolParams {
            t_fail: 10,
            t_remove: 5,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(Error::InvalidParams(_))));
    }

    #[test]
    fn test_rejects_zero_interval_and_fanout() {
        let params = ProtocolParams {
            gossip_interval: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = ProtocolParams {
            fanout: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: ProtocolParams = serde_json::from_str(r#"{"fanout": 2}"#).unwrap();
        assert_eq!(params.fanout, 2);
        assert_eq!(params.t_remove, 20);
    }
}
