//! Unit activation state
//!
//! ```text
//!     ┌──────────┐
//!     │ Inactive │◄─────────────────────┐
//!     └────┬─────┘                      │
//!          │ start                      │ exited
//!     ┌────▼───────┐  fail         ┌────┴─────────┐
//!     │ Activating │─────────┐     │ Deactivating │
//!     └────┬───────┘         │     └────▲─────────┘
//!          │ ready      ┌────▼───┐      │ stop
//!     ┌────▼─────┐      │ Failed │      │
//!     │  Active  │──────┴────────┴──────┘
//!     └──┬────▲──┘
//!  reload│    │done
//!     ┌──▼────┴───┐
//!     │ Reloading │
//!     └───────────┘
//! ```

use serde::{Deserialize, Serialize};

/// High-level unit state as reported by a unit's behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveState {
    #[default]
    Inactive,
    Active,
    Activating,
    Deactivating,
    Failed,
    Reloading,
}

impl ActiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Activating => "activating",
            Self::Deactivating => "deactivating",
            Self::Failed => "failed",
            Self::Reloading => "reloading",
        }
    }

    /// Up or on its way up
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Activating | Self::Reloading)
    }

    /// Down, whether cleanly or after a failure
    pub fn is_inactive_or_failed(&self) -> bool {
        matches!(self, Self::Inactive | Self::Failed)
    }
}

impl std::fmt::Display for ActiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_inactive() {
        let state = ActiveState::default();
        assert_eq!(state, ActiveState::Inactive);
        assert!(!state.is_active());
        assert!(state.is_inactive_or_failed());
    }

    #[test]
    fn test_active_states() {
        assert!(ActiveState::Active.is_active());
        assert!(ActiveState::Activating.is_active());
        assert!(ActiveState::Reloading.is_active());
        assert!(!ActiveState::Deactivating.is_active());
        assert!(!ActiveState::Failed.is_active());
        assert!(ActiveState::Failed.is_inactive_or_failed());
    }

    #[test]
    fn test_as_str() {
        assert_eq!(ActiveState::Inactive.as_str(), "inactive");
        assert_eq!(ActiveState::Active.as_str(), "active");
        assert_eq!(ActiveState::Activating.as_str(), "activating");
        assert_eq!(ActiveState::Deactivating.as_str(), "deactivating");
        assert_eq!(ActiveState::Failed.as_str(), "failed");
        assert_eq!(ActiveState::Reloading.to_string(), "reloading");
    }
}
