//! Ephemeral run state.
//!
//! A run is one backend execution pass against a remote thread. Switchboard
//! only ever observes, cancels, and polls runs — it never persists them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl RunStatus {
    /// Terminal statuses: the run is finished and the thread is free.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Failed | Self::Expired
        )
    }

    /// Active statuses block new turns on the thread.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_set() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Expired.is_terminal());

        assert!(RunStatus::Queued.is_active());
        assert!(RunStatus::InProgress.is_active());
        assert!(RunStatus::RequiresAction.is_active());
    }

    #[test]
    fn wire_format() {
        assert_eq!(
            serde_json::to_value(RunStatus::InProgress).unwrap(),
            "in_progress"
        );
        assert_eq!(
            serde_json::to_value(RunStatus::RequiresAction).unwrap(),
            "requires_action"
        );
    }
}
