//! # Conflict Resolver
//!
//! Picks a winner for a node both sides of which changed since the last
//! sync. Whole-item resolution only: the loser's content is overwritten in
//! full by the apply step, never merged.
//!
//! The strategy set is a closed enum consumed by one total function, so
//! resolution stays side-effect free and trivially property-testable away
//! from the orchestrator.

use serde::{Deserialize, Serialize};

/// How conflicting edits are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The side with the later modification time wins; ties go to local
    #[default]
    LastWriteWins,
    /// Local always wins, regardless of timestamps
    LocalWins,
    /// Remote always wins, regardless of timestamps
    RemoteWins,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
        }
    }
}

/// The side whose content survives the conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Resolve a conflict deterministically from the two modification times and
/// the configured strategy.
pub fn resolve(
    strategy: ConflictStrategy,
    local_modified_at: i64,
    remote_modified_at: i64,
) -> ConflictWinner {
    match strategy {
        ConflictStrategy::LocalWins => ConflictWinner::Local,
        ConflictStrategy::RemoteWins => ConflictWinner::Remote,
        ConflictStrategy::LastWriteWins => {
            if remote_modified_at > local_modified_at {
                ConflictWinner::Remote
            } else {
                ConflictWinner::Local
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000;

    #[test]
    fn test_last_write_wins_prefers_later_side() {
        assert_eq!(
            resolve(ConflictStrategy::LastWriteWins, T0 + 10, T0),
            ConflictWinner::Local
        );
        assert_eq!(
            resolve(ConflictStrategy::LastWriteWins, T0, T0 + 10),
            ConflictWinner::Remote
        );
    }

    #[test]
    fn test_last_write_wins_tie_goes_to_local() {
        assert_eq!(
            resolve(ConflictStrategy::LastWriteWins, T0, T0),
            ConflictWinner::Local
        );
    }

    #[test]
    fn test_fixed_strategies_ignore_timestamps() {
        assert_eq!(
            resolve(ConflictStrategy::LocalWins, T0, T0 + 1_000_000),
            ConflictWinner::Local
        );
        assert_eq!(
            resolve(ConflictStrategy::RemoteWins, T0 + 1_000_000, T0),
            ConflictWinner::Remote
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        for strategy in [
            ConflictStrategy::LastWriteWins,
            ConflictStrategy::LocalWins,
            ConflictStrategy::RemoteWins,
        ] {
            let first = resolve(strategy, T0 + 7, T0 + 3);
            for _ in 0..10 {
                assert_eq!(resolve(strategy, T0 + 7, T0 + 3), first);
            }
        }
    }
}
