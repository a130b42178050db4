//! # Connection States
//!
//! `Idle -> Connecting -> {Snapshot, Realtime} -> Idle`, or `-> Error` when an
//! attempt fails. `Error` is terminal for the attempt only: the provider can
//! start a new one from there.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Idle,
    /// Transport activated, waiting for the connected callback.
    Connecting,
    /// Pulling the initial bounded dataset.
    Snapshot,
    /// Delivering incremental updates.
    Realtime,
    /// The last attempt failed.
    Error,
}

/// The coarse mode reported in `Statistics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderMode {
    #[default]
    Idle,
    Snapshot,
    Realtime,
}

impl ConnectionState {
    pub fn mode(self) -> ProviderMode {
        match self {
            ConnectionState::Snapshot => ProviderMode::Snapshot,
            ConnectionState::Realtime => ProviderMode::Realtime,
            ConnectionState::Idle | ConnectionState::Connecting | ConnectionState::Error => {
                ProviderMode::Idle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_data_states_map_to_a_data_mode() {
        assert_eq!(ConnectionState::Connecting.mode(), ProviderMode::Idle);
        assert_eq!(ConnectionState::Error.mode(), ProviderMode::Idle);
        assert_eq!(ConnectionState::Snapshot.mode(), ProviderMode::Snapshot);
        assert_eq!(ConnectionState::Realtime.mode(), ProviderMode::Realtime);
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ProviderMode::Realtime).unwrap(), "\"realtime\"");
    }
}
