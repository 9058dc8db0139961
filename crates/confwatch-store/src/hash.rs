//! BLAKE3 content hashing for persisted snapshots.
//!
//! The fleet map uses ordered containers throughout, so its JSON form is
//! canonical and the hash is deterministic across encodings.

use confwatch_core::FleetState;

/// Compute the BLAKE3 hash of a fleet state.
///
/// Serializes the fleet to canonical JSON and hashes the bytes. Returns
/// the hex-encoded hash.
pub fn fleet_hash(fleet: &FleetState) -> String {
    let json = serde_json::to_vec(fleet).expect("fleet state serialization should not fail");
    blake3::hash(&json).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use confwatch_core::{DeviceName, DeviceState};

    #[test]
    fn hash_is_deterministic() {
        let mut fleet = FleetState::default();
        let now = Utc::now();
        let mut state = DeviceState::empty(now);
        state.values.insert("sysUptime".to_string(), 1000);
        fleet.insert(DeviceName::new("rtr1"), state);

        assert_eq!(fleet_hash(&fleet), fleet_hash(&fleet.clone()));
    }

    #[test]
    fn hash_changes_with_content() {
        let empty = FleetState::default();
        let mut other = FleetState::default();
        other.insert(DeviceName::new("rtr1"), DeviceState::empty(Utc::now()));
        assert_ne!(fleet_hash(&empty), fleet_hash(&other));
    }
}
