//! The player registry: one [`PlayerRecord`] per live connection.
//!
//! # Concurrency note
//!
//! `PlayerRegistry` is a plain `HashMap` with no locking. It is owned by
//! the server loop and lent to rooms for the duration of their tick, so
//! there is only ever one mutator.

use std::collections::HashMap;

use duelforge_protocol::ConnectionId;
use tokio::time::Instant;

use crate::{
    HeartbeatCheck, HeartbeatConfig, PlayerRecord, SessionError, validate_name,
};

/// Owns the metadata of every connection the server knows about.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    records: HashMap<ConnectionId, PlayerRecord>,
}

impl PlayerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `id`, creating a fresh one if needed.
    pub fn get_or_create(&mut self, id: ConnectionId, now: Instant) -> &mut PlayerRecord {
        self.records.entry(id).or_insert_with(|| {
            tracing::debug!(conn_id = %id, "player record created");
            PlayerRecord::new(now)
        })
    }

    /// Looks up a record without creating one.
    pub fn get(&self, id: ConnectionId) -> Option<&PlayerRecord> {
        self.records.get(&id)
    }

    /// Removes and returns the record for `id`.
    pub fn remove(&mut self, id: ConnectionId) -> Option<PlayerRecord> {
        let removed = self.records.remove(&id);
        if removed.is_some() {
            tracing::debug!(conn_id = %id, "player record removed");
        }
        removed
    }

    /// Returns every connection whose record matches `predicate`, in
    /// ascending id order.
    pub fn find_all<F>(&self, mut predicate: F) -> Vec<ConnectionId>
    where
        F: FnMut(ConnectionId, &PlayerRecord) -> bool,
    {
        let mut ids: Vec<_> = self
            .records
            .iter()
            .filter(|(id, rec)| predicate(**id, rec))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drops every record whose connection `is_live` reports dead.
    ///
    /// This is the second line of defense behind room supervision: it
    /// catches records for connections that were never placed in a room or
    /// whose teardown was missed. Returns the pruned ids in ascending
    /// order.
    pub fn prune_dead<F>(&mut self, mut is_live: F) -> Vec<ConnectionId>
    where
        F: FnMut(ConnectionId) -> bool,
    {
        let mut pruned = Vec::new();
        self.records.retain(|id, _| {
            if is_live(*id) {
                true
            } else {
                pruned.push(*id);
                false
            }
        });
        pruned.sort_unstable();
        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "pruned dead player records");
        }
        pruned
    }

    /// Validates `raw_name` and assigns it to `id`.
    ///
    /// Names are unique case-insensitively among all other records.
    /// Re-identifying with the connection's own current name succeeds.
    ///
    /// # Errors
    /// - [`SessionError::InvalidName`] if validation fails
    /// - [`SessionError::DuplicateName`] if another connection has it
    pub fn identify(
        &mut self,
        id: ConnectionId,
        raw_name: &str,
        now: Instant,
    ) -> Result<String, SessionError> {
        let name = validate_name(raw_name)?;
        let lowered = name.to_lowercase();
        let taken = self.find_all(|other, rec| {
            other != id
                && rec
                    .name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase() == lowered)
        });
        if !taken.is_empty() {
            tracing::debug!(conn_id = %id, %name, "duplicate name rejected");
            return Err(SessionError::DuplicateName(name));
        }

        self.get_or_create(id, now).name = Some(name.clone());
        tracing::info!(conn_id = %id, %name, "player identified");
        Ok(name)
    }

    /// The display name of `id`, if it has identified.
    pub fn name(&self, id: ConnectionId) -> Option<&str> {
        self.records.get(&id).and_then(|rec| rec.name.as_deref())
    }

    /// Classifies the heartbeat state of `id` at `now`, creating the record
    /// if it doesn't exist yet.
    pub fn check_heartbeat(
        &mut self,
        id: ConnectionId,
        now: Instant,
        config: &HeartbeatConfig,
    ) -> HeartbeatCheck {
        self.get_or_create(id, now).check(now, config)
    }

    /// Records that a probe was sent to `id` at `now`.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if there is no record.
    pub fn mark_probe_sent(
        &mut self,
        id: ConnectionId,
        now: Instant,
    ) -> Result<(), SessionError> {
        let rec = self.records.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        rec.heartbeat_pending = true;
        rec.last_heartbeat = now;
        Ok(())
    }

    /// Records a heartbeat acknowledgment from `id` at `now`.
    ///
    /// An ack with no probe outstanding still refreshes the clock.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if there is no record.
    pub fn acknowledge(
        &mut self,
        id: ConnectionId,
        now: Instant,
    ) -> Result<(), SessionError> {
        let rec = self.records.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        rec.heartbeat_pending = false;
        rec.last_heartbeat = now;
        Ok(())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `PlayerRegistry`.
    //!
    //! Every time-dependent call takes `now` explicitly, so these tests
    //! build instants by offsetting one base `Instant` instead of sleeping.

    use super::*;
    use std::time::Duration;

    fn cid(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    // =====================================================================
    // get_or_create() / remove()
    // =====================================================================

    #[test]
    fn test_get_or_create_is_lazy_and_idempotent() {
        let mut reg = PlayerRegistry::new();
        let t0 = Instant::now();
        assert!(reg.get(cid(1)).is_none());

        reg.get_or_create(cid(1), t0).name = Some("ada".into());
        // A second lookup returns the same record, not a fresh one.
        assert_eq!(reg.get_or_create(cid(1), secs(t0, 9)).name.as_deref(), Some("ada"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_remove_returns_record_once() {
        let mut reg = PlayerRegistry::new();
        reg.get_or_create(cid(1), Instant::now());
        assert!(reg.remove(cid(1)).is_some());
        assert!(reg.remove(cid(1)).is_none());
        assert!(reg.is_empty());
    }

    // =====================================================================
    // identify()
    // =====================================================================

    #[test]
    fn test_identify_assigns_trimmed_name() {
        let mut reg = PlayerRegistry::new();
        let name = reg.identify(cid(1), "  ada ", Instant::now()).unwrap();
        assert_eq!(name, "ada");
        assert_eq!(reg.name(cid(1)), Some("ada"));
    }

    #[test]
    fn test_identify_duplicate_is_case_insensitive() {
        let mut reg = PlayerRegistry::new();
        let t0 = Instant::now();
        reg.identify(cid(1), "Ada", t0).unwrap();

        let result = reg.identify(cid(2), "aDA", t0);
        assert_eq!(result, Err(SessionError::DuplicateName("aDA".into())));
        // The rejected connection keeps no name.
        assert_eq!(reg.name(cid(2)), None);
    }

    #[test]
    fn test_identify_same_connection_may_repeat_its_name() {
        let mut reg = PlayerRegistry::new();
        let t0 = Instant::now();
        reg.identify(cid(1), "ada", t0).unwrap();
        assert!(reg.identify(cid(1), "ada", t0).is_ok());
    }

    #[test]
    fn test_identify_name_is_free_after_removal() {
        let mut reg = PlayerRegistry::new();
        let t0 = Instant::now();
        reg.identify(cid(1), "ada", t0).unwrap();
        reg.remove(cid(1));
        assert!(reg.identify(cid(2), "ada", t0).is_ok());
    }

    #[test]
    fn test_identify_invalid_name_is_rejected() {
        let mut reg = PlayerRegistry::new();
        let result = reg.identify(cid(1), "", Instant::now());
        assert!(matches!(result, Err(SessionError::InvalidName(_))));
    }

    // =====================================================================
    // heartbeat bookkeeping
    // =====================================================================

    #[test]
    fn test_heartbeat_probe_ack_cycle_never_expires() {
        let mut reg = PlayerRegistry::new();
        let cfg = HeartbeatConfig::default();
        let t0 = Instant::now();
        reg.get_or_create(cid(1), t0);

        // Probe every 3s, answer 4s later (inside the 5s timeout).
        let mut now = t0;
        for _ in 0..10 {
            now += Duration::from_secs(3);
            assert_eq!(reg.check_heartbeat(cid(1), now, &cfg), HeartbeatCheck::ProbeDue);
            reg.mark_probe_sent(cid(1), now).unwrap();

            now += Duration::from_secs(4);
            assert_eq!(reg.check_heartbeat(cid(1), now, &cfg), HeartbeatCheck::Healthy);
            reg.acknowledge(cid(1), now).unwrap();
        }
    }

    #[test]
    fn test_heartbeat_unanswered_probe_expires() {
        let mut reg = PlayerRegistry::new();
        let cfg = HeartbeatConfig::default();
        let t0 = Instant::now();
        reg.get_or_create(cid(1), t0);

        reg.mark_probe_sent(cid(1), secs(t0, 3)).unwrap();
        assert_eq!(reg.check_heartbeat(cid(1), secs(t0, 8), &cfg), HeartbeatCheck::Healthy);
        assert_eq!(reg.check_heartbeat(cid(1), secs(t0, 9), &cfg), HeartbeatCheck::Expired);
    }

    #[test]
    fn test_heartbeat_on_missing_record_is_not_found() {
        let mut reg = PlayerRegistry::new();
        let now = Instant::now();
        assert_eq!(reg.acknowledge(cid(9), now), Err(SessionError::NotFound(cid(9))));
        assert_eq!(reg.mark_probe_sent(cid(9), now), Err(SessionError::NotFound(cid(9))));
    }

    // =====================================================================
    // find_all() / prune_dead()
    // =====================================================================

    #[test]
    fn test_find_all_returns_sorted_matches() {
        let mut reg = PlayerRegistry::new();
        let t0 = Instant::now();
        for id in [5, 2, 9] {
            reg.get_or_create(cid(id), t0);
        }
        reg.identify(cid(9), "zed", t0).unwrap();

        let unnamed = reg.find_all(|_, rec| rec.name.is_none());
        assert_eq!(unnamed, vec![cid(2), cid(5)]);
    }

    #[test]
    fn test_prune_dead_removes_only_dead() {
        let mut reg = PlayerRegistry::new();
        let t0 = Instant::now();
        for id in 1..=4 {
            reg.get_or_create(cid(id), t0);
        }

        let pruned = reg.prune_dead(|id| id.into_inner() % 2 == 0);
        assert_eq!(pruned, vec![cid(1), cid(3)]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get(cid(2)).is_some());
    }
}
