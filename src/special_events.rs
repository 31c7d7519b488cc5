//! The fixed set of events FreeSWITCH delivers regardless of subscription
//! (job completion notices, logs, and the channel-execute/hangup pair used
//! to drive call control), and per-connection tracking of which of them a
//! caller has already asked to observe.
use std::collections::HashSet;
use std::sync::Mutex;

/// An event name that FreeSWITCH may deliver outside of normal `event`
/// subscriptions — `bgapi` completions, logging, and call-control
/// milestones.
pub const SPECIAL_EVENT_NAMES: &[&str] = &[
    "LOG",
    "BACKGROUND_JOB",
    "CHANNEL_EXECUTE",
    "CHANNEL_EXECUTE_COMPLETE",
    "CHANNEL_HANGUP",
    "CHANNEL_HANGUP_COMPLETE",
];

pub(crate) fn is_special(name: &str) -> bool {
    SPECIAL_EVENT_NAMES.iter().any(|&n| n == name)
}

/// Tracks which special events a connection has already subscribed to, so
/// the façade can subscribe lazily and exactly once per event name.
#[derive(Debug, Default)]
pub(crate) struct SpecialEventTracker {
    enabled: Mutex<HashSet<String>>,
}

impl SpecialEventTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as enabled. Returns `true` if it was not already
    /// enabled (i.e. the caller should actually send the subscription).
    pub(crate) fn enable(&self, name: &str) -> bool {
        self.enabled.lock().unwrap().insert(name.to_owned())
    }

    /// Marks `name` as no longer enabled, e.g. after a `nixevent`.
    pub(crate) fn disable(&self, name: &str) {
        self.enabled.lock().unwrap().remove(name);
    }

    /// Marks every special event enabled, e.g. after `myevents` (which
    /// subscribes to everything for one channel's Unique-ID).
    pub(crate) fn enable_all(&self) {
        let mut enabled = self.enabled.lock().unwrap();
        enabled.extend(SPECIAL_EVENT_NAMES.iter().map(|&n| n.to_owned()));
    }

    /// Clears every tracked subscription, e.g. after `noevents`.
    pub(crate) fn clear(&self) {
        self.enabled.lock().unwrap().clear();
    }
}
