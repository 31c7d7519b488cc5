//! Handler keys and the registry that stores them ordered by specificity.
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::codec::Event;

/// A boxed, clonable event handler. Handlers run on the connection's
/// configured [`Executor`](crate::executor::Executor) so a slow or
/// panicking handler cannot stall the read loop or take down the
/// connection.
pub type Handler = Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A match predicate for event dispatch: a set of `NAME: VALUE` pairs that
/// all must be present (case-insensitively, trimmed) on an event for a
/// handler to apply. The empty key matches every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pairs: Vec<(String, String)>,
}

impl HandlerKey {
    /// The catch-all key that matches any event.
    pub fn any() -> HandlerKey {
        HandlerKey { pairs: Vec::new() }
    }

    /// Builds a key from `(header, value)` pairs. Both sides are
    /// normalized (trimmed, upper-cased) so lookups are stable regardless
    /// of how callers capitalize header names or values.
    pub fn new<I, S1, S2>(pairs: I) -> HandlerKey
    where
        I: IntoIterator<Item = (S1, S2)>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (normalize(k.as_ref()), normalize(v.as_ref())))
            .collect();
        pairs.sort();
        pairs.dedup();
        HandlerKey { pairs }
    }

    /// A key matching a single `Event-Name`.
    pub fn event_name(name: &str) -> HandlerKey {
        HandlerKey::new([("Event-Name", name)])
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }

    /// If this key matches exactly one `Event-Name`, returns it. Used to
    /// auto-subscribe to special events when a handler is registered for
    /// one by name alone.
    pub(crate) fn single_event_name(&self) -> Option<&str> {
        match self.pairs.as_slice() {
            [(k, v)] if k == "EVENT-NAME" => Some(v.as_str()),
            _ => None,
        }
    }

    fn matches(&self, event: &Event) -> bool {
        self.pairs.iter().all(|(k, v)| {
            event
                .headers()
                .iter()
                .any(|(hk, hv)| normalize(hk) == *k && normalize(hv) == *v)
        })
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

/// Stores one handler per [`HandlerKey`], re-registration replaces the
/// previous handler for that exact key. Lookup returns the most specific
/// (largest pair count) matching handler; ties break lexicographically on
/// the sorted key pairs, so lookup order is deterministic regardless of
/// registration order.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<(HandlerKey, Handler)>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            entries: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, key: HandlerKey, handler: Handler) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = handler;
        } else {
            self.entries.push((key, handler));
        }
        // Most specific first; equal specificity breaks lexicographically
        // on the sorted pair list for a deterministic total order.
        self.entries
            .sort_by(|(a, _), (b, _)| Reverse(a.len()).cmp(&Reverse(b.len())).then(a.pairs.cmp(&b.pairs)));
    }

    pub(crate) fn unregister(&mut self, key: &HandlerKey) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the most specific matching handler for `event`, if any.
    pub(crate) fn lookup(&self, event: &Event) -> Option<Handler> {
        self.entries
            .iter()
            .find(|(k, _)| k.matches(event))
            .map(|(_, h)| h.clone())
    }
}
