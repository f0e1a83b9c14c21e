//! Request/response correlation.
//!
//! Every outgoing request carries a tag `<unixSeconds>--<sequence>`; the
//! sequence restarts at zero whenever the second advances. The server echoes
//! the tag on its reply, and [`MessageCorrelator::resolve`] completes the one
//! pending handle registered under it. Replies may arrive in any order.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::time::unix_seconds;

struct PendingRequest<T> {
    handle: oneshot::Sender<T>,
    issued_at: Instant,
}

/// Owned map from correlation tag to completion handle.
pub struct MessageCorrelator<T> {
    pending: HashMap<String, PendingRequest<T>>,
    last_second: u64,
    sequence: u64,
}

impl<T> Default for MessageCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageCorrelator<T> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            last_second: 0,
            sequence: 0,
        }
    }

    /// Next tag for the current wall-clock second.
    pub fn next_tag(&mut self) -> String {
        self.next_tag_at(unix_seconds())
    }

    /// Next tag as if the clock read `now`. A clock that steps backwards
    /// keeps counting within the last second seen, so tags never repeat.
    pub fn next_tag_at(&mut self, now: u64) -> String {
        if now > self.last_second {
            self.last_second = now;
            self.sequence = 0;
        }
        let tag = format!("{}--{}", self.last_second, self.sequence);
        self.sequence += 1;
        tag
    }

    /// Register a completion handle before the request is transmitted.
    pub fn register(&mut self, tag: impl Into<String>, handle: oneshot::Sender<T>) -> Result<()> {
        let tag = tag.into();
        if self.pending.contains_key(&tag) {
            return Err(ProtocolError::Custom(format!(
                "{}: {tag}",
                constants::ERR_DUPLICATE_TAG
            )));
        }
        trace!(%tag, "registered pending request");
        self.pending.insert(
            tag,
            PendingRequest {
                handle,
                issued_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Allocate a tag and register a fresh handle under it.
    pub fn issue(&mut self) -> (String, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let mut tag = self.next_tag();
        while self.pending.contains_key(&tag) {
            tag = self.next_tag();
        }
        self.pending.insert(
            tag.clone(),
            PendingRequest {
                handle: tx,
                issued_at: Instant::now(),
            },
        );
        (tag, rx)
    }

    /// Complete the request registered under `tag` and forget it.
    ///
    /// # Errors
    /// `UnexpectedMessage` when nothing is pending under `tag`.
    pub fn resolve(&mut self, tag: &str, value: T) -> Result<()> {
        let request = self
            .pending
            .remove(tag)
            .ok_or_else(|| ProtocolError::UnexpectedMessage(tag.to_owned()))?;
        if request.handle.send(value).is_err() {
            debug!(%tag, "response arrived after the caller stopped waiting");
        }
        Ok(())
    }

    /// Drop a pending request; its receiver observes a closed channel.
    pub fn cancel(&mut self, tag: &str) -> bool {
        self.pending.remove(tag).is_some()
    }

    /// Drop every request older than `max_age`, returning how many went.
    pub fn evict_expired(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending
            .retain(|_, request| now.saturating_duration_since(request.issued_at) < max_age);
        let evicted = before - self.pending.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired requests");
        }
        evicted
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.pending.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop all pending requests.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_sequence_resets_each_second() {
        let mut c = MessageCorrelator::<()>::new();
        assert_eq!(c.next_tag_at(1_700_000_000), "1700000000--0");
        assert_eq!(c.next_tag_at(1_700_000_000), "1700000000--1");
        assert_eq!(c.next_tag_at(1_700_000_001), "1700000001--0");
        // clock stepped back
        assert_eq!(c.next_tag_at(1_700_000_000), "1700000001--1");
    }

    #[tokio::test]
    async fn test_resolve_routes_by_tag() {
        let mut c = MessageCorrelator::new();
        let (tag_a, rx_a) = c.issue();
        let (tag_b, rx_b) = c.issue();
        assert_ne!(tag_a, tag_b);

        c.resolve(&tag_b, "b").unwrap();
        c.resolve(&tag_a, "a").unwrap();
        assert_eq!(rx_a.await.unwrap(), "a");
        assert_eq!(rx_b.await.unwrap(), "b");
        assert!(c.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_unexpected() {
        let mut c = MessageCorrelator::new();
        assert!(matches!(
            c.resolve("123--0", 1u8),
            Err(ProtocolError::UnexpectedMessage(tag)) if tag == "123--0"
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut c = MessageCorrelator::<u8>::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        c.register("1--0", tx1).unwrap();
        assert!(c.register("1--0", tx2).is_err());
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_closes_receiver() {
        let mut c = MessageCorrelator::<u8>::new();
        let (tag, rx) = c.issue();
        assert!(c.cancel(&tag));
        assert!(rx.await.is_err());
        assert!(!c.cancel(&tag));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_by_age() {
        let mut c = MessageCorrelator::<u8>::new();
        let (old, _old_rx) = c.issue();
        tokio::time::advance(Duration::from_secs(30)).await;
        let (fresh, _fresh_rx) = c.issue();

        assert_eq!(c.evict_expired(Duration::from_secs(10)), 1);
        assert!(!c.contains(&old));
        assert!(c.contains(&fresh));
    }
}
