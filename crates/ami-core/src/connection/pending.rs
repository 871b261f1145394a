//! Pending-waiter table
//!
//! Maps correlation tokens to callers suspended in `submit`, assembles
//! multi-record replies, and remembers tokens whose callers gave up so their
//! late records are swallowed instead of being mistaken for notifications or
//! for another caller's reply.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{AmiError, AmiResult};
use crate::record::{Record, Reply};

/// Bound on remembered abandoned tokens
pub(crate) const ABANDONED_CAPACITY: usize = 1024;

pub(crate) type ReplySender = oneshot::Sender<AmiResult<Reply>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<AmiResult<Reply>>;

struct Waiter {
    action: String,
    records: Vec<Record>,
    tx: ReplySender,
}

/// What the receive loop should do with a decoded record
#[derive(Debug)]
pub(crate) enum Routed {
    /// Appended to (or completed) a caller's reply
    Reply,
    /// Belonged to an abandoned or unknown request and was dropped
    Discarded,
    /// Not a reply: hand to the event router
    Notification(Record),
}

#[derive(Default)]
struct AbandonedSet {
    order: VecDeque<String>,
    tokens: HashSet<String>,
    /// Abandoned tokens whose `Response:` record has not arrived, oldest first
    unanswered: VecDeque<String>,
}

impl AbandonedSet {
    fn insert(&mut self, token: String) {
        if !self.tokens.insert(token.clone()) {
            return;
        }
        self.order.push_back(token.clone());
        self.unanswered.push_back(token);
        while self.order.len() > ABANDONED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.tokens.remove(&oldest);
            }
        }
        while self.unanswered.len() > ABANDONED_CAPACITY {
            self.unanswered.pop_front();
        }
    }

    fn answered(&mut self, token: &str) {
        self.unanswered.retain(|t| t != token);
    }

    /// Attribute an unmarked response to the oldest unanswered abandoned
    /// request
    fn take_unanswered(&mut self, terminal: bool) -> Option<String> {
        let token = self.unanswered.pop_front()?;
        if terminal {
            self.remove(&token);
        }
        Some(token)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.tokens.clear();
        self.unanswered.clear();
    }

    fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    fn remove(&mut self, token: &str) {
        if self.tokens.remove(token) {
            self.order.retain(|t| t != token);
        }
    }
}

/// Whether `record` ends the reply it belongs to
fn is_terminal(record: &Record) -> bool {
    if record.is_response() {
        !record.starts_list()
    } else {
        record.completes_list()
    }
}

#[derive(Default)]
pub(crate) struct PendingTable {
    waiters: DashMap<String, Waiter>,
    abandoned: Mutex<AbandonedSet>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, token: &str, action: &str) -> ReplyReceiver {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            token.to_string(),
            Waiter {
                action: action.to_string(),
                records: Vec::new(),
                tx,
            },
        );
        rx
    }

    /// Drop a waiter whose request never reached the wire
    pub(crate) fn remove(&self, token: &str) {
        self.waiters.remove(token);
    }

    /// Give up on a token after a timeout.
    ///
    /// Returns false when the reply completed concurrently, in which case the
    /// result is already in the caller's channel.
    pub(crate) fn abandon(&self, token: &str) -> bool {
        match self.waiters.remove(token) {
            Some((token, waiter)) => {
                debug!(action_id = %token, action = %waiter.action, "Abandoning pending reply");
                self.abandoned.lock().insert(token);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Fail every waiter with `err`
    pub(crate) fn fail_all(&self, err: &AmiError) {
        let tokens: Vec<String> = self.waiters.iter().map(|e| e.key().clone()).collect();
        for token in tokens {
            if let Some((_, waiter)) = self.waiters.remove(&token) {
                let _ = waiter.tx.send(Err(err.clone()));
            }
        }
        self.abandoned.lock().clear();
    }

    /// Route one inbound record
    pub(crate) fn accept(&self, record: Record) -> Routed {
        let terminal = is_terminal(&record);
        let token = match record.action_id() {
            Some(id) => id.to_string(),
            None if record.is_response() => {
                // Late replies of timed-out requests come first on the wire
                if let Some(stale) = self.abandoned.lock().take_unanswered(terminal) {
                    debug!(action_id = %stale, "Discarding unmarked response of abandoned request");
                    return Routed::Discarded;
                }
                match self.sole_waiter() {
                    // Serialized fallback for replies that lost their marker
                    Some(token) => token,
                    None => {
                        warn!(pending = self.len(), "Response without ActionID cannot be matched, dropping");
                        return Routed::Discarded;
                    }
                }
            }
            None => return Routed::Notification(record),
        };

        let is_response = record.is_response();
        if let Some(mut waiter) = self.waiters.get_mut(&token) {
            waiter.records.push(record);
            // Release the shard lock before removing the entry
            drop(waiter);
            if is_response {
                // Replies arrive in submission order: older abandoned
                // requests will never be answered now
                self.abandoned.lock().unanswered.clear();
            }
            if terminal {
                self.complete(&token);
            }
            return Routed::Reply;
        }

        let mut abandoned = self.abandoned.lock();
        if abandoned.contains(&token) {
            if is_response {
                abandoned.answered(&token);
            }
            if terminal {
                abandoned.remove(&token);
            }
            debug!(action_id = %token, "Discarding record for abandoned request");
            return Routed::Discarded;
        }
        drop(abandoned);

        if record.is_response() {
            debug!(action_id = %token, "Discarding stale response");
            Routed::Discarded
        } else {
            Routed::Notification(record)
        }
    }

    fn sole_waiter(&self) -> Option<String> {
        if self.waiters.len() != 1 {
            return None;
        }
        self.waiters.iter().next().map(|e| e.key().clone())
    }

    fn complete(&self, token: &str) {
        if let Some((token, waiter)) = self.waiters.remove(token) {
            debug!(action_id = %token, action = %waiter.action, records = waiter.records.len(), "Reply complete");
            let _ = waiter.tx.send(Ok(Reply::new(waiter.records)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        Record::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn single_record_reply() {
        let table = PendingTable::new();
        let mut rx = table.register("a-1", "Ping");
        let routed = table.accept(rec(&[("Response", "Success"), ("ActionID", "a-1"), ("Ping", "Pong")]));
        assert!(matches!(routed, Routed::Reply));
        let reply = rx.try_recv().unwrap().unwrap();
        assert!(reply.is_success());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn list_reply_collects_until_complete() {
        let table = PendingTable::new();
        let mut rx = table.register("a-2", "CoreShowChannels");
        table.accept(rec(&[("Response", "Success"), ("ActionID", "a-2"), ("EventList", "start")]));
        table.accept(rec(&[("Event", "CoreShowChannel"), ("ActionID", "a-2"), ("Channel", "PJSIP/1001-1")]));
        assert!(rx.try_recv().is_err());
        table.accept(rec(&[("Event", "CoreShowChannelsComplete"), ("ActionID", "a-2"), ("EventList", "Complete")]));
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.records().len(), 3);
        assert_eq!(reply.items().count(), 1);
    }

    #[test]
    fn abandoned_tokens_swallow_late_records() {
        let table = PendingTable::new();
        let _rx = table.register("a-3", "CoreShowChannels");
        assert!(table.abandon("a-3"));
        assert!(matches!(
            table.accept(rec(&[("Response", "Success"), ("ActionID", "a-3"), ("EventList", "start")])),
            Routed::Discarded
        ));
        assert!(matches!(
            table.accept(rec(&[("Event", "CoreShowChannel"), ("ActionID", "a-3")])),
            Routed::Discarded
        ));
        assert!(matches!(
            table.accept(rec(&[("Event", "CoreShowChannelsComplete"), ("ActionID", "a-3")])),
            Routed::Discarded
        ));
        // Token forgotten after its terminal record
        assert!(matches!(
            table.accept(rec(&[("Event", "Custom"), ("ActionID", "a-3")])),
            Routed::Notification(_)
        ));
    }

    #[test]
    fn unmarked_response_goes_to_sole_waiter() {
        let table = PendingTable::new();
        let mut rx = table.register("a-4", "Ping");
        assert!(matches!(table.accept(rec(&[("Response", "Success")])), Routed::Reply));
        assert!(rx.try_recv().unwrap().is_ok());

        let _a = table.register("a-5", "Ping");
        let _b = table.register("a-6", "Ping");
        assert!(matches!(table.accept(rec(&[("Response", "Success")])), Routed::Discarded));
    }

    #[test]
    fn events_without_marker_are_notifications() {
        let table = PendingTable::new();
        let _rx = table.register("a-7", "Ping");
        assert!(matches!(
            table.accept(rec(&[("Event", "Hangup"), ("Channel", "PJSIP/1001-1")])),
            Routed::Notification(_)
        ));
    }

    #[test]
    fn fail_all_reports_link_down() {
        let table = PendingTable::new();
        let mut rx = table.register("a-8", "Ping");
        table.fail_all(&AmiError::link_down("eof"));
        assert!(matches!(rx.try_recv().unwrap(), Err(AmiError::LinkDown { .. })));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn abandoned_set_is_bounded() {
        let table = PendingTable::new();
        for i in 0..(ABANDONED_CAPACITY + 10) {
            let token = format!("t-{}", i);
            let _rx = table.register(&token, "Ping");
            table.abandon(&token);
        }
        let abandoned = table.abandoned.lock();
        assert_eq!(abandoned.order.len(), ABANDONED_CAPACITY);
        assert!(!abandoned.contains("t-0"));
    }

    #[test]
    fn unmarked_late_reply_skips_the_next_waiter() {
        let table = PendingTable::new();
        let _a = table.register("a-9", "Ping");
        assert!(table.abandon("a-9"));

        let mut rx = table.register("a-10", "Ping");
        assert!(matches!(
            table.accept(rec(&[("Response", "Success"), ("Echo", "stale")])),
            Routed::Discarded
        ));
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            table.accept(rec(&[("Response", "Success"), ("Echo", "fresh")])),
            Routed::Reply
        ));
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.response().unwrap().get("Echo"), Some("fresh"));
    }

    #[test]
    fn marked_late_reply_counts_as_answered() {
        let table = PendingTable::new();
        let _a = table.register("a-11", "Ping");
        table.abandon("a-11");
        assert!(matches!(
            table.accept(rec(&[("Response", "Success"), ("ActionID", "a-11")])),
            Routed::Discarded
        ));

        let mut rx = table.register("a-12", "Ping");
        assert!(matches!(table.accept(rec(&[("Response", "Success")])), Routed::Reply));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn newer_reply_forgets_unanswered_requests() {
        let table = PendingTable::new();
        let _a = table.register("a-13", "Ping");
        table.abandon("a-13");

        let mut first = table.register("a-14", "Ping");
        table.accept(rec(&[("Response", "Success"), ("ActionID", "a-14")]));
        assert!(first.try_recv().unwrap().is_ok());

        let mut second = table.register("a-15", "Ping");
        assert!(matches!(table.accept(rec(&[("Response", "Success")])), Routed::Reply));
        assert!(second.try_recv().unwrap().is_ok());
    }

    #[test]
    fn fail_all_forgets_unanswered_requests() {
        let table = PendingTable::new();
        let _a = table.register("a-16", "Ping");
        table.abandon("a-16");
        table.fail_all(&AmiError::link_down("eof"));

        let mut rx = table.register("a-17", "Ping");
        assert!(matches!(table.accept(rec(&[("Response", "Success")])), Routed::Reply));
        assert!(rx.try_recv().unwrap().is_ok());
    }
}
