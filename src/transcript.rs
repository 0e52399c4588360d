//! Message lifecycle — the ordered chat transcript and per-turn delivery state.
//!
//! User turns move `Sending → Delivered` on a successful round trip or
//! `Sending → Error` on a failed one; the paired assistant turn is appended
//! already terminal (`Sent`). Submission is serialized: while one user turn
//! is in flight the controller refuses to start another, so the transcript
//! is always a total order consistent with submission time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::client::RemoteError;

/// Reply appended in place of an answer when the round trip fails.
pub const ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Two turns by the same author closer together than this render grouped.
const GROUP_WINDOW_MS: i64 = 60_000;

// ── Turn types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// `Sending` is the only non-terminal status, and only user turns pass
/// through it — assistant turns are born `Sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Delivered,
    Sent,
    Error,
}

impl DeliveryStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "⋯",
            DeliveryStatus::Delivered => "✓✓",
            DeliveryStatus::Sent => "✓",
            DeliveryStatus::Error => "✗",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    /// Opaque payload — rendering concerns live with whoever displays it.
    pub content: String,
    /// Wall-clock creation time. Display grouping only, never ordering.
    pub created_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
    /// Emoji → count. Swapped wholesale on update, never mutated through a
    /// shared alias.
    pub reactions: BTreeMap<String, u32>,
}

impl ChatTurn {
    fn new(role: Role, content: String, delivery_status: DeliveryStatus) -> Self {
        Self {
            role,
            content,
            created_at: Utc::now(),
            delivery_status,
            reactions: BTreeMap::new(),
        }
    }
}

/// True when `turn` should render grouped under `previous`: same author,
/// created within the grouping window. Pure display batching — no effect on
/// delivery state.
pub fn should_group_with_previous(turn: &ChatTurn, previous: Option<&ChatTurn>) -> bool {
    let Some(prev) = previous else { return false };
    turn.role == prev.role
        && (turn.created_at - prev.created_at).num_milliseconds() < GROUP_WINDOW_MS
}

// ── Transcript controller ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
    /// Raised between submission acceptance and reconciliation; blocks a
    /// second submission from starting.
    awaiting_response: bool,
    typing: bool,
}

impl Transcript {
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn typing(&self) -> bool {
        self.typing
    }

    /// Accept a submission: append the user turn as `Sending`, raise the
    /// in-flight guard and the typing indicator, return the turn index.
    /// Returns None — a no-op, nothing appended — when the text trims to
    /// nothing or another submission is still in flight.
    pub fn begin_submission(&mut self, text: &str) -> Option<usize> {
        let text = text.trim();
        if text.is_empty() || self.awaiting_response {
            return None;
        }
        self.turns.push(ChatTurn::new(
            Role::User,
            text.to_string(),
            DeliveryStatus::Sending,
        ));
        self.awaiting_response = true;
        self.typing = true;
        Some(self.turns.len() - 1)
    }

    /// Reconcile a finished round trip. The user turn goes terminal
    /// (`Delivered` or `Error`), the assistant turn is appended — the real
    /// answer on success, the stock apology on failure — and the guard and
    /// typing indicator drop either way.
    pub fn complete_submission(&mut self, index: usize, outcome: Result<String, RemoteError>) {
        self.awaiting_response = false;
        self.typing = false;

        let Some(turn) = self.turns.get_mut(index) else { return };
        match outcome {
            Ok(reply) => {
                turn.delivery_status = DeliveryStatus::Delivered;
                self.turns
                    .push(ChatTurn::new(Role::Assistant, reply, DeliveryStatus::Sent));
            }
            Err(_) => {
                turn.delivery_status = DeliveryStatus::Error;
                self.turns.push(ChatTurn::new(
                    Role::Assistant,
                    ERROR_REPLY.to_string(),
                    DeliveryStatus::Sent,
                ));
            }
        }
    }

    /// Increment the count for `emoji` on the referenced turn, creating the
    /// entry at 1. Always increments — repeat invocations are deliberately
    /// not deduplicated. Returns false for an out-of-range index.
    pub fn add_reaction(&mut self, index: usize, emoji: &str) -> bool {
        let Some(turn) = self.turns.get_mut(index) else { return false };
        // Replace-on-write: build the updated map and swap it in, so an
        // observer holding a clone of the turn never sees a partial update.
        let mut updated = turn.reactions.clone();
        *updated.entry(emoji.to_string()).or_insert(0) += 1;
        turn.reactions = updated;
        true
    }

    /// Full session reset — the only operation that ever discards turns
    /// (and with them their reactions).
    pub fn reset(&mut self) {
        self.turns.clear();
        self.awaiting_response = false;
        self.typing = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn turn_at(role: Role, offset_ms: i64) -> ChatTurn {
        let mut t = ChatTurn::new(role, "x".into(), DeliveryStatus::Sent);
        t.created_at = Utc::now() + Duration::milliseconds(offset_ms);
        t
    }

    #[test]
    fn successful_round_trip() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("hello").unwrap();
        assert!(tr.awaiting_response());
        assert!(tr.typing());
        assert_eq!(tr.turns()[idx].delivery_status, DeliveryStatus::Sending);

        tr.complete_submission(idx, Ok("hi there".into()));
        assert_eq!(tr.len(), 2);
        assert_eq!(tr.turns()[0].role, Role::User);
        assert_eq!(tr.turns()[0].content, "hello");
        assert_eq!(tr.turns()[0].delivery_status, DeliveryStatus::Delivered);
        assert_eq!(tr.turns()[1].role, Role::Assistant);
        assert_eq!(tr.turns()[1].content, "hi there");
        assert_eq!(tr.turns()[1].delivery_status, DeliveryStatus::Sent);
        assert!(!tr.awaiting_response());
        assert!(!tr.typing());
    }

    #[test]
    fn failed_round_trip_retains_user_turn() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("hello").unwrap();
        tr.complete_submission(idx, Err(RemoteError::Rejected { detail: None }));

        assert_eq!(tr.len(), 2);
        assert_eq!(tr.turns()[0].delivery_status, DeliveryStatus::Error);
        assert_eq!(tr.turns()[1].content, ERROR_REPLY);
        assert_eq!(tr.turns()[1].delivery_status, DeliveryStatus::Sent);
        assert!(!tr.awaiting_response());
    }

    #[test]
    fn length_grows_by_two_on_both_paths() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("a").unwrap();
        tr.complete_submission(idx, Ok("b".into()));
        assert_eq!(tr.len(), 2);

        let idx = tr.begin_submission("c").unwrap();
        tr.complete_submission(idx, Err(RemoteError::Rejected { detail: None }));
        assert_eq!(tr.len(), 4);
    }

    #[test]
    fn blank_submission_is_a_noop() {
        let mut tr = Transcript::default();
        assert!(tr.begin_submission("").is_none());
        assert!(tr.begin_submission("   \n\t").is_none());
        assert!(tr.is_empty());
        assert!(!tr.awaiting_response());
    }

    #[test]
    fn submission_is_serialized_while_in_flight() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("first").unwrap();
        assert!(tr.begin_submission("second").is_none());
        assert_eq!(tr.len(), 1);

        tr.complete_submission(idx, Ok("ok".into()));
        assert!(tr.begin_submission("second").is_some());
    }

    #[test]
    fn trimmed_text_is_stored() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("  hello  ").unwrap();
        assert_eq!(tr.turns()[idx].content, "hello");
    }

    #[test]
    fn reactions_always_increment() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("hello").unwrap();
        tr.complete_submission(idx, Ok("hi".into()));

        assert!(tr.add_reaction(1, "👍"));
        assert!(tr.add_reaction(1, "👍"));
        assert!(tr.add_reaction(1, "❤️"));
        let reactions = &tr.turns()[1].reactions;
        assert_eq!(reactions.get("👍"), Some(&2));
        assert_eq!(reactions.get("❤️"), Some(&1));

        assert!(!tr.add_reaction(9, "👍"));
    }

    #[test]
    fn grouping_requires_same_role_within_window() {
        let a = turn_at(Role::User, 0);
        let close_same = turn_at(Role::User, 30_000);
        let close_other = turn_at(Role::Assistant, 30_000);
        let far_same = turn_at(Role::User, 61_000);

        assert!(should_group_with_previous(&close_same, Some(&a)));
        assert!(!should_group_with_previous(&close_other, Some(&a)));
        assert!(!should_group_with_previous(&far_same, Some(&a)));
        assert!(!should_group_with_previous(&a, None));
    }

    #[test]
    fn reset_discards_everything() {
        let mut tr = Transcript::default();
        let idx = tr.begin_submission("hello").unwrap();
        tr.complete_submission(idx, Ok("hi".into()));
        tr.add_reaction(0, "👏");

        tr.reset();
        assert!(tr.is_empty());
        assert!(!tr.awaiting_response());
        assert!(!tr.typing());
    }
}
