//! Chat orchestrator — the one component that sees both controllers.
//!
//! Every user action follows the same shape: mutate local state
//! optimistically, dispatch the remote call, reconcile on the answer. The
//! message pipeline is serialized by the transcript's in-flight guard; the
//! file pipeline deliberately is not, and overlapping batches reconcile
//! independently through their batch ids.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::client::{FilePayload, RemoteService};
use crate::files::{BatchError, BatchId, FileStore, RemovalOutcome};
use crate::transcript::{DeliveryStatus, Transcript};

// ── Events ────────────────────────────────────────────────────────────────────

/// Transition notifications for whatever front end is attached. The
/// controllers stay free of presentation concerns; subscribers decide what a
/// transition sounds or looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A user turn was accepted and is being dispatched.
    SubmissionAccepted { index: usize },
    /// The in-flight user turn reached a terminal status.
    TurnResolved {
        index: usize,
        status: DeliveryStatus,
    },
    /// An assistant turn was appended (real answer or apology).
    AssistantReplied { index: usize },
    TypingChanged(bool),
    BatchStarted { batch: BatchId },
    BatchResolved { batch: BatchId, accepted: bool },
    FilesCleared,
    RagChanged(bool),
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct ChatSession {
    transcript: Transcript,
    files: FileStore,
    remote: Box<dyn RemoteService>,
    events: UnboundedSender<ChatEvent>,
    /// Last RAG value announced on the channel, so silent invariant drops
    /// inside the file store still surface exactly once.
    rag_announced: bool,
}

impl ChatSession {
    pub fn new(remote: Box<dyn RemoteService>, events: UnboundedSender<ChatEvent>) -> Self {
        Self {
            transcript: Transcript::default(),
            files: FileStore::default(),
            remote,
            events,
            rag_announced: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Whether the next submission would request retrieval-augmented
    /// answering. Recomputed from live state at every call, never cached —
    /// a file removed between toggle and submission disables context use
    /// with no extra synchronization.
    pub fn use_context(&self) -> bool {
        self.files.rag_enabled() && self.files.has_eligible_file()
    }

    // ── Message pipeline ──────────────────────────────────────────────────

    /// Submit one chat turn and drive it to a terminal status. Returns false
    /// when the controller refused the submission (blank text, or another
    /// turn still in flight).
    pub async fn submit(&mut self, text: &str) -> bool {
        let Some(index) = self.transcript.begin_submission(text) else {
            return false;
        };
        let message = self.transcript.turns()[index].content.clone();
        let use_context = self.use_context();
        self.emit(ChatEvent::SubmissionAccepted { index });
        self.emit(ChatEvent::TypingChanged(true));

        debug!(index, use_context, "dispatching chat message");
        let outcome = self.remote.send_chat_message(&message, use_context).await;
        if let Err(err) = &outcome {
            debug!(index, error = %err, "chat round trip failed");
        }
        self.transcript.complete_submission(index, outcome);

        let status = self.transcript.turns()[index].delivery_status;
        self.emit(ChatEvent::TurnResolved { index, status });
        self.emit(ChatEvent::AssistantReplied {
            index: self.transcript.len() - 1,
        });
        self.emit(ChatEvent::TypingChanged(false));
        true
    }

    /// Always increments — repeat reactions are counted, not deduplicated.
    pub fn add_reaction(&mut self, index: usize, emoji: &str) -> bool {
        self.transcript.add_reaction(index, emoji)
    }

    /// Full session reset. Discards the transcript; the file set and its
    /// clear path are a separate lifecycle.
    pub fn reset_transcript(&mut self) {
        self.transcript.reset();
    }

    // ── File pipeline ─────────────────────────────────────────────────────

    /// Upload a batch. Validation happens before any bytes move: one bad
    /// extension refuses the whole batch with nothing registered and no
    /// request dispatched.
    pub async fn upload(&mut self, files: Vec<FilePayload>) -> Result<BatchId, BatchError> {
        let batch = self
            .files
            .begin_batch(files.iter().map(|f| f.name.as_str()))?;
        // A name collision can have replaced the last eligible file.
        self.announce_rag();
        self.emit(ChatEvent::BatchStarted { batch });

        debug!(?batch, count = files.len(), "dispatching upload batch");
        let outcome = self.remote.upload_files(files).await;
        let accepted = outcome.is_ok();
        if let Err(err) = &outcome {
            debug!(?batch, error = %err, "upload batch failed");
        }
        self.files
            .resolve_batch(batch, outcome.map_err(|e| e.detail()));
        self.announce_rag();
        self.emit(ChatEvent::BatchResolved { batch, accepted });
        Ok(batch)
    }

    /// Flip a file's inclusion flag. No-op unless the file is accepted.
    pub fn toggle_inclusion(&mut self, name: &str) -> bool {
        let changed = self.files.toggle_inclusion(name);
        self.announce_rag();
        changed
    }

    /// Raise or lower the session RAG flag. Raising is silently refused
    /// unless an accepted, included file exists right now.
    pub fn set_rag_enabled(&mut self, value: bool) -> bool {
        let honored = self.files.set_rag_enabled(value);
        self.announce_rag();
        honored
    }

    /// Remove a file by name; removing the last one runs the same purge
    /// path as `clear_all`.
    pub async fn remove_file(&mut self, name: &str) -> bool {
        match self.files.remove(name) {
            RemovalOutcome::NotFound => false,
            RemovalOutcome::Removed => {
                self.announce_rag();
                true
            }
            RemovalOutcome::RemovedLastFile => {
                self.clear_all().await;
                true
            }
        }
    }

    /// Purge remote and local file state. The local clear is unconditional:
    /// a failed remote purge leaves the server ahead of us, and the UI keeps
    /// trusting local state (known, accepted divergence).
    pub async fn clear_all(&mut self) {
        if let Err(err) = self.remote.clear_files().await {
            warn!(error = %err, "remote purge failed; clearing local state anyway");
        }
        self.files.clear_local();
        self.announce_rag();
        self.emit(ChatEvent::FilesCleared);
    }

    // ── Plumbing ──────────────────────────────────────────────────────────

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn announce_rag(&mut self) {
        let now = self.files.rag_enabled();
        if now != self.rag_announced {
            self.rag_announced = now;
            self.emit(ChatEvent::RagChanged(now));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
