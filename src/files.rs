//! File ingestion and retrieval-context state.
//!
//! Uploads are registered optimistically per batch, resolved all-or-nothing
//! when the remote answers, and stored under an opaque per-attempt id so a
//! late-arriving batch outcome can only touch its own entries. Display and
//! removal stay name-keyed: registering a file whose name matches an
//! existing entry silently replaces it.
//!
//! The session RAG flag is slaved to availability — it can only be raised
//! while at least one accepted file is included in context, and it drops the
//! moment the last such file goes away.

use thiserror::Error;

/// Document extensions the backend will ingest. Checked case-insensitively,
/// before any network call.
const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md"];

// ── Ids and statuses ──────────────────────────────────────────────────────────

/// Opaque key for one upload attempt. Never reused, even for a re-upload of
/// the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(u64);

/// Identifies the batch an upload attempt belonged to, for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Uploading,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub id: UploadId,
    batch: BatchId,
    /// Display and removal key.
    pub name: String,
    pub ingest_status: IngestStatus,
    /// Present only when rejected.
    pub error_detail: Option<String>,
    /// Meaningful only once accepted.
    pub included_in_context: bool,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Validation failures — caught before any request is dispatched, leaving
/// the pipeline untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("file type not allowed: {0}")]
    DisallowedExtension(String),
    #[error("empty upload batch")]
    EmptyBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    NotFound,
    Removed,
    /// The set is now empty; the caller should run the full clear path.
    RemovedLastFile,
}

fn extension_allowed(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ── File store ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FileStore {
    files: Vec<UploadedFile>,
    rag_enabled: bool,
    next_upload: u64,
    next_batch: u64,
}

impl FileStore {
    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn rag_enabled(&self) -> bool {
        self.rag_enabled
    }

    /// At least one accepted file is currently included in context.
    pub fn has_eligible_file(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.ingest_status == IngestStatus::Accepted && f.included_in_context)
    }

    /// Register a batch optimistically. Every name must pass the extension
    /// allow-list or the whole batch is refused with nothing registered.
    /// A file sharing a name with an existing entry replaces it.
    pub fn begin_batch<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<BatchId, BatchError> {
        let names: Vec<&str> = names.into_iter().collect();
        if names.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if let Some(bad) = names.iter().find(|n| !extension_allowed(n)) {
            return Err(BatchError::DisallowedExtension(bad.to_string()));
        }

        let batch = BatchId(self.next_batch);
        self.next_batch += 1;
        for name in names {
            // Name collision overwrites silently — the replaced entry may
            // have been the last eligible one, so re-check the flag below.
            self.files.retain(|f| f.name != name);
            let id = UploadId(self.next_upload);
            self.next_upload += 1;
            self.files.push(UploadedFile {
                id,
                batch,
                name: name.to_string(),
                ingest_status: IngestStatus::Uploading,
                error_detail: None,
                included_in_context: false,
            });
        }
        self.enforce_rag_invariant();
        Ok(batch)
    }

    /// All-or-nothing reconciliation: the remote's single answer is applied
    /// to every file of the batch still present. Entries removed in the
    /// meantime are simply gone; other batches are untouched.
    pub fn resolve_batch(&mut self, batch: BatchId, outcome: Result<(), String>) {
        for f in self.files.iter_mut().filter(|f| f.batch == batch) {
            match &outcome {
                Ok(()) => {
                    f.ingest_status = IngestStatus::Accepted;
                    f.included_in_context = true;
                    f.error_detail = None;
                }
                Err(detail) => {
                    f.ingest_status = IngestStatus::Rejected;
                    f.included_in_context = false;
                    f.error_detail = Some(detail.clone());
                }
            }
        }
        self.enforce_rag_invariant();
    }

    /// Flip inclusion for an accepted file; no-op for anything not yet
    /// accepted. Returns whether anything changed.
    pub fn toggle_inclusion(&mut self, name: &str) -> bool {
        let Some(f) = self
            .files
            .iter_mut()
            .find(|f| f.name == name && f.ingest_status == IngestStatus::Accepted)
        else {
            return false;
        };
        f.included_in_context = !f.included_in_context;
        self.enforce_rag_invariant();
        true
    }

    /// Remove by display name. Reports whether the set just became empty so
    /// the caller can run the remote clear path.
    pub fn remove(&mut self, name: &str) -> RemovalOutcome {
        let before = self.files.len();
        self.files.retain(|f| f.name != name);
        if self.files.len() == before {
            return RemovalOutcome::NotFound;
        }
        self.enforce_rag_invariant();
        if self.files.is_empty() {
            RemovalOutcome::RemovedLastFile
        } else {
            RemovalOutcome::Removed
        }
    }

    /// Unconditional local clear: empties the set and forces the RAG flag
    /// off. The caller decides what to do about the remote — local state
    /// wins either way.
    pub fn clear_local(&mut self) {
        self.files.clear();
        self.rag_enabled = false;
    }

    /// Raising the flag is honored only while an accepted, included file
    /// exists right now; otherwise the call is a silent no-op. Lowering
    /// always succeeds. Returns whether the call was honored.
    pub fn set_rag_enabled(&mut self, value: bool) -> bool {
        if value && !self.has_eligible_file() {
            return false;
        }
        self.rag_enabled = value;
        true
    }

    /// The flag must never outlive the last eligible file.
    fn enforce_rag_invariant(&mut self) {
        if self.rag_enabled && !self.has_eligible_file() {
            self.rag_enabled = false;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted_store(names: &[&str]) -> FileStore {
        let mut store = FileStore::default();
        let batch = store.begin_batch(names.iter().copied()).unwrap();
        store.resolve_batch(batch, Ok(()));
        store
    }

    #[test]
    fn one_bad_extension_rejects_the_whole_batch() {
        let mut store = FileStore::default();
        let err = store
            .begin_batch(["notes.pdf", "slides.pptx"])
            .unwrap_err();
        assert_eq!(
            err,
            BatchError::DisallowedExtension("slides.pptx".to_string())
        );
        assert!(!store.has_files());
    }

    #[test]
    fn extension_check_is_case_insensitive_and_requires_one() {
        assert!(extension_allowed("Report.PDF"));
        assert!(extension_allowed("a.b.txt"));
        assert!(!extension_allowed("README"));
        assert!(!extension_allowed("archive.tar.gz"));
    }

    #[test]
    fn accepted_batch_is_included_by_default() {
        let store = accepted_store(&["notes.pdf", "todo.txt"]);
        assert_eq!(store.files().len(), 2);
        for f in store.files() {
            assert_eq!(f.ingest_status, IngestStatus::Accepted);
            assert!(f.included_in_context);
            assert!(f.error_detail.is_none());
        }
        assert!(store.has_eligible_file());
    }

    #[test]
    fn failed_batch_shares_one_error_detail() {
        let mut store = FileStore::default();
        let batch = store.begin_batch(["a.pdf", "b.md"]).unwrap();
        store.resolve_batch(batch, Err("ingest backend unavailable".into()));

        for f in store.files() {
            assert_eq!(f.ingest_status, IngestStatus::Rejected);
            assert!(!f.included_in_context);
            assert_eq!(
                f.error_detail.as_deref(),
                Some("ingest backend unavailable")
            );
        }
        assert!(!store.has_eligible_file());
    }

    #[test]
    fn late_batch_outcome_only_touches_its_own_files() {
        let mut store = FileStore::default();
        let first = store.begin_batch(["a.pdf"]).unwrap();
        let second = store.begin_batch(["b.pdf"]).unwrap();

        // Second batch resolves before the first.
        store.resolve_batch(second, Ok(()));
        store.resolve_batch(first, Err("timeout".into()));

        let a = store.files().iter().find(|f| f.name == "a.pdf").unwrap();
        let b = store.files().iter().find(|f| f.name == "b.pdf").unwrap();
        assert_eq!(a.ingest_status, IngestStatus::Rejected);
        assert_eq!(b.ingest_status, IngestStatus::Accepted);
    }

    #[test]
    fn name_collision_replaces_the_older_entry() {
        let mut store = accepted_store(&["notes.pdf"]);
        let old_id = store.files()[0].id;

        let batch = store.begin_batch(["notes.pdf"]).unwrap();
        assert_eq!(store.files().len(), 1);
        assert_ne!(store.files()[0].id, old_id);
        assert_eq!(store.files()[0].ingest_status, IngestStatus::Uploading);

        store.resolve_batch(batch, Ok(()));
        assert_eq!(store.files()[0].ingest_status, IngestStatus::Accepted);
    }

    #[test]
    fn rag_cannot_be_enabled_without_an_eligible_file() {
        let mut store = FileStore::default();
        assert!(!store.set_rag_enabled(true));
        assert!(!store.rag_enabled());

        let batch = store.begin_batch(["notes.pdf"]).unwrap();
        // Still uploading — not yet eligible.
        assert!(!store.set_rag_enabled(true));

        store.resolve_batch(batch, Ok(()));
        assert!(store.set_rag_enabled(true));
        assert!(store.rag_enabled());
    }

    #[test]
    fn toggling_off_the_last_included_file_drops_the_flag() {
        let mut store = accepted_store(&["notes.pdf"]);
        assert!(store.set_rag_enabled(true));

        assert!(store.toggle_inclusion("notes.pdf"));
        assert!(!store.files()[0].included_in_context);
        assert!(!store.rag_enabled());

        // And it cannot be re-raised while nothing is included.
        assert!(!store.set_rag_enabled(true));
        assert!(!store.rag_enabled());
    }

    #[test]
    fn toggle_is_a_noop_for_files_not_yet_accepted() {
        let mut store = FileStore::default();
        store.begin_batch(["notes.pdf"]).unwrap();
        assert!(!store.toggle_inclusion("notes.pdf"));
        assert!(!store.toggle_inclusion("missing.pdf"));
        assert!(!store.files()[0].included_in_context);
    }

    #[test]
    fn removing_the_last_file_reports_it() {
        let mut store = accepted_store(&["a.pdf", "b.pdf"]);
        assert!(store.set_rag_enabled(true));

        assert_eq!(store.remove("a.pdf"), RemovalOutcome::Removed);
        assert!(store.rag_enabled()); // b.pdf still eligible
        assert_eq!(store.remove("b.pdf"), RemovalOutcome::RemovedLastFile);
        assert!(!store.rag_enabled());
        assert_eq!(store.remove("b.pdf"), RemovalOutcome::NotFound);
    }

    #[test]
    fn removing_the_last_eligible_file_drops_the_flag() {
        let mut store = accepted_store(&["a.pdf", "b.pdf"]);
        assert!(store.toggle_inclusion("b.pdf")); // only a.pdf eligible now
        assert!(store.set_rag_enabled(true));

        assert_eq!(store.remove("a.pdf"), RemovalOutcome::Removed);
        assert!(!store.rag_enabled());
    }

    #[test]
    fn collision_with_the_last_eligible_file_drops_the_flag() {
        let mut store = accepted_store(&["notes.pdf"]);
        assert!(store.set_rag_enabled(true));

        // Re-uploading the same name replaces the accepted entry with an
        // uploading one, so eligibility is gone until the batch resolves.
        store.begin_batch(["notes.pdf"]).unwrap();
        assert!(!store.rag_enabled());
    }

    #[test]
    fn clear_empties_and_forces_the_flag_off() {
        let mut store = accepted_store(&["a.pdf"]);
        assert!(store.set_rag_enabled(true));

        store.clear_local();
        assert!(!store.has_files());
        assert!(!store.rag_enabled());
    }

    #[test]
    fn empty_batch_is_refused() {
        let mut store = FileStore::default();
        assert_eq!(
            store.begin_batch(std::iter::empty::<&str>()),
            Err(BatchError::EmptyBatch)
        );
    }

    #[test]
    fn disabling_rag_is_always_honored() {
        let mut store = accepted_store(&["a.pdf"]);
        assert!(store.set_rag_enabled(true));
        assert!(store.set_rag_enabled(false));
        assert!(!store.rag_enabled());
    }
}
