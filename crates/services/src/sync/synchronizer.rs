use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prep_core::model::{
    ImportError, ProgressRecord, ProgressStats, QuestionId, QuestionProgress,
    QuestionProgressPatch, QuestionStatus,
};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::config::SyncConfig;
use crate::Clock;
use crate::api::{ApiResponse, ProgressApi};

const LOAD_FAILED: &str = "Failed to load progress";
const LOAD_NETWORK_ERROR: &str = "Network error while loading progress";
const SAVE_FAILED: &str = "Failed to save progress";
const SAVE_NETWORK_ERROR: &str = "Network error while saving progress";
const FLUSH_TIMED_OUT: &str = "Timed out while saving progress";

//
// ─── PUBLIC TYPES ──────────────────────────────────────────────────────────────
//

/// What a load or save request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The API answered with success.
    Completed,
    /// A request of the same kind was already in flight; nothing was sent.
    Skipped,
    /// The request failed; the same message is stored as the current error.
    Failed(String),
}

/// Transient flags kept next to the progress record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_loading: bool,
    pub is_saving: bool,
    pub error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub auto_save_enabled: bool,
    pub has_unsaved_changes: bool,
}

//
// ─── SHARED STATE ──────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct SyncState {
    progress: ProgressRecord,
    is_loading: bool,
    is_saving: bool,
    error: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    /// Bumped on every local mutation.
    revision: u64,
    /// Revision the server is known to hold.
    synced_revision: u64,
}

impl SyncState {
    fn has_unsaved_changes(&self) -> bool {
        self.revision != self.synced_revision
    }

    fn fail(&mut self, message: String) -> SyncOutcome {
        warn!(error = %message, "progress sync failed");
        self.error = Some(message.clone());
        SyncOutcome::Failed(message)
    }
}

#[derive(Default)]
struct Timers {
    /// Single-slot debounced save; replaced on every mutation.
    pending_save: Option<PendingSave>,
    auto_save: Option<JoinHandle<()>>,
    next_ticket: u64,
}

struct PendingSave {
    ticket: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    api: Arc<dyn ProgressApi>,
    clock: Clock,
    config: SyncConfig,
    state: Mutex<SyncState>,
    timers: Mutex<Timers>,
}

/// State is only touched in short synchronous sections, so a poisoned lock
/// still holds a consistent value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy)]
enum InFlight {
    Load,
    Save,
}

/// Clears the in-flight flag when a request future is dropped mid-await
/// (aborted task, flush timeout).
struct InFlightGuard<'a> {
    shared: &'a Shared,
    kind: InFlight,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.shared.state);
        match self.kind {
            InFlight::Load => state.is_loading = false,
            InFlight::Save => state.is_saving = false,
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SyncState> {
        lock(&self.state)
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        lock(&self.timers)
    }

    fn has_unsaved_changes(&self) -> bool {
        self.state().has_unsaved_changes()
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut ProgressRecord, DateTime<Utc>) -> R) -> R {
        let now = self.clock.now();
        let mut state = self.state();
        state.revision += 1;
        apply(&mut state.progress, now)
    }

    async fn load(&self) -> SyncOutcome {
        {
            let mut state = self.state();
            if state.is_loading {
                debug!("progress load already in flight; skipping");
                return SyncOutcome::Skipped;
            }
            state.is_loading = true;
            state.error = None;
        }
        let mut guard = InFlightGuard {
            shared: self,
            kind: InFlight::Load,
            armed: true,
        };

        let result = self.api.load_progress().await;
        let now = self.clock.now();

        let mut state = self.state();
        state.is_loading = false;
        guard.disarm();
        match result {
            Ok(ApiResponse {
                success: true,
                data: Some(envelope),
                ..
            }) => {
                state.progress = envelope.progress;
                state.last_sync_at = Some(now);
                state.revision += 1;
                state.synced_revision = state.revision;
                info!(
                    questions = state.progress.question_progress().len(),
                    mastered = state.progress.mastered_questions(),
                    "progress loaded"
                );
                SyncOutcome::Completed
            }
            Ok(response) => {
                let message = response.error.unwrap_or_else(|| LOAD_FAILED.to_string());
                state.fail(message)
            }
            Err(err) => {
                warn!(error = %err, "progress load transport error");
                state.fail(LOAD_NETWORK_ERROR.to_string())
            }
        }
    }

    async fn save(&self) -> SyncOutcome {
        let (snapshot, revision) = {
            let mut state = self.state();
            if state.is_saving {
                debug!("progress save already in flight; skipping");
                return SyncOutcome::Skipped;
            }
            state.is_saving = true;
            state.error = None;
            (state.progress.clone(), state.revision)
        };
        let mut guard = InFlightGuard {
            shared: self,
            kind: InFlight::Save,
            armed: true,
        };

        let result = self.api.save_progress(&snapshot).await;
        let now = self.clock.now();

        let mut state = self.state();
        state.is_saving = false;
        guard.disarm();
        match result {
            Ok(response) if response.success => {
                state.last_sync_at = Some(now);
                state.synced_revision = state.synced_revision.max(revision);
                debug!(revision, "progress saved");
                SyncOutcome::Completed
            }
            Ok(response) => {
                let message = response.error.unwrap_or_else(|| SAVE_FAILED.to_string());
                state.fail(message)
            }
            Err(err) => {
                warn!(error = %err, "progress save transport error");
                state.fail(SAVE_NETWORK_ERROR.to_string())
            }
        }
    }

    /// Bounded save used at teardown.
    async fn flush(&self) -> SyncOutcome {
        let timeout = self.config.flush_timeout;
        if let Ok(outcome) = tokio::time::timeout(timeout, self.save()).await {
            outcome
        } else {
            warn!(?timeout, "final progress flush timed out");
            SyncOutcome::Failed(FLUSH_TIMED_OUT.to_string())
        }
    }

    fn should_auto_save(&self) -> bool {
        let state = self.state();
        state.progress.last_studied().is_some() && !state.is_saving
    }

    /// (Re)arm the debounced save: any pending one is cancelled and a new one
    /// fires after `delay` of quiet.
    fn schedule_save(self: &Arc<Self>, delay: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime available; debounced progress save not scheduled");
            return;
        };

        // Held across spawn so the task cannot look for its ticket before it is stored.
        let mut timers = self.timers();
        timers.next_ticket += 1;
        let ticket = timers.next_ticket;
        if let Some(previous) = timers.pending_save.take() {
            previous.handle.abort();
        }

        let weak = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // A newer schedule replaced this one while it was waking up.
            if !shared.release_pending(ticket) {
                return;
            }
            // Out of the slot and on its own task: nothing can abort it now.
            tokio::spawn(async move {
                shared.save().await;
            });
        });
        timers.pending_save = Some(PendingSave { ticket, handle });
        debug!(?delay, ticket, "progress save scheduled");
    }

    /// Empties the slot if it still holds `ticket`; false when it was replaced.
    fn release_pending(&self, ticket: u64) -> bool {
        let mut timers = self.timers();
        let current = timers
            .pending_save
            .as_ref()
            .is_some_and(|pending| pending.ticket == ticket);
        if current {
            timers.pending_save = None;
        }
        current
    }

    fn cancel_timers(&self) {
        let mut timers = self.timers();
        if let Some(pending) = timers.pending_save.take() {
            pending.handle.abort();
        }
        if let Some(auto_save) = timers.auto_save.take() {
            auto_save.abort();
        }
    }
}

//
// ─── SYNCHRONIZER ──────────────────────────────────────────────────────────────
//

/// In-memory mirror of the signed-in user's progress, kept in step with the
/// progress API.
///
/// Mutations apply locally and immediately; persistence is asynchronous:
/// question updates and exam attempts arm a single debounced save, and an
/// optional auto-save flushes periodically. Failures never propagate to the
/// caller; they are recorded in [`SyncStatus::error`] until cleared.
///
/// At most one save and one load are in flight at a time; overlapping
/// requests are dropped, not queued.
///
/// Call [`ProgressSynchronizer::shutdown`] to stop the timers and flush. A
/// synchronizer dropped with unsaved changes inside a runtime fires one
/// detached best-effort flush, which may not finish before the process exits.
pub struct ProgressSynchronizer {
    shared: Arc<Shared>,
    flushed: bool,
}

impl ProgressSynchronizer {
    #[must_use]
    pub fn new(api: Arc<dyn ProgressApi>, clock: Clock) -> Self {
        Self::with_config(api, clock, SyncConfig::default())
    }

    #[must_use]
    pub fn with_config(api: Arc<dyn ProgressApi>, clock: Clock, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                clock,
                config,
                state: Mutex::new(SyncState::default()),
                timers: Mutex::new(Timers::default()),
            }),
            flushed: false,
        }
    }

    // ─── Remote sync ──────────────────────────────────────────────────────────

    /// Replace the in-memory record with the server's copy.
    ///
    /// On failure the record is left exactly as it was.
    pub async fn load_progress(&self) -> SyncOutcome {
        self.shared.load().await
    }

    /// Push a snapshot of the in-memory record to the server.
    pub async fn save_progress(&self) -> SyncOutcome {
        self.shared.save().await
    }

    pub fn clear_error(&self) {
        self.shared.state().error = None;
    }

    // ─── Mutations ────────────────────────────────────────────────────────────

    /// Merge `patch` into the question's progress and arm the debounced save.
    pub fn update_question_progress(&self, id: QuestionId, patch: QuestionProgressPatch) {
        self.shared
            .mutate(|progress, now| progress.update_question(id, patch, now));
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
    }

    /// Append a finished exam and arm the (shorter) debounced save.
    pub fn add_exam_attempt(&self, attempt: Map<String, Value>) {
        self.shared
            .mutate(|progress, now| progress.add_exam_attempt(attempt, now));
        self.shared.schedule_save(self.shared.config.exam_save_delay);
    }

    /// Add study time. Does not schedule a save on its own.
    pub fn update_study_time(&self, seconds: u64) {
        self.shared
            .mutate(|progress, now| progress.add_study_time(seconds, now));
    }

    pub fn record_answer(
        &self,
        id: QuestionId,
        correct: bool,
        time_spent: u64,
        domain: Option<String>,
    ) {
        self.shared.mutate(|progress, now| {
            progress.record_answer(id, correct, time_spent, domain, now);
        });
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
    }

    pub fn mark_mastered(&self, id: QuestionId) {
        self.update_question_progress(id, QuestionProgressPatch::status(QuestionStatus::Mastered));
    }

    pub fn mark_for_review(&self, id: QuestionId) {
        self.update_question_progress(id, QuestionProgressPatch::status(QuestionStatus::Studying));
    }

    pub fn toggle_bookmark(&self, id: QuestionId) {
        self.shared
            .mutate(|progress, now| progress.toggle_bookmark(id, now));
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
    }

    pub fn add_note(&self, id: QuestionId, note: &str) {
        self.shared
            .mutate(|progress, now| progress.add_note(id, note, now));
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
    }

    /// Recount totals and per-domain stats against the content catalog.
    pub fn recalculate(&self, total_questions: u32, questions_by_domain: &BTreeMap<String, u32>) {
        self.shared.mutate(|progress, now| {
            progress.recalculate(total_questions, questions_by_domain, now);
        });
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
    }

    pub fn reset_progress(&self) {
        self.shared.mutate(|progress, _| progress.reset());
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
    }

    /// Replace the record with an exported backup.
    ///
    /// # Errors
    ///
    /// Returns `ImportError` if the backup cannot be parsed; the record is
    /// left untouched in that case.
    pub fn import_progress(&self, raw: &str) -> Result<(), ImportError> {
        let imported = ProgressRecord::import_json(raw)?;
        self.shared.mutate(|progress, _| *progress = imported);
        self.shared
            .schedule_save(self.shared.config.question_save_delay);
        Ok(())
    }

    // ─── Reads ────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn export_progress(&self) -> Result<String, serde_json::Error> {
        let now = self.shared.clock.now();
        self.shared.state().progress.export_json(now)
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressRecord {
        self.shared.state().progress.clone()
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<QuestionProgress> {
        self.shared.state().progress.question(id).cloned()
    }

    #[must_use]
    pub fn bookmarked_questions(&self) -> Vec<QuestionProgress> {
        self.shared
            .state()
            .progress
            .bookmarked_questions()
            .into_iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        self.shared.state().progress.stats()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let auto_save_enabled = self.is_auto_save_enabled();
        let state = self.shared.state();
        SyncStatus {
            is_loading: state.is_loading,
            is_saving: state.is_saving,
            error: state.error.clone(),
            last_sync_at: state.last_sync_at,
            auto_save_enabled,
            has_unsaved_changes: state.has_unsaved_changes(),
        }
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.shared.has_unsaved_changes()
    }

    // ─── Auto-save ────────────────────────────────────────────────────────────

    /// Start the periodic save. Calling it again while enabled does nothing.
    ///
    /// Each tick saves only if something has been studied and no save is in
    /// flight.
    pub fn enable_auto_save(&self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime available; auto-save not enabled");
            return;
        };
        let mut timers = self.shared.timers();
        if timers.auto_save.is_some() {
            debug!("auto-save already enabled");
            return;
        }

        let period = self.shared.config.auto_save_interval;
        let weak = Arc::downgrade(&self.shared);
        timers.auto_save = Some(runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if shared.should_auto_save() {
                    // Detached so disabling auto-save never cuts a save short.
                    tokio::spawn(async move {
                        shared.save().await;
                    });
                }
            }
        }));
        info!(?period, "auto-save enabled");
    }

    pub fn disable_auto_save(&self) {
        if let Some(handle) = self.shared.timers().auto_save.take() {
            handle.abort();
            info!("auto-save disabled");
        }
    }

    #[must_use]
    pub fn is_auto_save_enabled(&self) -> bool {
        self.shared.timers().auto_save.is_some()
    }

    // ─── Teardown ─────────────────────────────────────────────────────────────

    /// Stop all timers and flush unsaved changes, waiting at most the
    /// configured flush timeout.
    ///
    /// Returns `Skipped` when there is nothing to save or a save is already
    /// in flight.
    pub async fn shutdown(mut self) -> SyncOutcome {
        self.flushed = true;
        self.shared.cancel_timers();
        if !self.shared.has_unsaved_changes() {
            return SyncOutcome::Skipped;
        }
        self.shared.flush().await
    }
}

impl Drop for ProgressSynchronizer {
    fn drop(&mut self) {
        self.shared.cancel_timers();
        if self.flushed || !self.shared.has_unsaved_changes() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("progress synchronizer dropped with unsaved changes outside a runtime");
            return;
        };
        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            shared.flush().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProgressEnvelope;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use prep_core::time::fixed_clock;

    struct FailingApi;

    #[async_trait]
    impl ProgressApi for FailingApi {
        async fn load_progress(&self) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
            Err(TransportError::HttpStatus(reqwest::StatusCode::BAD_GATEWAY))
        }

        async fn save_progress(
            &self,
            _progress: &ProgressRecord,
        ) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
            Ok(ApiResponse {
                success: false,
                data: None,
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn failures_normalize_to_messages() {
        let sync = ProgressSynchronizer::new(Arc::new(FailingApi), fixed_clock());

        let outcome = sync.load_progress().await;
        assert_eq!(outcome, SyncOutcome::Failed(LOAD_NETWORK_ERROR.to_string()));
        assert_eq!(sync.status().error.as_deref(), Some(LOAD_NETWORK_ERROR));
        assert!(!sync.status().is_loading);

        let outcome = sync.save_progress().await;
        assert_eq!(outcome, SyncOutcome::Failed(SAVE_FAILED.to_string()));
        assert!(!sync.status().is_saving);

        sync.clear_error();
        assert_eq!(sync.status().error, None);
    }

    #[test]
    fn mutations_without_runtime_apply_locally() {
        let sync = ProgressSynchronizer::new(Arc::new(FailingApi), fixed_clock());
        sync.mark_mastered(QuestionId::new(1));
        sync.enable_auto_save();

        assert_eq!(sync.snapshot().mastered_questions(), 1);
        assert!(sync.has_unsaved_changes());
        assert!(!sync.is_auto_save_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_ticket_never_releases_the_slot() {
        let sync = ProgressSynchronizer::new(Arc::new(FailingApi), fixed_clock());
        sync.mark_mastered(QuestionId::new(1));
        sync.mark_mastered(QuestionId::new(2));

        // The first schedule lost its slot to the second one.
        assert!(!sync.shared.release_pending(1));
        assert!(sync.shared.timers().pending_save.is_some());

        assert!(sync.shared.release_pending(2));
        assert!(sync.shared.timers().pending_save.is_none());
        assert!(!sync.shared.release_pending(2));
    }

    #[tokio::test]
    async fn guard_clears_flag_when_save_is_dropped() {
        struct StalledApi;

        #[async_trait]
        impl ProgressApi for StalledApi {
            async fn load_progress(
                &self,
            ) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
                std::future::pending().await
            }

            async fn save_progress(
                &self,
                _progress: &ProgressRecord,
            ) -> Result<ApiResponse<ProgressEnvelope>, TransportError> {
                std::future::pending().await
            }
        }

        let sync = ProgressSynchronizer::new(Arc::new(StalledApi), fixed_clock());
        let attempt =
            tokio::time::timeout(Duration::from_millis(10), sync.save_progress()).await;
        assert!(attempt.is_err());
        assert!(!sync.status().is_saving);
    }
}
