//! Capture → transform → replace pipeline.
//!
//! `TextProcessor` is the process-wide context: it owns the
//! `PipelineState`, and `trigger()` is the only way a run starts. Every
//! run ends in `Idle` with exactly one notification, and a failed run
//! leaves the clipboard as it was before the run.

pub mod state;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::clipboard::{ClipboardError, ClipboardGuard};
use crate::config::Config;
use crate::input::{InputError, InputSimulator};
use crate::notify::{Notification, Notifier};
use crate::provider::{ModelParams, TransformError, TransformProvider, TransformRequest};
use crate::retry::RetryPolicy;
use state::{CaptureAttempt, Phase, PipelineState};

/// Between writing the result and pasting it.
const PASTE_SETTLE: Duration = Duration::from_millis(100);

/// Failure classes reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    CaptureTimeout,
    ClipboardUnavailable,
    InputSimulationFailed,
    TextTooLong,
    NetworkTimeout,
    ProviderError,
    MalformedResponse,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::CaptureTimeout => "capture timeout",
            FailureKind::ClipboardUnavailable => "clipboard unavailable",
            FailureKind::InputSimulationFailed => "input simulation failed",
            FailureKind::TextTooLong => "text too long",
            FailureKind::NetworkTimeout => "network timeout",
            FailureKind::ProviderError => "provider error",
            FailureKind::MalformedResponse => "malformed response",
            FailureKind::Cancelled => "cancelled",
        })
    }
}

/// Why a run failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no text captured after {attempts} attempts (is anything selected?)")]
    CaptureTimeout { attempts: u32 },
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("selection is {len} characters, the limit is {max}")]
    TextTooLong { len: usize, max: usize },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("run aborted: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::CaptureTimeout { .. } => FailureKind::CaptureTimeout,
            PipelineError::Clipboard(_) => FailureKind::ClipboardUnavailable,
            PipelineError::Input(_) => FailureKind::InputSimulationFailed,
            PipelineError::TextTooLong { .. } => FailureKind::TextTooLong,
            PipelineError::Transform(TransformError::NetworkTimeout(_)) => {
                FailureKind::NetworkTimeout
            }
            PipelineError::Transform(TransformError::MalformedResponse(_)) => {
                FailureKind::MalformedResponse
            }
            PipelineError::Transform(_) => FailureKind::ProviderError,
            PipelineError::Cancelled(_) | PipelineError::Panicked(_) => FailureKind::Cancelled,
        }
    }
}

/// Everything a run needs from configuration, resolved once.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub prompt: String,
    pub params: ModelParams,
    pub max_text_length: usize,
    pub capture: RetryPolicy,
    /// Empty the clipboard before copying so re-selecting the text
    /// already on the clipboard still registers as a change.
    pub clear_before_copy: bool,
    pub provider_retry: RetryPolicy,
    /// Per provider call.
    pub request_timeout: Duration,
    /// Whole provider stage, retries included.
    pub transform_timeout: Duration,
    /// Whole run.
    pub run_timeout: Duration,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prompt: config.transform.prompt.clone(),
            params: ModelParams::from_config(&config.provider, &config.transform),
            max_text_length: config.transform.max_text_length,
            capture: RetryPolicy::capture(&config.capture),
            clear_before_copy: config.capture.clear_before_copy,
            provider_retry: RetryPolicy::provider(&config.provider),
            request_timeout: config.provider.request_timeout(),
            transform_timeout: Duration::from_secs(config.processor.transform_timeout_secs),
            run_timeout: Duration::from_secs(config.processor.run_timeout_secs),
        }
    }
}

/// The pipeline and its single-flight state.
pub struct TextProcessor {
    clipboard: ClipboardGuard,
    input: Arc<dyn InputSimulator>,
    provider: Arc<dyn TransformProvider>,
    notifier: Arc<dyn Notifier>,
    settings: ProcessorSettings,
    state: Mutex<PipelineState>,
    shutdown: CancellationToken,
}

impl TextProcessor {
    /// Cancelling `shutdown` cancels the in-flight run, which still
    /// restores the clipboard before finishing.
    pub fn new(
        clipboard: ClipboardGuard,
        input: Arc<dyn InputSimulator>,
        provider: Arc<dyn TransformProvider>,
        notifier: Arc<dyn Notifier>,
        settings: ProcessorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            clipboard,
            input,
            provider,
            notifier,
            settings,
            state: Mutex::new(PipelineState::default()),
            shutdown,
        }
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase()
    }

    /// Start a run if idle. Returns `None`, with no other effect, when a
    /// run is already in flight.
    pub fn trigger(self: &Arc<Self>) -> Option<JoinHandle<Notification>> {
        let run_id = Uuid::new_v4();
        {
            let mut state = self.lock_state();
            if !state.try_begin(run_id) {
                tracing::debug!(
                    phase = %state.phase(),
                    in_flight = ?state.run_id(),
                    "trigger ignored, run in progress"
                );
                return None;
            }
        }

        let this = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let span = tracing::info_span!("run", run_id = %run_id);
        Some(tokio::spawn(
            async move { this.run(cancel).await }.instrument(span),
        ))
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, cancel: CancellationToken) -> Notification {
        tracing::info!(
            provider = %self.settings.params.provider_id,
            model = %self.settings.params.model_id,
            input = self.input.name(),
            "run started"
        );
        let outcome = AssertUnwindSafe(self.execute(&cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(&*payload))));
        let snapshot = self.lock_state().take_snapshot();

        let notification = match outcome {
            Ok(chars) => {
                // Result stays on the clipboard; the snapshot is discarded.
                drop(snapshot);
                Notification::Success { chars }
            }
            Err(e) => {
                self.lock_state().advance(Phase::Failed);
                let kind = e.kind();
                tracing::warn!(kind = %kind, error = %e, "run failed");

                if let Some(snap) = snapshot {
                    tracing::debug!(
                        format = snap.format(),
                        saved_at = ?snap.captured_at(),
                        "restoring clipboard"
                    );
                    if let Err(re) = self.clipboard.restore(snap).await {
                        tracing::error!(error = %re, "failed to restore clipboard");
                    }
                }

                Notification::Failure {
                    kind,
                    message: e.to_string(),
                }
            }
        };

        let took = self.lock_state().reset();
        if let Notification::Success { chars } = notification {
            tracing::info!(chars, elapsed_ms = took.as_millis() as u64, "run succeeded");
        }

        self.notifier.notify(&notification).await;
        notification
    }

    /// The whole pipeline, snapshot included, under cancellation and the
    /// hard run timeout. Returns the number of characters pasted.
    async fn execute(&self, cancel: &CancellationToken) -> Result<usize, PipelineError> {
        let run_timeout = self.settings.run_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(PipelineError::Cancelled("shutdown requested".into()))
            }
            finished = tokio::time::timeout(run_timeout, self.snapshot_and_transform()) => {
                finished.unwrap_or_else(|_| {
                    Err(PipelineError::Cancelled(format!(
                        "run exceeded {}s",
                        run_timeout.as_secs_f32()
                    )))
                })
            }
        }
    }

    async fn snapshot_and_transform(&self) -> Result<usize, PipelineError> {
        let snapshot = self.clipboard.snapshot().await?;
        let baseline = if self.settings.clear_before_copy {
            None
        } else {
            snapshot
                .content()
                .as_text()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        };
        self.lock_state().hold_snapshot(snapshot);

        self.transform_selection(baseline).await
    }

    async fn transform_selection(&self, baseline: Option<String>) -> Result<usize, PipelineError> {
        if self.settings.clear_before_copy {
            self.clipboard.clear().await?;
        }

        let text = self.capture(baseline.as_deref()).await?;

        let len = text.chars().count();
        let max = self.settings.max_text_length;
        if len > max {
            return Err(PipelineError::TextTooLong { len, max });
        }
        tracing::info!(chars = len, "selection captured");

        let request = TransformRequest::new(
            text,
            self.settings.prompt.clone(),
            self.settings.params.clone(),
        );
        self.lock_state().advance(Phase::AwaitingTransform);

        let request = &request;
        let request_timeout = self.settings.request_timeout;
        let transform_timeout = self.settings.transform_timeout;
        let attempts = self.settings.provider_retry.execute(
            "transform",
            move |attempt| {
                if attempt > 1 {
                    tracing::warn!(attempt, provider = self.provider.id(), "retrying provider");
                }
                self.provider.transform(request, request_timeout)
            },
            TransformError::is_retryable,
        );
        let result = tokio::time::timeout(transform_timeout, attempts)
            .await
            .map_err(|_| TransformError::NetworkTimeout(transform_timeout))??;
        tracing::debug!(
            chars = result.text.chars().count(),
            metadata = ?result.provider_metadata,
            "transform complete"
        );

        self.lock_state().advance(Phase::ReplacingText);
        self.clipboard.write(&result.text).await?;
        tokio::time::sleep(PASTE_SETTLE).await;
        self.input.trigger_paste().await?;

        Ok(result.text.chars().count())
    }

    /// Fire the copy and poll until the clipboard holds new text.
    async fn capture(&self, baseline: Option<&str>) -> Result<String, PipelineError> {
        self.input.trigger_copy().await?;
        let copied_at = Instant::now();

        let policy = self.settings.capture;
        tokio::time::sleep(policy.base_delay).await;

        policy
            .execute(
                "capture",
                move |attempt| self.poll_capture(attempt, copied_at, baseline),
                |e| matches!(e, PipelineError::CaptureTimeout { .. }),
            )
            .await
    }

    async fn poll_capture(
        &self,
        attempt: u32,
        copied_at: Instant,
        baseline: Option<&str>,
    ) -> Result<String, PipelineError> {
        let content = self.clipboard.read().await?;
        let poll = CaptureAttempt {
            attempt_number: attempt,
            observed_content: content
                .as_text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            elapsed: copied_at.elapsed(),
        };
        tracing::debug!(
            attempt = poll.attempt_number,
            observed_chars = poll.observed_content.as_ref().map(|t| t.chars().count()),
            elapsed_ms = poll.elapsed.as_millis() as u64,
            "capture poll"
        );

        match poll.observed_content {
            Some(text) if Some(text.as_str()) != baseline => Ok(text),
            _ => Err(PipelineError::CaptureTimeout {
                attempts: poll.attempt_number,
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ClipboardContent;
    use crate::clipboard::fake::FakeClipboard;
    use crate::input::fake::FakeInput;
    use crate::notify::fake::RecordingNotifier;
    use crate::provider::fake::FakeProvider;
    use std::sync::atomic::Ordering;

    struct Harness {
        clipboard: Arc<FakeClipboard>,
        input: Arc<FakeInput>,
        provider: Arc<FakeProvider>,
        notifier: Arc<RecordingNotifier>,
        shutdown: CancellationToken,
        processor: Arc<TextProcessor>,
    }

    fn settings() -> ProcessorSettings {
        ProcessorSettings::from_config(&Config::default())
    }

    fn harness(initial: &str, selection: Option<&str>, provider: FakeProvider) -> Harness {
        harness_with(settings(), initial, selection, provider)
    }

    fn harness_with(
        settings: ProcessorSettings,
        initial: &str,
        selection: Option<&str>,
        provider: FakeProvider,
    ) -> Harness {
        let clipboard = Arc::new(FakeClipboard::with_text(initial));
        let input = Arc::new(FakeInput::new(clipboard.clone()));
        input.select(selection);
        let provider = Arc::new(provider);
        let notifier = Arc::new(RecordingNotifier::default());
        let shutdown = CancellationToken::new();
        let processor = Arc::new(TextProcessor::new(
            ClipboardGuard::new(clipboard.clone()),
            input.clone(),
            provider.clone(),
            notifier.clone(),
            settings,
            shutdown.clone(),
        ));
        Harness {
            clipboard,
            input,
            provider,
            notifier,
            shutdown,
            processor,
        }
    }

    impl Harness {
        async fn run_once(&self) -> Notification {
            self.processor
                .trigger()
                .expect("processor should be idle")
                .await
                .unwrap()
        }

        fn failure_kind(&self) -> Option<FailureKind> {
            match self.notifier.events().as_slice() {
                [Notification::Failure { kind, .. }] => Some(*kind),
                _ => None,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replaces_selection_with_result() {
        let h = harness("unchanged", Some("foo"), FakeProvider::replying("Foo."));

        let outcome = h.run_once().await;

        assert_eq!(outcome, Notification::Success { chars: 4 });
        assert_eq!(h.clipboard.text(), "Foo.");
        assert_eq!(h.input.pastes.load(Ordering::SeqCst), 1);
        assert_eq!(h.input.pasted(), vec!["Foo.".to_string()]);
        assert_eq!(h.notifier.events(), vec![Notification::Success { chars: 4 }]);
        assert_eq!(h.provider.requests()[0].source_text(), "foo");
        assert_eq!(h.processor.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_selected_is_capture_timeout() {
        let h = harness("prev", None, FakeProvider::replying("unused"));

        h.run_once().await;

        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.failure_kind(), Some(FailureKind::CaptureTimeout));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.input.pastes.load(Ordering::SeqCst), 0);
        // Snapshot read plus three polls.
        assert_eq!(h.clipboard.reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_clipboard_without_clear_is_capture_timeout() {
        let mut s = settings();
        s.clear_before_copy = false;
        let h = harness_with(s, "prev", Some("prev"), FakeProvider::replying("unused"));

        h.run_once().await;

        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.failure_kind(), Some(FailureKind::CaptureTimeout));
        // Only the restore wrote.
        assert_eq!(h.clipboard.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_lets_identical_selection_through() {
        let h = harness("same", Some("same"), FakeProvider::replying("Same."));

        let outcome = h.run_once().await;

        assert!(!outcome.is_failure());
        assert_eq!(h.clipboard.text(), "Same.");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_is_network_timeout() {
        let provider = FakeProvider::replying("late").with_delay(Duration::from_secs(120));
        let h = harness("prev", Some("bar"), provider);
        let start = Instant::now();

        h.run_once().await;

        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.failure_kind(), Some(FailureKind::NetworkTimeout));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_candidates_is_malformed_and_not_retried() {
        let provider =
            FakeProvider::failing(TransformError::MalformedResponse("no candidates".into()));
        let h = harness("prev", Some("bar"), provider);

        h.run_once().await;

        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.failure_kind(), Some(FailureKind::MalformedResponse));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_while_busy_is_ignored() {
        let provider = FakeProvider::replying("Bar.").with_delay(Duration::from_secs(5));
        let h = harness("prev", Some("bar"), provider);

        let first = h.processor.trigger().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.processor.phase(), Phase::AwaitingTransform);

        let writes = h.clipboard.writes.load(Ordering::SeqCst);
        let reads = h.clipboard.reads.load(Ordering::SeqCst);
        assert!(h.processor.trigger().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.processor.trigger().is_none());

        assert_eq!(h.processor.phase(), Phase::AwaitingTransform);
        assert_eq!(h.clipboard.writes.load(Ordering::SeqCst), writes);
        assert_eq!(h.clipboard.reads.load(Ordering::SeqCst), reads);
        assert_eq!(h.input.copies.load(Ordering::SeqCst), 1);

        assert_eq!(first.await.unwrap(), Notification::Success { chars: 4 });
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_selection_skips_provider() {
        let mut s = settings();
        s.max_text_length = 100;
        let long = "x".repeat(150);
        let h = harness_with(s, "prev", Some(long.as_str()), FakeProvider::replying("unused"));

        h.run_once().await;

        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.failure_kind(), Some(FailureKind::TextTooLong));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_retry_up_to_limit() {
        let provider = FakeProvider::failing(TransformError::Server {
            status: 503,
            message: "overloaded".into(),
        });
        let h = harness("prev", Some("bar"), provider);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::ProviderError));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.clipboard.text(), "prev");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_then_success() {
        let provider = FakeProvider::scripted(vec![
            Err(TransformError::Transport("connection reset".into())),
            Ok("Bar.".into()),
        ]);
        let h = harness("prev", Some("bar"), provider);

        assert_eq!(h.run_once().await, Notification::Success { chars: 4 });
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.clipboard.text(), "Bar.");
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_is_terminal() {
        let provider = FakeProvider::failing(TransformError::Rejected {
            status: 401,
            message: "bad key".into(),
        });
        let h = harness("prev", Some("bar"), provider);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::ProviderError));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_copy_restores_clipboard() {
        let h = harness("prev", Some("bar"), FakeProvider::replying("unused"));
        h.input.deny_copy.store(true, Ordering::SeqCst);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::InputSimulationFailed));
        assert_eq!(h.clipboard.text(), "prev");
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_clipboard_fails_before_snapshot() {
        let h = harness("prev", Some("bar"), FakeProvider::replying("unused"));
        h.clipboard.deny_reads.store(true, Ordering::SeqCst);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::ClipboardUnavailable));
        assert_eq!(h.clipboard.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.input.copies.load(Ordering::SeqCst), 0);
        assert_eq!(h.processor.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_restore_still_reports_and_goes_idle() {
        let h = harness("prev", Some("bar"), FakeProvider::replying("unused"));
        h.clipboard.deny_writes.store(true, Ordering::SeqCst);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::ClipboardUnavailable));
        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.processor.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn binary_clipboard_survives_failure() {
        let png = ClipboardContent::Binary {
            format: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let h = harness("", None, FakeProvider::replying("unused"));
        h.clipboard.set(png.clone());

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::CaptureTimeout));
        assert_eq!(h.clipboard.get(), png);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_restores() {
        let provider = FakeProvider::replying("late").with_delay(Duration::from_secs(20));
        let h = harness("prev", Some("bar"), provider);

        let run = h.processor.trigger().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.shutdown.cancel();

        let outcome = run.await.unwrap();
        assert!(matches!(
            outcome,
            Notification::Failure {
                kind: FailureKind::Cancelled,
                ..
            }
        ));
        assert_eq!(h.clipboard.text(), "prev");
        assert_eq!(h.input.pastes.load(Ordering::SeqCst), 0);
    }

    struct PanickingProvider;

    #[async_trait::async_trait]
    impl TransformProvider for PanickingProvider {
        async fn transform(
            &self,
            _request: &TransformRequest,
            _timeout: Duration,
        ) -> Result<crate::provider::TransformResult, TransformError> {
            panic!("provider blew up");
        }

        fn id(&self) -> &'static str {
            "panicking"
        }
    }

    /// A selection owner that never answers.
    struct StuckClipboard;

    #[async_trait::async_trait]
    impl crate::clipboard::ClipboardProvider for StuckClipboard {
        async fn read(&self) -> Result<ClipboardContent, ClipboardError> {
            std::future::pending().await
        }

        async fn write(&self, _content: &ClipboardContent) -> Result<(), ClipboardError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_provider_restores_and_goes_idle() {
        let clipboard = Arc::new(FakeClipboard::with_text("prev"));
        let input = Arc::new(FakeInput::new(clipboard.clone()));
        input.select(Some("bar"));
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = Arc::new(TextProcessor::new(
            ClipboardGuard::new(clipboard.clone()),
            input.clone(),
            Arc::new(PanickingProvider),
            notifier.clone(),
            settings(),
            CancellationToken::new(),
        ));

        let outcome = processor.trigger().unwrap().await.unwrap();

        assert!(matches!(
            outcome,
            Notification::Failure {
                kind: FailureKind::Cancelled,
                ref message,
            } if message.contains("provider blew up")
        ));
        assert_eq!(clipboard.text(), "prev");
        assert_eq!(processor.phase(), Phase::Idle);
        assert_eq!(notifier.events().len(), 1);
        assert!(processor.trigger().is_some());
    }

    fn stuck_processor(s: ProcessorSettings, shutdown: CancellationToken) -> Arc<TextProcessor> {
        let input = Arc::new(FakeInput::new(Arc::new(FakeClipboard::default())));
        Arc::new(TextProcessor::new(
            ClipboardGuard::new(Arc::new(StuckClipboard)),
            input,
            Arc::new(FakeProvider::replying("unused")),
            Arc::new(RecordingNotifier::default()),
            s,
            shutdown,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_stuck_snapshot() {
        let shutdown = CancellationToken::new();
        let processor = stuck_processor(settings(), shutdown.clone());

        let run = processor.trigger().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(processor.phase(), Phase::CapturingSelection);
        shutdown.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("run should finish after shutdown")
            .unwrap();
        assert!(matches!(
            outcome,
            Notification::Failure {
                kind: FailureKind::Cancelled,
                ..
            }
        ));
        assert_eq!(processor.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn run_timeout_covers_stuck_snapshot() {
        let mut s = settings();
        s.run_timeout = Duration::from_secs(2);
        let processor = stuck_processor(s, CancellationToken::new());
        let start = Instant::now();

        let outcome = processor.trigger().unwrap().await.unwrap();

        assert!(matches!(
            outcome,
            Notification::Failure {
                kind: FailureKind::Cancelled,
                ..
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(processor.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn classification_ignores_attempt_number() {
        let provider = FakeProvider::scripted(vec![
            Err(TransformError::Server {
                status: 503,
                message: "overloaded".into(),
            }),
            Err(TransformError::MalformedResponse("no candidates".into())),
        ]);
        let h = harness("prev", Some("bar"), provider);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::MalformedResponse));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.clipboard.text(), "prev");
    }

    #[tokio::test(start_paused = true)]
    async fn hard_run_timeout_is_cancelled() {
        let mut s = settings();
        s.run_timeout = Duration::from_secs(2);
        let provider = FakeProvider::replying("late").with_delay(Duration::from_secs(20));
        let h = harness_with(s, "prev", Some("bar"), provider);

        h.run_once().await;

        assert_eq!(h.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(h.clipboard.text(), "prev");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_again_after_failure() {
        let h = harness("prev", None, FakeProvider::replying("Bar."));
        h.run_once().await;
        assert_eq!(h.processor.phase(), Phase::Idle);

        h.input.select(Some("bar"));
        assert_eq!(h.run_once().await, Notification::Success { chars: 4 });
        assert_eq!(h.clipboard.text(), "Bar.");
    }

    #[test]
    fn failure_kinds() {
        let timeout = PipelineError::Transform(TransformError::NetworkTimeout(
            Duration::from_secs(30),
        ));
        assert_eq!(timeout.kind(), FailureKind::NetworkTimeout);
        let transport = PipelineError::Transform(TransformError::Transport("reset".into()));
        assert_eq!(transport.kind(), FailureKind::ProviderError);
        let malformed = PipelineError::Transform(TransformError::MalformedResponse("x".into()));
        assert_eq!(malformed.kind(), FailureKind::MalformedResponse);
        assert_eq!(
            PipelineError::TextTooLong { len: 7500, max: 5000 }.to_string(),
            "selection is 7500 characters, the limit is 5000"
        );
    }
}
