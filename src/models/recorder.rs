use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::notifier::Notifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingStatus {
    Idle,
    /// Permission request and recorder init in progress.
    Preparing,
    Recording,
    /// Terminal transient; returns to `Idle` after handoff.
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishedRecording {
    pub uri: String,
    pub duration_ms: u64,
}

/// Platform recorder seam. The handle behind it is a singleton; the state
/// machine below is its sole owner.
#[async_trait]
pub trait RecorderBackend: Send + Sync {
    async fn request_permission(&self) -> Result<bool>;
    /// Prepare and start capturing.
    async fn arm(&self) -> Result<()>;
    /// Stop capturing and finalize the audio file.
    async fn finish(&self) -> Result<FinishedRecording>;
    /// Idempotent; safe to call with nothing armed.
    async fn release(&self);
}

#[derive(Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Finished(FinishedRecording),
    /// Debounced or failed; the machine is back at `Idle` (or still
    /// `Preparing` when the press itself was ignored).
    Ignored,
}

/// Microphone capture lifecycle: idle, preparing, recording, stopped.
///
/// A single control toggles start/stop. Pressing while `Preparing` is a
/// no-op, debounced by state rather than a separate lock. Every path back
/// to `Idle` releases the backend exactly once, so a failure can never
/// leave the microphone held.
pub struct VoiceRecorder {
    backend: Arc<dyn RecorderBackend>,
    notifier: Notifier,
    status: RecordingStatus,
}

impl VoiceRecorder {
    pub fn new(backend: Arc<dyn RecorderBackend>, notifier: Notifier) -> Self {
        Self {
            backend,
            notifier,
            status: RecordingStatus::Idle,
        }
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub async fn toggle(&mut self) -> ToggleOutcome {
        match self.status {
            RecordingStatus::Idle => self.start().await,
            RecordingStatus::Recording => self.stop().await,
            RecordingStatus::Preparing | RecordingStatus::Stopped => {
                debug!(status = ?self.status, "Toggle ignored while recorder is settling");
                ToggleOutcome::Ignored
            }
        }
    }

    async fn start(&mut self) -> ToggleOutcome {
        self.status = RecordingStatus::Preparing;

        let permitted = match self.backend.request_permission().await {
            Ok(permitted) => permitted,
            Err(e) => {
                warn!(error = ?e, "Microphone permission request failed");
                return self.fail_to_idle("Permission error", &e.to_string()).await;
            }
        };
        if !permitted {
            return self
                .fail_to_idle(
                    "Permission required",
                    "Microphone access is needed to record audio.",
                )
                .await;
        }

        match self.backend.arm().await {
            Ok(()) => {
                self.status = RecordingStatus::Recording;
                ToggleOutcome::Started
            }
            Err(e) => {
                warn!(error = ?e, "Failed to start recording");
                self.fail_to_idle("Recording failed", &format!("Could not start recording: {e}"))
                    .await
            }
        }
    }

    async fn stop(&mut self) -> ToggleOutcome {
        self.status = RecordingStatus::Stopped;

        match self.backend.finish().await {
            Ok(recording) => {
                self.backend.release().await;
                self.status = RecordingStatus::Idle;
                ToggleOutcome::Finished(recording)
            }
            Err(e) => {
                warn!(error = ?e, "Failed to stop recording");
                // No partial recording is retained.
                self.fail_to_idle("Recording failed", &format!("Could not save the recording: {e}"))
                    .await
            }
        }
    }

    async fn fail_to_idle(&mut self, title: &str, message: &str) -> ToggleOutcome {
        self.backend.release().await;
        self.status = RecordingStatus::Idle;
        self.notifier.alert(title, message);
        ToggleOutcome::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notifier::UiNotice;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedBackend {
        deny_permission: bool,
        fail_permission: bool,
        fail_arm: bool,
        fail_finish: bool,
        armed: AtomicBool,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl RecorderBackend for ScriptedBackend {
        async fn request_permission(&self) -> Result<bool> {
            if self.fail_permission {
                return Err(anyhow!("permission service unavailable"));
            }
            Ok(!self.deny_permission)
        }

        async fn arm(&self) -> Result<()> {
            if self.fail_arm {
                return Err(anyhow!("recorder init failed"));
            }
            self.armed.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn finish(&self) -> Result<FinishedRecording> {
            if self.fail_finish {
                return Err(anyhow!("file finalize failed"));
            }
            Ok(FinishedRecording {
                uri: "file:///tmp/recording.m4a".to_string(),
                duration_ms: 2_300,
            })
        }

        async fn release(&self) {
            self.armed.store(false, Ordering::SeqCst);
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder(backend: Arc<ScriptedBackend>) -> (VoiceRecorder, tokio::sync::mpsc::UnboundedReceiver<UiNotice>) {
        let (notifier, rx) = Notifier::channel();
        (VoiceRecorder::new(backend, notifier), rx)
    }

    #[tokio::test]
    async fn test_full_cycle_releases_exactly_once() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut recorder, _rx) = recorder(backend.clone());

        assert_eq!(recorder.toggle().await, ToggleOutcome::Started);
        assert_eq!(recorder.status(), RecordingStatus::Recording);

        match recorder.toggle().await {
            ToggleOutcome::Finished(rec) => assert_eq!(rec.duration_ms, 2_300),
            other => panic!("expected finished recording, got {other:?}"),
        }
        assert_eq!(recorder.status(), RecordingStatus::Idle);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        assert!(!backend.armed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_permission_denied_returns_to_idle_with_alert() {
        let backend = Arc::new(ScriptedBackend {
            deny_permission: true,
            ..Default::default()
        });
        let (mut recorder, mut rx) = recorder(backend.clone());

        assert_eq!(recorder.toggle().await, ToggleOutcome::Ignored);
        assert_eq!(recorder.status(), RecordingStatus::Idle);
        assert!(!backend.armed.load(Ordering::SeqCst));
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.try_recv(), Ok(UiNotice::Alert { .. })));
    }

    #[tokio::test]
    async fn test_arm_failure_releases_and_idles() {
        let backend = Arc::new(ScriptedBackend {
            fail_arm: true,
            ..Default::default()
        });
        let (mut recorder, mut rx) = recorder(backend.clone());

        assert_eq!(recorder.toggle().await, ToggleOutcome::Ignored);
        assert_eq!(recorder.status(), RecordingStatus::Idle);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.try_recv(), Ok(UiNotice::Alert { .. })));
    }

    #[tokio::test]
    async fn test_finish_failure_releases_and_retains_nothing() {
        let backend = Arc::new(ScriptedBackend {
            fail_finish: true,
            ..Default::default()
        });
        let (mut recorder, mut rx) = recorder(backend.clone());

        assert_eq!(recorder.toggle().await, ToggleOutcome::Started);
        assert_eq!(recorder.toggle().await, ToggleOutcome::Ignored);
        assert_eq!(recorder.status(), RecordingStatus::Idle);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.try_recv(), Ok(UiNotice::Alert { .. })));
    }

    #[tokio::test]
    async fn test_toggle_is_debounced_while_preparing() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut recorder, _rx) = recorder(backend.clone());
        recorder.status = RecordingStatus::Preparing;

        assert_eq!(recorder.toggle().await, ToggleOutcome::Ignored);
        assert_eq!(recorder.status(), RecordingStatus::Preparing);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 0);
    }
}
