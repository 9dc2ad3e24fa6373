use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::history::SharedHistory;
use super::message::{MessageAttachment, NO_RESPONSE_FALLBACK};

/// Interval between copies of the accumulation buffer into the visible
/// placeholder text. Decouples render frequency from network callback
/// frequency.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Placeholder text while a single-shot model is generating.
pub const PROCESSING_TEXT: &str = "Processing...";

/// Shown when a single-shot response carried no text.
pub const RESPONSE_RECEIVED_FALLBACK: &str = "Response received.";

/// Flush task handle, aborted on drop. Held by the reconciler so the timer
/// cannot outlive the placeholder on any exit path.
struct FlushGuard(JoinHandle<()>);

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Bridges an in-flight assistant reply into incremental history updates.
///
/// Owns the accumulation buffer outright; producers feed it only through
/// `append`. Exactly one reconciler is active per send, and finalization
/// consumes it, so a placeholder can be completed at most once. The flush
/// task and finalization serialize on the history lock: the final write
/// either overwrites a concurrent flush or flips the `finalized` flag
/// before the flush gets the lock, so a stale tick can never clobber
/// finalized text.
pub struct StreamReconciler {
    history: SharedHistory,
    placeholder_id: String,
    buffer: Arc<Mutex<String>>,
    finalized: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
    flush: Option<FlushGuard>,
}

impl StreamReconciler {
    /// Reconciler for a streaming-capable model: a periodic flush mirrors
    /// the buffer into the placeholder until finalization.
    pub fn begin_streaming(
        history: SharedHistory,
        placeholder_id: String,
        sending: Arc<AtomicBool>,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));
        let finalized = Arc::new(AtomicBool::new(false));

        let flush = {
            let history = history.clone();
            let buffer = buffer.clone();
            let finalized = finalized.clone();
            let id = placeholder_id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // First tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let mut entries = history.lock();
                    if finalized.load(Ordering::SeqCst) {
                        return;
                    }
                    let text = buffer.lock().clone();
                    entries.set_text(&id, &text);
                }
            })
        };

        Self {
            history,
            placeholder_id,
            buffer,
            finalized,
            sending,
            flush: Some(FlushGuard(flush)),
        }
    }

    /// Reconciler for a single-shot JSON model: no periodic flush, the
    /// placeholder shows a processing state until one atomic replacement.
    pub fn begin_single_shot(
        history: SharedHistory,
        placeholder_id: String,
        sending: Arc<AtomicBool>,
    ) -> Self {
        history.lock().set_text(&placeholder_id, PROCESSING_TEXT);
        Self {
            history,
            placeholder_id,
            buffer: Arc::new(Mutex::new(String::new())),
            finalized: Arc::new(AtomicBool::new(false)),
            sending,
            flush: None,
        }
    }

    pub fn placeholder_id(&self) -> &str {
        &self.placeholder_id
    }

    pub fn append(&self, delta: &str) {
        self.buffer.lock().push_str(delta);
    }

    pub fn accumulated(&self) -> String {
        self.buffer.lock().clone()
    }

    /// Finish a streamed reply: stop the flush, write the accumulated text
    /// (or the no-response fallback), attach trailing metadata, clear the
    /// typing and sending flags. Returns the text written.
    pub fn finalize(self, attachment: Option<MessageAttachment>) -> String {
        let accumulated = self.buffer.lock().clone();
        let text = if accumulated.is_empty() {
            NO_RESPONSE_FALLBACK.to_string()
        } else {
            accumulated
        };
        self.complete(text.clone(), attachment);
        text
    }

    /// Finish a single-shot reply with its payload in one update.
    pub fn finalize_payload(
        self,
        text: Option<String>,
        attachment: Option<MessageAttachment>,
    ) -> String {
        let text = text
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| RESPONSE_RECEIVED_FALLBACK.to_string());
        self.complete(text.clone(), attachment);
        text
    }

    /// Error termination: the placeholder becomes a normal message showing
    /// the error so the failure stays visible in history.
    pub fn finalize_error(self, error: &str) {
        debug!(error = %error, "Error-finalizing in-flight reply");
        self.complete(format!("Error: {error}"), None);
    }

    fn complete(mut self, text: String, attachment: Option<MessageAttachment>) {
        // Timer handle cleared before the final state write.
        drop(self.flush.take());

        let mut entries = self.history.lock();
        self.finalized.store(true, Ordering::SeqCst);
        entries.update(&self.placeholder_id, |message| {
            message.text = text;
            message.is_typing = false;
            if attachment.is_some() {
                message.attachment = attachment;
            }
        });
        entries.clear_sending_flags();
        drop(entries);

        self.sending.store(false, Ordering::SeqCst);
    }
}
