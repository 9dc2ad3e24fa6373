use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Ephemeral feedback for the shell. Notices terminate nothing and leave no
/// trace in message history; failures that end a send are written into
/// history by the reconciler instead.
#[derive(Clone, Debug)]
pub enum UiNotice {
    Toast {
        level: NoticeLevel,
        title: String,
        detail: Option<String>,
    },
    Alert {
        title: String,
        message: String,
    },
}

/// Fan-out channel for toasts and alerts.
///
/// Cloned into every store and task that needs to surface a notice; the
/// shell drains the receiver. Sends after the shell dropped the receiver
/// are logged and discarded.
#[derive(Clone)]
pub struct Notifier {
    tx: UnboundedSender<UiNotice>,
}

impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<UiNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn toast(&self, level: NoticeLevel, title: impl Into<String>, detail: Option<String>) {
        self.emit(UiNotice::Toast {
            level,
            title: title.into(),
            detail,
        });
    }

    pub fn alert(&self, title: impl Into<String>, message: impl Into<String>) {
        self.emit(UiNotice::Alert {
            title: title.into(),
            message: message.into(),
        });
    }

    fn emit(&self, notice: UiNotice) {
        if self.tx.send(notice).is_err() {
            debug!("Notice dropped, no UI receiver attached");
        }
    }
}
