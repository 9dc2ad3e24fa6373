//! Chat session orchestration core for the Rhyno mobile chat client.
//!
//! The crate owns everything between the input field and the backend:
//! message history, attachment staging, the voice-capture lifecycle, the
//! streaming reconciler and the send orchestrator. Rendering, navigation
//! and platform permission dialogs live in the embedding shell; remote
//! services and platform SDKs are reached through the trait seams in
//! [`services`], [`repositories`] and [`models::recorder`].

pub mod controllers;
pub mod logging;
pub mod models;
pub mod repositories;
pub mod services;
pub mod session;

pub use controllers::{Backends, ChatController, ChatDirectory, SendError};
pub use models::{
    AttachmentStaging, FileAsset, FinishedRecording, Message, MessageAttachment, MessageHistory,
    Notifier, RecordingStatus, Role, UiNotice, VoiceRecorder,
};
pub use session::ChatSession;
