pub mod attachment;
pub mod history;
pub mod message;
pub mod notifier;
pub mod reconciler;
pub mod recorder;

pub use attachment::{
    AttachmentStaging, FileAsset, SharedStaging, StagedFile, UploadStatus, image_data_uri,
};
pub use history::{MessageHistory, SharedHistory};
pub use message::{Message, MessageAttachment, Role};
pub use notifier::{NoticeLevel, Notifier, UiNotice};
pub use reconciler::StreamReconciler;
pub use recorder::{FinishedRecording, RecorderBackend, RecordingStatus, VoiceRecorder};
