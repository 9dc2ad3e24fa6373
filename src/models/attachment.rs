use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;

/// Staging handle shared between the UI thread and the upload task.
pub type SharedStaging = Arc<Mutex<AttachmentStaging>>;

/// Inline `data:` URI for image bytes handed over by the platform picker.
pub fn image_data_uri(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

pub fn shared_staging() -> SharedStaging {
    Arc::new(Mutex::new(AttachmentStaging::default()))
}

/// File metadata as handed over by the platform document picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAsset {
    pub name: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    /// Local content URI the picker produced.
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Uploaded { stored_path: String },
    Error { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFile {
    pub asset: FileAsset,
    pub status: UploadStatus,
}

/// At most one pending attachment, independent of message history.
///
/// Staging an image drops a staged file and vice versa; the two are never
/// set at the same time. A file in `Error` stays visible so the user can
/// retry or dismiss it, and it blocks sending until they do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AttachmentStaging {
    #[default]
    Empty,
    Image {
        uri: String,
    },
    File(StagedFile),
}

impl AttachmentStaging {
    pub fn stage_image(&mut self, uri: impl Into<String>) {
        *self = AttachmentStaging::Image { uri: uri.into() };
    }

    /// Stage a file; its upload starts in `Uploading`.
    pub fn stage_file(&mut self, asset: FileAsset) {
        *self = AttachmentStaging::File(StagedFile {
            asset,
            status: UploadStatus::Uploading,
        });
    }

    /// Record a finished upload. Ignored if the user replaced or cleared
    /// the staged file while the upload was in flight.
    pub fn mark_uploaded(&mut self, stored_path: impl Into<String>) {
        if let AttachmentStaging::File(staged) = self
            && staged.status == UploadStatus::Uploading
        {
            staged.status = UploadStatus::Uploaded {
                stored_path: stored_path.into(),
            };
        }
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        if let AttachmentStaging::File(staged) = self
            && staged.status == UploadStatus::Uploading
        {
            staged.status = UploadStatus::Error {
                message: message.into(),
            };
        }
    }

    /// Idempotent.
    pub fn clear(&mut self) {
        *self = AttachmentStaging::Empty;
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AttachmentStaging::Empty)
    }

    pub fn staged_image(&self) -> Option<&str> {
        match self {
            AttachmentStaging::Image { uri } => Some(uri),
            _ => None,
        }
    }

    pub fn staged_file(&self) -> Option<&StagedFile> {
        match self {
            AttachmentStaging::File(staged) => Some(staged),
            _ => None,
        }
    }

    pub fn upload_in_flight(&self) -> bool {
        matches!(
            self,
            AttachmentStaging::File(StagedFile {
                status: UploadStatus::Uploading,
                ..
            })
        )
    }

    pub fn upload_failed(&self) -> bool {
        matches!(
            self,
            AttachmentStaging::File(StagedFile {
                status: UploadStatus::Error { .. },
                ..
            })
        )
    }

    /// The staged file once it is actually attachable.
    pub fn usable_file(&self) -> Option<(&FileAsset, &str)> {
        match self {
            AttachmentStaging::File(StagedFile {
                asset,
                status: UploadStatus::Uploaded { stored_path },
            }) => Some((asset, stored_path)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> FileAsset {
        FileAsset {
            name: name.to_string(),
            mime_type: Some("application/pdf".to_string()),
            size: Some(1024),
            uri: format!("file:///tmp/{name}"),
        }
    }

    #[test]
    fn test_image_and_file_are_mutually_exclusive() {
        let mut staging = AttachmentStaging::default();

        staging.stage_file(asset("notes.pdf"));
        staging.stage_image("data:image/png;base64,AAAA");
        assert!(staging.staged_file().is_none());
        assert!(staging.staged_image().is_some());

        staging.stage_file(asset("notes.pdf"));
        assert!(staging.staged_image().is_none());
        assert!(staging.staged_file().is_some());
    }

    #[test]
    fn test_upload_status_progression() {
        let mut staging = AttachmentStaging::default();
        staging.stage_file(asset("notes.pdf"));
        assert!(staging.upload_in_flight());
        assert!(staging.usable_file().is_none());

        staging.mark_uploaded("u1/notes.pdf");
        assert!(!staging.upload_in_flight());
        let (file, path) = staging.usable_file().unwrap();
        assert_eq!(file.name, "notes.pdf");
        assert_eq!(path, "u1/notes.pdf");
    }

    #[test]
    fn test_failed_upload_blocks_and_stays_visible() {
        let mut staging = AttachmentStaging::default();
        staging.stage_file(asset("notes.pdf"));
        staging.mark_error("network unreachable");
        assert!(staging.upload_failed());
        assert!(staging.staged_file().is_some());
        assert!(staging.usable_file().is_none());
    }

    #[test]
    fn test_mark_uploaded_ignored_after_clear() {
        let mut staging = AttachmentStaging::default();
        staging.stage_file(asset("notes.pdf"));
        staging.clear();
        staging.mark_uploaded("u1/notes.pdf");
        assert!(staging.is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut staging = AttachmentStaging::default();
        staging.clear();
        staging.clear();
        assert!(staging.is_empty());
    }

    #[test]
    fn test_image_data_uri_shape() {
        let uri = image_data_uri("image/png", &[0x89, 0x50]);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(uri.len() > "data:image/png;base64,".len());
    }
}
