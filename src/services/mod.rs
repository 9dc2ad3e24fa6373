pub mod chat_namer;
pub mod completion;
pub mod retrieval;
pub mod storage;
pub mod transcription;

pub use chat_namer::derive_chat_name;
pub use completion::{
    CompletionApi, CompletionPayload, CompletionRequest, HttpCompletionClient, ModelMode,
    ResponseStream, StreamChunk, model_mode,
};
pub use retrieval::{HttpRetrievalClient, ProcessableFile, RetrievalApi};
pub use storage::{FileStorage, HttpFileStorage};
pub use transcription::{HttpTranscriptionClient, TranscriptionApi};
