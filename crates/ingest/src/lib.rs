pub mod fallback;
pub mod hash;
pub mod parser;
pub mod patterns;
pub mod pipeline;
pub mod sync;
pub mod upload;

pub use fallback::{
    FallbackError, FallbackExtractor, GeminiExtractor, MockFallback, NoFallback,
    DEFAULT_GEMINI_MODEL,
};
pub use hash::{sha256_bytes, to_hex, upload_key};
pub use parser::Parser;
pub use patterns::{patterns_for, ProviderPatterns};
pub use pipeline::spawn_intake_worker;
pub use sync::{RawMessage, SyncController, SyncError};
pub use upload::{HttpUploader, MockUploader, UploadError, Uploader};
