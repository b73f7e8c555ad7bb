mod error;
mod payload;
mod uploader;

pub use error::SendError;
pub use payload::LocationPayload;
pub use uploader::{LocationUploader, SendSuccess, Uploader};
