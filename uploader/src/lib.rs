mod error;
mod http;
mod multipart;
mod server;

pub use error::{Result, UploadErr};
pub use server::{DEFAULT_ROUTE, UploadReply, UploadServer, UploadedFile};
