use std::{error::Error, fmt, io};

/// The uploader module's result type.
pub type Result<T> = std::result::Result<T, UploadErr>;

/// Failures while receiving a checkpoint upload.
#[derive(Debug)]
pub enum UploadErr {
    Io(io::Error),
    /// The request could not be understood, answered with a 400.
    BadRequest(String),
    /// The request carried no file under the expected field.
    NoFiles,
    /// The body exceeds the configured limit, answered with a 413.
    TooLarge { len: usize, limit: usize },
}

impl UploadErr {
    /// The HTTP status line this error is answered with.
    pub(crate) fn status(&self) -> &'static str {
        match self {
            UploadErr::Io(_) => "500 Internal Server Error",
            UploadErr::BadRequest(_) | UploadErr::NoFiles => "400 Bad Request",
            UploadErr::TooLarge { .. } => "413 Payload Too Large",
        }
    }
}

impl fmt::Display for UploadErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadErr::Io(e) => write!(f, "io error: {e}"),
            UploadErr::BadRequest(detail) => write!(f, "bad request: {detail}"),
            UploadErr::NoFiles => f.write_str("the upload carried no files"),
            UploadErr::TooLarge { len, limit } => {
                write!(f, "body of {len} bytes exceeds the limit of {limit} bytes")
            }
        }
    }
}

impl Error for UploadErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UploadErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for UploadErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<UploadErr> for io::Error {
    fn from(value: UploadErr) -> Self {
        match value {
            UploadErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
