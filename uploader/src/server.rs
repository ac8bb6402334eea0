use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use comms::index::{self, CheckpointIndex};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    net::TcpListener,
    task::JoinSet,
};

use crate::{Result, UploadErr, http, multipart};

/// The route learners post their checkpoints to.
pub const DEFAULT_ROUTE: &str = "/d3rl/network";

/// Multipart field under which the checkpoint files arrive.
const FILES_FIELD: &str = "files";

const DEFAULT_BODY_LIMIT: usize = 1 << 30;

/// A file received in an upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// The JSON body answered to a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReply {
    pub code: &'static str,
    pub file_num: usize,
}

/// Receives checkpoints published by the learner and writes them, together
/// with the index the checkpoint watcher reads, into its upload directory.
#[derive(Debug)]
pub struct UploadServer {
    upload_dir: PathBuf,
    route: String,
    body_limit: usize,
}

impl UploadServer {
    /// Creates a new `UploadServer`.
    ///
    /// # Arguments
    /// * `upload_dir` - Where the uploaded files and the index are written.
    /// * `route` - The path uploads are accepted at.
    pub fn new(upload_dir: impl Into<PathBuf>, route: impl Into<String>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            route: route.into(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Caps the accepted request body size.
    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Writes every file into the upload directory and publishes the index.
    ///
    /// The checkpoint id is taken from the first file's name, the index is
    /// only written once all the files are on disk.
    ///
    /// # Returns
    /// The reply to answer the uploader with.
    pub async fn store(&self, files: &[UploadedFile]) -> Result<UploadReply> {
        let first = files.first().ok_or(UploadErr::NoFiles)?;
        let id = index::checkpoint_id(sanitize(&first.name)?);

        if id.is_empty() || id == index::INDEX_FILE {
            return Err(UploadErr::BadRequest(format!(
                "can't derive a checkpoint id from `{}`",
                first.name
            )));
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;

        for file in files {
            let name = sanitize(&file.name)?;
            tokio::fs::write(self.upload_dir.join(name), &file.data).await?;
            debug!(file = name, bytes = file.data.len(); "stored checkpoint artifact");
        }

        CheckpointIndex::single(id).write(&self.upload_dir).await?;
        info!(id = id, files = files.len(); "published checkpoint");

        Ok(UploadReply {
            code: "ok",
            file_num: files.len(),
        })
    }

    /// Accepts connections until the listener fails, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!("accepting checkpoint uploads at {}{}", listener.local_addr()?, self.route);

        let server = Arc::new(self);
        let mut conns = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    let server = Arc::clone(&server);

                    conns.spawn(async move {
                        if let Err(e) = server.handle(stream).await {
                            warn!("upload connection from {addr} failed: {e}");
                        }
                    });
                }
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
            }
        }
    }

    /// Serves a single request on `stream`.
    pub async fn handle<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);

        let (status, body) = match self.respond(&mut stream).await {
            Ok(Some(reply)) => ("200 OK", reply),
            Ok(None) => return Ok(()),
            Err(UploadErr::Io(e)) => return Err(UploadErr::Io(e)),
            Err(e) => {
                warn!("rejected upload: {e}");
                (e.status(), error_body(&e))
            }
        };

        http::write_response(stream.get_mut(), status, &body).await?;
        Ok(())
    }

    async fn respond<S>(&self, stream: &mut BufReader<S>) -> Result<Option<String>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(req) = http::read_request(stream, self.body_limit).await? else {
            return Ok(None);
        };

        if req.path != self.route {
            return Err(UploadErr::BadRequest(format!("unknown route `{}`", req.path)));
        }

        if req.method != "POST" {
            return Err(UploadErr::BadRequest(format!(
                "method `{}` is not allowed, use POST",
                req.method
            )));
        }

        let content_type = req
            .header("content-type")
            .ok_or_else(|| UploadErr::BadRequest("missing content type".into()))?;
        let boundary = multipart::boundary(content_type)?;

        let files: Vec<_> = multipart::parse(&req.body, boundary)?
            .into_iter()
            .filter(|part| part.name == Some(FILES_FIELD))
            .filter_map(|part| Some(UploadedFile::new(part.file_name?, part.data)))
            .collect();

        let reply = self.store(&files).await?;

        // SAFETY: `UploadReply` only holds a string and a number.
        Ok(Some(serde_json::to_string(&reply).unwrap()))
    }
}

/// Keeps only the last path component so uploads can't escape the directory.
fn sanitize(name: &str) -> Result<&str> {
    match name.rsplit(['/', '\\']).next() {
        Some(base) if !base.is_empty() && base != "." && base != ".." => Ok(base),
        _ => Err(UploadErr::BadRequest(format!("invalid file name `{name}`"))),
    }
}

fn error_body(e: &UploadErr) -> String {
    serde_json::json!({ "code": "error", "detail": e.to_string() }).to_string()
}
