//! Just enough HTTP/1.1 to accept one upload per connection.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, UploadErr};

const MAX_HEADERS: usize = 64;
const MAX_LINE: usize = 8 * 1024;

/// A fully read request.
#[derive(Debug)]
pub(crate) struct Request {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Looks up a header, names are matched case insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(rx: &mut R, line: &mut String) -> Result<usize> {
    line.clear();
    let n = (&mut *rx).take(MAX_LINE as u64).read_line(line).await?;

    if n == MAX_LINE && !line.ends_with('\n') {
        return Err(UploadErr::BadRequest("header line too long".into()));
    }

    Ok(n)
}

/// Reads a request head and its `Content-Length` delimited body.
///
/// # Returns
/// `Ok(None)` if the peer closed the connection before sending anything.
pub(crate) async fn read_request<R>(rx: &mut R, body_limit: usize) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if read_line(rx, &mut line).await? == 0 {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(UploadErr::BadRequest(format!(
            "malformed request line `{}`",
            line.trim_end()
        )));
    };

    let method = method.to_string();
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = Vec::new();
    loop {
        if read_line(rx, &mut line).await? == 0 {
            return Err(UploadErr::BadRequest("connection closed inside the head".into()));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if headers.len() == MAX_HEADERS {
            return Err(UploadErr::BadRequest("too many headers".into()));
        }

        let (key, value) = trimmed
            .split_once(':')
            .ok_or_else(|| UploadErr::BadRequest(format!("malformed header `{trimmed}`")))?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    let mut req = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };

    if req
        .header("transfer-encoding")
        .is_some_and(|te| !te.eq_ignore_ascii_case("identity"))
    {
        return Err(UploadErr::BadRequest("chunked bodies are not supported".into()));
    }

    let len = match req.header("content-length") {
        Some(len) => len
            .parse::<usize>()
            .map_err(|_| UploadErr::BadRequest(format!("invalid content length `{len}`")))?,
        None => 0,
    };

    if len > body_limit {
        return Err(UploadErr::TooLarge {
            len,
            limit: body_limit,
        });
    }

    // Grows with the bytes that actually arrive, not with the declared length.
    (&mut *rx).take(len as u64).read_to_end(&mut req.body).await?;

    if req.body.len() < len {
        return Err(UploadErr::BadRequest(format!(
            "body ended after {} of {len} bytes",
            req.body.len()
        )));
    }

    Ok(Some(req))
}

/// Writes a complete response and closes the exchange.
pub(crate) async fn write_response<W>(tx: &mut W, status: &str, body: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    tx.write_all(head.as_bytes()).await?;
    tx.write_all(body.as_bytes()).await?;
    tx.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use super::*;

    #[tokio::test]
    async fn reads_head_and_body() {
        let raw = b"POST /d3rl/network?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello";
        let mut rx = BufReader::new(&raw[..]);

        let req = read_request(&mut rx, 1024).await.unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/d3rl/network");
        assert_eq!(req.header("CONTENT-length"), Some("5"));
        assert_eq!(req.body, b"hello");
    }

    #[tokio::test]
    async fn empty_connection_is_not_a_request() {
        let mut rx = BufReader::new(&b""[..]);
        assert!(read_request(&mut rx, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn body_over_the_limit_is_refused() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n";
        let mut rx = BufReader::new(&raw[..]);
        let err = read_request(&mut rx, 1024).await.unwrap_err();
        assert!(matches!(err, UploadErr::TooLarge { len: 4096, .. }));
    }

    #[tokio::test]
    async fn short_body_does_not_reserve_the_declared_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 1000000\r\n\r\nhello";
        let mut rx = BufReader::new(&raw[..]);
        let err = read_request(&mut rx, 1 << 30).await.unwrap_err();
        assert!(matches!(err, UploadErr::BadRequest(_)));
    }

    #[tokio::test]
    async fn body_buffer_grows_with_what_arrives() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut rx = BufReader::new(server);

        let reader =
            tokio::spawn(async move { read_request(&mut rx, 1 << 30).await.map(|r| r.map(|r| r.body)) });

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 536870912\r\n\r\nabc")
            .await
            .unwrap();
        drop(client);

        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(err, UploadErr::BadRequest(_)), "{err}");
    }

    #[tokio::test]
    async fn malformed_request_line_is_a_bad_request() {
        let mut rx = BufReader::new(&b"garbage\r\n\r\n"[..]);
        let err = read_request(&mut rx, 1024).await.unwrap_err();
        assert!(matches!(err, UploadErr::BadRequest(_)));
    }
}
