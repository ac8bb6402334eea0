//! `multipart/form-data` bodies, as sent by `requests.post(files=...)`.

use crate::{Result, UploadErr};

/// One part of a multipart body.
#[derive(Debug)]
pub(crate) struct Part<'a> {
    pub name: Option<&'a str>,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

/// Extracts the boundary out of a `Content-Type` header value.
pub(crate) fn boundary(content_type: &str) -> Result<&str> {
    let mut params = content_type.split(';').map(str::trim);

    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(UploadErr::BadRequest(format!(
            "expected multipart/form-data, got `{mime}`"
        )));
    }

    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|b| !b.is_empty())
        .ok_or_else(|| UploadErr::BadRequest("multipart body without a boundary".into()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reads `key="value"` out of a `Content-Disposition` header.
fn disposition_param<'a>(disposition: &'a str, key: &str) -> Option<&'a str> {
    disposition
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().trim_matches('"'))
}

/// Splits a multipart `body` in its parts.
pub(crate) fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let malformed = |what: &str| UploadErr::BadRequest(format!("malformed multipart body: {what}"));

    let start = find(body, delimiter).ok_or_else(|| malformed("missing first boundary"))?;
    let mut rest = &body[start + delimiter.len()..];
    let mut parts = Vec::new();

    loop {
        if rest.starts_with(b"--") {
            return Ok(parts);
        }

        rest = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| malformed("boundary not followed by a line break"))?;

        let head_end = find(rest, b"\r\n\r\n").ok_or_else(|| malformed("unterminated part head"))?;
        let head = std::str::from_utf8(&rest[..head_end])
            .map_err(|_| malformed("part head is not utf-8"))?;
        rest = &rest[head_end + 4..];

        let mut next = Vec::with_capacity(delimiter.len() + 2);
        next.extend_from_slice(b"\r\n");
        next.extend_from_slice(delimiter);

        let data_end = find(rest, &next).ok_or_else(|| malformed("unterminated part"))?;
        let data = &rest[..data_end];
        rest = &rest[data_end + next.len()..];

        let disposition = head
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-disposition"))
            .map(|(_, value)| value.trim());

        parts.push(Part {
            name: disposition.and_then(|d| disposition_param(d, "name")),
            file_name: disposition.and_then(|d| disposition_param(d, "filename")),
            data,
        });
    }
}
