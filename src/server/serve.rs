// Static file delivery: streams files from the storage root with Range support.

use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use super::response::ApiError;
use crate::config::STAGING_PREFIX;
use crate::storage::local::LocalStorage;

#[derive(Debug, PartialEq, Eq)]
enum ParsedRange {
    StartEnd {
        start: u64,
        end_inclusive: Option<u64>,
    },
    Suffix {
        len: u64,
    },
}

/// Parse a Range header value.
/// Supports:
/// - bytes=start-end
/// - bytes=start-
/// - bytes=-suffix_len
fn parse_range_header(value: &str) -> Option<ParsedRange> {
    let value = value.trim();
    let rest = value.strip_prefix("bytes=")?;
    let mut parts = rest.splitn(2, '-');
    let start_str = parts.next()?.trim();
    let end_str = parts.next()?.trim();

    if start_str.is_empty() {
        let len: u64 = end_str.parse().ok()?;
        if len == 0 {
            return None;
        }
        Some(ParsedRange::Suffix { len })
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end_inclusive = if end_str.is_empty() {
            None
        } else {
            Some(end_str.parse::<u64>().ok()?)
        };
        Some(ParsedRange::StartEnd {
            start,
            end_inclusive,
        })
    }
}

/// Turn a parsed range into an inclusive `(start, end)` within a file of `total` bytes.
fn satisfiable_range(range: ParsedRange, total: u64) -> Result<(u64, u64), ApiError> {
    match range {
        ParsedRange::StartEnd {
            start,
            end_inclusive,
        } => {
            let end = end_inclusive.unwrap_or(u64::MAX).min(total.saturating_sub(1));
            if start >= total || end < start {
                return Err(ApiError::RangeNotSatisfiable(total));
            }
            Ok((start, end))
        }
        ParsedRange::Suffix { len } => {
            if total == 0 {
                return Err(ApiError::RangeNotSatisfiable(total));
            }
            Ok((total.saturating_sub(len), total - 1))
        }
    }
}

fn io_error(err: std::io::Error) -> ApiError {
    if err.kind() == ErrorKind::NotFound {
        ApiError::NotFound
    } else {
        error!("storage read failed: {}", err);
        ApiError::Internal(err.to_string())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("invalid header value".into()))
}

/// Serve `relative` (a path under the storage root) as the response body.
///
/// Directories are rendered as a plain listing whose links point below `url_prefix`.
pub async fn serve_path(
    storage: &LocalStorage,
    relative: &str,
    url_prefix: &str,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let target = storage
        .resolve_path(relative)
        .map_err(|_| ApiError::NotFound)?;
    let metadata = fs::metadata(&target).await.map_err(io_error)?;
    if metadata.is_dir() {
        return render_listing(&target, relative, url_prefix).await;
    }

    let total = metadata.len();
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(modified) = metadata.modified() {
        headers.insert(
            header::LAST_MODIFIED,
            header_value(&httpdate::fmt_http_date(modified))?,
        );
    }

    let range = request_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header)
        .map(|range| satisfiable_range(range, total))
        .transpose()?;

    let mut file = File::open(&target).await.map_err(io_error)?;

    match range {
        Some((start, end)) => {
            let length = end - start + 1;
            debug!("serve {} range=[{}, {}] of {}", relative, start, end, total);
            file.seek(SeekFrom::Start(start)).await.map_err(io_error)?;
            headers.insert(
                header::CONTENT_RANGE,
                header_value(&format!("bytes {}-{}/{}", start, end, total))?,
            );
            headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
        }
        None => {
            debug!("serve {} ({} bytes)", relative, total);
            headers.insert(header::CONTENT_LENGTH, header_value(&total.to_string())?);
            let body = Body::from_stream(ReaderStream::new(file));
            Ok((StatusCode::OK, headers, body).into_response())
        }
    }
}

async fn render_listing(dir: &Path, relative: &str, url_prefix: &str) -> Result<Response, ApiError> {
    let mut entries = fs::read_dir(dir).await.map_err(io_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(STAGING_PREFIX) {
            continue;
        }
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let base = relative.trim_matches('/');
    let mut html = String::from("<pre>\n");
    for name in &names {
        let href = if base.is_empty() {
            format!("{}{}", url_prefix, name)
        } else {
            format!("{}{}/{}", url_prefix, base, name)
        };
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            escape_html(&href),
            escape_html(name)
        ));
    }
    html.push_str("</pre>\n");
    Ok(Html(html).into_response())
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
