use crate::fetcher::types::{Charset, PageResponse};
use bytes::Bytes;
use chrono::Utc;
use encoding_rs::Encoding;
use regex::Regex;
use reqwest::{StatusCode, header::HeaderMap};
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

static CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([^"'\s;]+)"#).unwrap());

static META_CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<meta\s+[^>]*?charset\s*=\s*["']?([^"'\s/>]+)"#).unwrap());

static META_HTTP_EQUIV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+[^>]*?http-equiv\s*=\s*["']?content-type["']?[^>]*?content\s*=\s*["']?[^"'>]*?charset\s*=\s*([^"'\s;/>]+)"#).unwrap()
});

pub fn process_response(
    url_final: Url,
    status: StatusCode,
    headers: HeaderMap,
    body_bytes: Bytes,
    content_type: &str,
) -> PageResponse {
    let encoding = detect_encoding(content_type, &body_bytes);
    let body_utf8 = decode_to_utf8(&body_bytes, encoding);

    PageResponse {
        url_final,
        status,
        headers,
        body_raw: body_bytes,
        body_utf8,
        charset: Charset::from_encoding(encoding),
        fetched_at: Utc::now(),
    }
}

/// Picks the encoding for `body_bytes`.
///
/// The source serves Japanese text with unreliable declarations, so the
/// statistical guess wins unless it fails to decode the body while the
/// declared charset decodes it cleanly.
pub fn detect_encoding(content_type: &str, body_bytes: &[u8]) -> &'static Encoding {
    let declared = declared_encoding(content_type, body_bytes);

    // Pure ASCII carries no signal for the detector.
    if body_bytes.is_ascii() {
        return declared.unwrap_or(encoding_rs::UTF_8);
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body_bytes, true);
    let guessed = detector.guess(None, true);

    match declared {
        Some(declared) if declared != guessed => {
            if !decodes_cleanly(guessed, body_bytes) && decodes_cleanly(declared, body_bytes) {
                debug!(
                    declared = declared.name(),
                    guessed = guessed.name(),
                    "heuristic guess fails to decode, using declared charset"
                );
                declared
            } else {
                debug!(
                    declared = declared.name(),
                    guessed = guessed.name(),
                    "declared charset disagrees with content, using guess"
                );
                guessed
            }
        }
        _ => guessed,
    }
}

fn declared_encoding(content_type: &str, body_bytes: &[u8]) -> Option<&'static Encoding> {
    // 1. Content-Type header
    if let Some(encoding) = label_from(&CHARSET_REGEX, content_type) {
        return Some(encoding);
    }

    // 2. <meta charset> or <meta http-equiv> in the first 4KB
    let search_bytes = &body_bytes[..body_bytes.len().min(4096)];
    let search_str = String::from_utf8_lossy(search_bytes);

    label_from(&META_CHARSET_REGEX, &search_str)
        .or_else(|| label_from(&META_HTTP_EQUIV_REGEX, &search_str))
}

fn label_from(regex: &Regex, haystack: &str) -> Option<&'static Encoding> {
    let captures = regex.captures(haystack)?;
    let label = captures.get(1)?.as_str().to_lowercase();
    Encoding::for_label(label.as_bytes())
}

fn decodes_cleanly(encoding: &'static Encoding, body_bytes: &[u8]) -> bool {
    encoding
        .decode_without_bom_handling_and_without_replacement(body_bytes)
        .is_some()
}

fn decode_to_utf8(body_bytes: &[u8], encoding: &'static Encoding) -> String {
    let (decoded, actual, had_errors) = encoding.decode(body_bytes);

    if had_errors {
        warn!(
            encoding = actual.name(),
            "body contains malformed sequences, decoded lossily"
        );
    }

    decoded.into_owned()
}
