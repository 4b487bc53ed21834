use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    Utf8,
    Windows1252,
    ShiftJis,
    EucJp,
    Iso2022Jp,
    Gb2312,
    Big5,
    EucKr,
    Other(String),
}

impl Charset {
    pub fn from_encoding(encoding: &'static encoding_rs::Encoding) -> Self {
        use std::ptr;

        if ptr::eq(encoding, encoding_rs::UTF_8) {
            Self::Utf8
        } else if ptr::eq(encoding, encoding_rs::WINDOWS_1252) {
            Self::Windows1252
        } else if ptr::eq(encoding, encoding_rs::SHIFT_JIS) {
            Self::ShiftJis
        } else if ptr::eq(encoding, encoding_rs::EUC_JP) {
            Self::EucJp
        } else if ptr::eq(encoding, encoding_rs::ISO_2022_JP) {
            Self::Iso2022Jp
        } else if ptr::eq(encoding, encoding_rs::GBK) || ptr::eq(encoding, encoding_rs::GB18030) {
            Self::Gb2312
        } else if ptr::eq(encoding, encoding_rs::BIG5) {
            Self::Big5
        } else if ptr::eq(encoding, encoding_rs::EUC_KR) {
            Self::EucKr
        } else {
            Self::Other(encoding.name().to_string())
        }
    }
}

/// A decoded HTML document.
#[derive(Debug)]
pub struct PageResponse {
    pub url_final: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_raw: Bytes,
    pub body_utf8: String,
    pub charset: Charset,
    pub fetched_at: DateTime<Utc>,
}

/// A binary resource such as an image attachment.
#[derive(Debug)]
pub struct AssetResponse {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Network tunables. Read-only once a [`Fetcher`](super::Fetcher) is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Minimum gap between the start of two requests.
    pub request_interval: Duration,
    pub max_in_flight: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 wikisnap/0.1"
                .to_string(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            request_interval: Duration::from_millis(700),
            max_in_flight: 2,
        }
    }
}
