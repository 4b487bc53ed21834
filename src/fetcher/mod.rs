pub mod client;
pub mod decode;
pub mod errors;
pub mod pacer;
pub mod types;

pub use client::Fetcher;
pub use errors::FetchError;
pub use pacer::Pacer;
pub use types::{AssetResponse, Charset, FetchSettings, PageResponse};
