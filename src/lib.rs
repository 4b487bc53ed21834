pub mod archive;
pub mod assets;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod pages;
pub mod pipeline;
