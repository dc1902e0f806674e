//! Concurrent Beatport / Beatsource downloader.

pub mod account;
pub mod app;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod download;
pub mod error;
pub mod http;
pub mod input;
pub mod pool;
pub mod progress;
pub mod shutdown;

pub use app::Application;
pub use error::{Error, Result};
