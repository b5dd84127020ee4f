#![forbid(unsafe_code)]

//! Small web front-end for yt-dlp: paste a URL, get the merged video back.

pub mod config;
pub mod downloader;
pub mod logging;
pub mod server;
pub mod store;
