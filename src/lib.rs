#![forbid(unsafe_code)]

//! Batch download of videos into a folder-per-video store and re-upload of
//! those folders through YouTube Studio.

pub mod assembler;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod joblist;
pub mod logging;
pub mod metadata;
pub mod pool;
pub mod source;
pub mod store;
pub mod upload;
