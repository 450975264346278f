//! Module for the main functionality of the library

pub mod job_queue;
pub mod progress_store;
pub mod sql_utils;
pub mod subtitles;
pub mod thumbnail_engine;
