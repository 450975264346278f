//! Module for all (longer) commands

pub mod clear;
pub mod completions;
pub mod subtitles;
pub mod thumbnails;
