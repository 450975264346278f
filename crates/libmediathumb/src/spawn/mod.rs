//! Module for all spawning of external processes

pub mod ffmpeg;
pub mod ffprobe;
pub mod multiplatform;
pub mod runner;
