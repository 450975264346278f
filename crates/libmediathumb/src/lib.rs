//! Library of "mediathumb", contains all the logic needed for the binary
//!
//! The library generates thumbnails (a single representative frame plus a filmstrip or cover) for media files,
//! checkpoints long-running generation into SQLite so it can resume, keeps decoded thumbnails in bounded memory caches
//! and extracts subtitle streams from videos in parallel.

#![allow(clippy::needless_return)]
#![allow(special_module_name)] // because of module "main", dont have a better name for that
#![warn(clippy::implicit_return)]

#[macro_use]
extern crate log;

pub mod data;
pub mod error;
pub mod main;
pub mod spawn;
pub mod traits;
pub mod utils;
pub use error::Error;

pub use diesel;
pub use image;
