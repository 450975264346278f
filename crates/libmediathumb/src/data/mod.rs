//! Module for all data types used in the library

pub mod media_kind;
pub mod memory_cache;
pub mod sql_models;
pub mod sql_schema;
pub mod title;
