//! Module for SQL Diesel Models

use crate::data::sql_schema::{
	subtitles,
	thumbnail_progress,
};
use diesel::prelude::*;

/// Struct representing a "thumbnail_progress" table entry
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = thumbnail_progress)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressRow {
	/// The media kind this entry is for, see [crate::data::media_kind::MediaKind::as_str]
	pub media_kind:      String,
	/// The sanitized title, unique per media kind
	pub sanitized_title: String,
	/// Whether the secondary job has successfully finished
	pub done:            bool,
	/// The last produced frame number, `-1` if none
	pub last_index:      i32,
}

/// Struct representing a "subtitles" table entry
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = subtitles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubtitleRow {
	/// The video the subtitle was extracted from
	pub video_path: String,
	/// The absolute stream index in the video
	pub index_sub:  i32,
	/// The language tag of the stream
	pub language:   String,
	/// The codec of the stream
	pub codec:      String,
	/// The path to the extracted ".srt", if it was a text subtitle
	pub srt_path:   Option<String>,
	/// The path to the extracted ".sup", if it was a bitmap subtitle
	pub sup_path:   Option<String>,
}
