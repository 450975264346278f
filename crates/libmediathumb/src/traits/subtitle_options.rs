//! Module for the options of the subtitle extraction

use std::path::Path;

/// Options specific for the [`crate::main::subtitles::SubtitleExtractor::extract_subtitles_from_videos`] function
pub trait SubtitleOptions {
	/// Get the folders to (recursively) search for videos
	fn media_folders(&self) -> Vec<&Path>;
	/// Get the directory extracted subtitles are written to
	fn output_dir(&self) -> &Path;
	/// Get how many videos may be processed at the same time
	/// [None] uses the number of available CPUs
	fn max_workers(&self) -> Option<usize>;
}
