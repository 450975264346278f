//! Module for State Structs of commands

use std::path::{
	Path,
	PathBuf,
};

use libmediathumb::traits::subtitle_options::SubtitleOptions;

/// Struct to keep configuration data for the [`SubtitleOptions`] trait
#[derive(Debug, PartialEq, Clone)]
pub struct SubtitleState {
	/// Folders (or single files) to search for videos
	media_folders: Vec<PathBuf>,
	/// Directory the extracted subtitles are written to
	output_dir:    PathBuf,
	/// Maximum number of videos processed at the same time
	max_workers:   Option<usize>,
}

impl SubtitleState {
	/// Create a new instance with the given options
	pub fn new(media_folders: Vec<PathBuf>, output_dir: PathBuf, max_workers: Option<usize>) -> Self {
		return Self {
			media_folders,
			output_dir,
			max_workers,
		};
	}
}

impl SubtitleOptions for SubtitleState {
	fn media_folders(&self) -> Vec<&Path> {
		return self.media_folders.iter().map(PathBuf::as_path).collect();
	}

	fn output_dir(&self) -> &Path {
		return &self.output_dir;
	}

	fn max_workers(&self) -> Option<usize> {
		return self.max_workers;
	}
}
