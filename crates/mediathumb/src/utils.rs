//! Utils for the `mediathumb` binary

use crate::clap_conf::{
	CliDerive,
	KindArg,
};
use indicatif::{
	ProgressBar,
	ProgressDrawTarget,
};
use libmediathumb::{
	data::media_kind::MediaKind,
	spawn::{
		ffmpeg::require_ffmpeg_installed,
		ffprobe::require_ffprobe_installed,
		runner::ProcessRunner,
	},
	utils::{
		find_files,
		is_music_file,
		is_video_file,
	},
};
use std::path::{
	Path,
	PathBuf,
};

/// Helper function to set the progressbar to a draw target if mode is interactive
pub fn set_progressbar(bar: &ProgressBar, main_args: &CliDerive) {
	if main_args.is_interactive() {
		bar.set_draw_target(ProgressDrawTarget::stderr());
	}
}

/// Test if ffmpeg and ffprobe are installed and reachable
pub fn require_tools_installed(runner: &dyn ProcessRunner) -> Result<(), crate::Error> {
	let ffmpeg = require_ffmpeg_installed(runner)?;
	let ffprobe = require_ffprobe_installed(runner)?;

	debug!("Found ffmpeg version {} and ffprobe version {}", ffmpeg, ffprobe);

	return Ok(());
}

/// Get the [MediaKind] of `path` by its extension
pub fn media_kind_of(path: &Path) -> Option<MediaKind> {
	if is_video_file(path) {
		return Some(MediaKind::Video);
	}
	if is_music_file(path) {
		return Some(MediaKind::Music);
	}

	return None;
}

/// Find all media files in `paths` that are included in `kind`
pub fn find_media_files(paths: &[PathBuf], kind: KindArg) -> Vec<(PathBuf, MediaKind)> {
	let paths: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();

	return find_files(&paths, |path| return media_kind_of(path).is_some_and(|v| return kind.includes(v)))
		.into_iter()
		.filter_map(|path| return media_kind_of(&path).map(|v| return (path, v)))
		.collect();
}
