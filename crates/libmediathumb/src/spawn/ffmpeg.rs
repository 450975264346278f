//! Module that contains all logic for spawning the "ffmpeg" command
use std::{
	path::Path,
	process::Command,
	sync::LazyLock,
};

use regex::Regex;

use super::runner::{
	ProcessRunner,
	ProcessStatus,
};

/// Binary name to spawn for the ffmpeg process
pub const FFMPEG_BIN_NAME: &str = "ffmpeg";
/// Environment variable to override [FFMPEG_BIN_NAME] with
pub const FFMPEG_BIN_ENV: &str = "MEDIATHUMB_FFMPEG";

/// JPEG quality for single frames (lower is better, 2-31)
const SINGLE_FRAME_QUALITY: &str = "2";
/// JPEG quality for filmstrip frames, they are only shown small on scrubbing
const FILMSTRIP_QUALITY: &str = "5";
/// Threads ffmpeg may use per job, the jobs are meant to run in the background
const FFMPEG_THREADS: &str = "1";

/// Create a new basic ffmpeg [Command]
#[inline]
#[must_use]
pub fn base_ffmpeg(overwrite: bool) -> Command {
	let mut cmd = super::multiplatform::spawn_command(FFMPEG_BIN_NAME, FFMPEG_BIN_ENV);

	if overwrite {
		cmd.arg("-y"); // always overwrite output path
	}

	// explicitly disable interactive mode
	cmd.arg("-nostdin");

	return cmd;
}

/// Create a new basic ffmpeg [Command] without the banner and only logging errors
#[inline]
#[must_use]
pub fn base_ffmpeg_hidebanner(overwrite: bool) -> Command {
	let mut cmd = base_ffmpeg(overwrite);

	cmd.args(["-hide_banner", "-loglevel", "error"]);

	return cmd;
}

/// Test if ffmpeg is installed and reachable and return the version found.
///
/// This function is not automatically called in the library, it is recommended to run this in any binary trying to run libmediathumb.
pub fn require_ffmpeg_installed(runner: &dyn ProcessRunner) -> Result<String, crate::Error> {
	return match ffmpeg_version(runner) {
		Ok(v) => Ok(v),
		Err(err) => {
			log::error!("Could not start or find ffmpeg! Error: {}", err);

			return Err(crate::Error::custom_ioerror_location(
				std::io::ErrorKind::NotFound,
				"FFmpeg Version could not be determined, is it installed and reachable?",
				format!("{} in PATH", FFMPEG_BIN_NAME),
			));
		},
	};
}

/// Regex to parse the version from a "ffmpeg -version" output
/// cap1: version
static FFMPEG_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
	return Regex::new(r"(?mi)^ffmpeg version ([a-z0-9.-]+) Copyright").unwrap();
});

/// Get Version of `ffmpeg`
#[inline]
pub fn ffmpeg_version(runner: &dyn ProcessRunner) -> Result<String, crate::Error> {
	let mut cmd = base_ffmpeg(false);
	cmd.arg("-version");

	let command_output = runner.output(cmd)?;

	if !command_output.status.success() {
		return Err(crate::Error::command_unsuccessful("FFMPEG did not successfully exit!"));
	}

	let as_string = String::from_utf8(command_output.stdout)?;

	return ffmpeg_parse_version(&as_string);
}

/// Internal Function to parse the input to a ffmpeg version with regex
#[inline]
fn ffmpeg_parse_version(input: &str) -> Result<String, crate::Error> {
	return Ok(FFMPEG_VERSION_REGEX
		.captures_iter(input)
		.next()
		.ok_or_else(|| return crate::Error::no_captures("FFMPEG Version could not be determined"))?[1]
		.to_owned());
}

/// Consistent error for a ffmpeg process that exited with a non-0 code
pub fn unsuccessfull_command_exit(status: ProcessStatus, last_lines: &str) -> crate::Error {
	return crate::Error::command_unsuccessful(format!(
		"FFMPEG did not successfully exit! Exit Code: {}\nLast Lines:\n{}",
		status, last_lines
	));
}

/// Filter that center-crops the input to the aspect ratio of `width`:`height` and then scales it to exactly that size
#[must_use]
pub fn crop_scale_filter(width: u32, height: u32) -> String {
	return format!("crop='min(iw,ih*{width}/{height})':'min(ih,iw*{height}/{width})',scale={width}:{height}");
}

/// Format a timestamp in seconds for ffmpeg's "-ss"
fn format_seconds(seconds: f64) -> String {
	return format!("{:.3}", seconds.max(0.0));
}

/// Command to extract a single frame from `input` into `output`
///
/// `seek` is the timestamp in seconds to take the frame at, [`None`] takes the first frame of the first video stream (like a embedded cover)
#[must_use]
pub fn single_frame_cmd(input: &Path, output: &Path, seek: Option<f64>, filter: &str) -> Command {
	let mut cmd = base_ffmpeg_hidebanner(true);

	// "-ss" before "-i" to use input seeking, which is way faster than decoding everything up to the timestamp
	if let Some(seek) = seek {
		cmd.arg("-ss").arg(format_seconds(seek));
	}

	cmd.arg("-i").arg(input);
	cmd.args(["-map", "0:v:0", "-an", "-frames:v", "1"]);
	cmd.arg("-vf").arg(filter);
	cmd.args(["-q:v", SINGLE_FRAME_QUALITY, "-threads", FFMPEG_THREADS]);
	cmd.arg(output);

	return cmd;
}

/// Command to extract one frame every `interval` seconds, starting at frame `start_number`
///
/// `output_dir` will contain files named like `0001.jpg`
#[must_use]
pub fn filmstrip_cmd(input: &Path, output_dir: &Path, start_number: u32, interval: u32, filter: &str) -> Command {
	let mut cmd = base_ffmpeg_hidebanner(true);
	let start_time = f64::from(start_number) * f64::from(interval);

	cmd.arg("-ss").arg(format_seconds(start_time));
	cmd.arg("-i").arg(input);
	cmd.args(["-map", "0:v:0", "-an"]);
	cmd.arg("-vf").arg(format!("fps=1/{interval},{filter}"));
	cmd.arg("-start_number").arg(start_number.to_string());
	cmd.args(["-q:v", FILMSTRIP_QUALITY, "-threads", FFMPEG_THREADS]);
	cmd.arg(output_dir.join(FILMSTRIP_PATTERN));

	return cmd;
}

/// Output pattern for filmstrip frames
pub const FILMSTRIP_PATTERN: &str = "%04d.jpg";

/// Command to copy the embedded cover art of `input` into `output`
#[must_use]
pub fn cover_cmd(input: &Path, output: &Path) -> Command {
	let mut cmd = base_ffmpeg_hidebanner(true);

	cmd.arg("-i").arg(input);
	cmd.args(["-map", "0:v:0", "-an", "-frames:v", "1"]);
	cmd.args(["-q:v", SINGLE_FRAME_QUALITY, "-threads", FFMPEG_THREADS]);
	cmd.arg(output);

	return cmd;
}

/// How a subtitle stream is written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleCodecArg {
	/// Convert text based subtitles to srt
	Srt,
	/// Copy the stream without conversion (bitmap based subtitles)
	Copy,
}

impl SubtitleCodecArg {
	/// Get the value for "-c:s"
	#[must_use]
	pub fn as_arg(self) -> &'static str {
		return match self {
			Self::Srt => "srt",
			Self::Copy => "copy",
		};
	}
}

/// Command to extract the subtitle stream with absolute index `stream_index` from `input` into `output`
#[must_use]
pub fn subtitle_cmd(input: &Path, stream_index: u32, codec: SubtitleCodecArg, output: &Path) -> Command {
	let mut cmd = base_ffmpeg_hidebanner(true);

	cmd.arg("-i").arg(input);
	cmd.arg("-map").arg(format!("0:{stream_index}"));
	cmd.arg("-c:s").arg(codec.as_arg());
	cmd.arg(output);

	return cmd;
}
