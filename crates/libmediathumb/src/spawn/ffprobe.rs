//! Module that contains all logic for spawning the "ffprobe" command
use std::{
	path::Path,
	process::Command,
	sync::LazyLock,
};

use regex::Regex;
use serde::Deserialize;

use super::runner::ProcessRunner;

/// Binary name to spawn for the ffprobe process
pub const FFPROBE_BIN_NAME: &str = "ffprobe";
/// Environment variable to override [FFPROBE_BIN_NAME] with
pub const FFPROBE_BIN_ENV: &str = "MEDIATHUMB_FFPROBE";

/// Language used when a stream does not have a language tag
pub const UNKNOWN_LANGUAGE: &str = "und";

/// Create a new basic ffprobe [Command], only logging errors
#[inline]
#[must_use]
pub fn base_ffprobe() -> Command {
	let mut cmd = super::multiplatform::spawn_command(FFPROBE_BIN_NAME, FFPROBE_BIN_ENV);

	cmd.args(["-v", "error"]);

	return cmd;
}

/// Regex to parse the version from a "ffprobe -version" output
/// cap1: version
static FFPROBE_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
	return Regex::new(r"(?mi)^ffprobe version ([a-z0-9.-]+) Copyright").unwrap();
});

/// Test if ffprobe is installed and reachable and return the version found.
pub fn require_ffprobe_installed(runner: &dyn ProcessRunner) -> Result<String, crate::Error> {
	let mut cmd = super::multiplatform::spawn_command(FFPROBE_BIN_NAME, FFPROBE_BIN_ENV);
	cmd.arg("-version");

	let version = runner.output(cmd).ok().and_then(|output| {
		if !output.status.success() {
			return None;
		}

		let as_string = String::from_utf8_lossy(&output.stdout);

		return FFPROBE_VERSION_REGEX
			.captures(&as_string)
			.map(|cap| return cap[1].to_owned());
	});

	return version.ok_or_else(|| {
		return crate::Error::custom_ioerror_location(
			std::io::ErrorKind::NotFound,
			"FFprobe Version could not be determined, is it installed and reachable?",
			format!("{} in PATH", FFPROBE_BIN_NAME),
		);
	});
}

/// Command to print only the duration of `input` in seconds
#[must_use]
pub fn duration_cmd(input: &Path) -> Command {
	let mut cmd = base_ffprobe();

	cmd.args([
		"-show_entries",
		"format=duration",
		"-of",
		"default=noprint_wrappers=1:nokey=1",
	]);
	cmd.arg(input);

	return cmd;
}

/// Parse the output of [duration_cmd]
/// Returns [`None`] if the output was not a valid, non-negative duration
fn parse_duration(input: &str) -> Option<f64> {
	return input
		.trim()
		.lines()
		.next()
		.and_then(|v| return v.trim().parse::<f64>().ok())
		.filter(|v| return v.is_finite() && *v >= 0.0);
}

/// Probe the duration of `input` in seconds
///
/// Any error (failed spawn, non-0 exit, unparseable output) results in a duration of `0`, so generation can still continue
pub fn probe_duration(runner: &dyn ProcessRunner, input: &Path) -> f64 {
	let output = match runner.output(duration_cmd(input)) {
		Ok(v) => v,
		Err(err) => {
			warn!("Probing duration of \"{}\" failed: {}", input.display(), err);
			return 0.0;
		},
	};

	if !output.status.success() {
		debug!(
			"ffprobe exited with {} for \"{}\": {}",
			output.status,
			input.display(),
			String::from_utf8_lossy(&output.stderr).trim()
		);
		return 0.0;
	}

	return parse_duration(&String::from_utf8_lossy(&output.stdout)).unwrap_or_else(|| {
		debug!("Could not parse duration of \"{}\", using 0", input.display());
		return 0.0;
	});
}

/// A subtitle stream found in a media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleStream {
	/// The absolute stream index in the container
	pub index:      u32,
	/// The codec name as ffprobe reports it (like "subrip")
	pub codec_name: String,
	/// The language tag, [UNKNOWN_LANGUAGE] if not set
	pub language:   String,
}

/// Top-Level ffprobe json output
#[derive(Debug, Deserialize)]
struct ProbeOutput {
	#[serde(default)]
	streams: Vec<ProbeStream>,
}

/// A single stream in the ffprobe json output
#[derive(Debug, Deserialize)]
struct ProbeStream {
	index:      u32,
	codec_name: Option<String>,
	#[serde(default)]
	tags:       Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
	language: Option<String>,
}

/// Command to list all subtitle streams of `input` as json
#[must_use]
pub fn subtitle_streams_cmd(input: &Path) -> Command {
	let mut cmd = base_ffprobe();

	cmd.args([
		"-select_streams",
		"s",
		"-show_entries",
		"stream=index,codec_name:stream_tags=language",
		"-of",
		"json",
	]);
	cmd.arg(input);

	return cmd;
}

/// Parse the json output of [subtitle_streams_cmd]
fn parse_subtitle_streams(input: &[u8]) -> Result<Vec<SubtitleStream>, crate::Error> {
	let parsed: ProbeOutput = serde_json::from_slice(input)?;

	return Ok(parsed
		.streams
		.into_iter()
		.map(|stream| {
			let language = stream
				.tags
				.and_then(|v| return v.language)
				.filter(|v| return !v.is_empty())
				.unwrap_or_else(|| return UNKNOWN_LANGUAGE.to_owned());

			return SubtitleStream {
				index: stream.index,
				codec_name: stream.codec_name.unwrap_or_default(),
				language,
			};
		})
		.collect());
}

/// Probe all subtitle streams of `input`
///
/// Any error results in no streams
pub fn probe_subtitle_streams(runner: &dyn ProcessRunner, input: &Path) -> Vec<SubtitleStream> {
	let output = match runner.output(subtitle_streams_cmd(input)) {
		Ok(v) => v,
		Err(err) => {
			warn!("Probing subtitle streams of \"{}\" failed: {}", input.display(), err);
			return Vec::new();
		},
	};

	if !output.status.success() {
		debug!(
			"ffprobe exited with {} for \"{}\": {}",
			output.status,
			input.display(),
			String::from_utf8_lossy(&output.stderr).trim()
		);
		return Vec::new();
	}

	return parse_subtitle_streams(&output.stdout).unwrap_or_else(|err| {
		warn!("Could not parse subtitle streams of \"{}\": {}", input.display(), err);
		return Vec::new();
	});
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::spawn::runner::{
		ProcessOutput,
		ProcessStatus,
		test_utils::{
			FakeRunner,
			stdout_output,
		},
	};

	mod duration {
		use super::*;

		#[test]
		fn test_parse_duration() {
			assert_eq!(Some(1000.0), parse_duration("1000.000000\n"));
			assert_eq!(Some(12.5), parse_duration("  12.5  "));
			assert_eq!(None, parse_duration("N/A\n"));
			assert_eq!(None, parse_duration(""));
			assert_eq!(None, parse_duration("-5"));
		}

		#[test]
		fn test_probe_duration_success() {
			let runner = FakeRunner::new(|_| return 0, |_| return stdout_output("1000.000000\n"));

			assert_eq!(1000.0, probe_duration(&runner, Path::new("/movie.mkv")));

			let outputs = runner.outputs.lock().expect("Expected lock to not be poisoned");
			assert_eq!(1, outputs.len());
			assert_eq!(Some("format=duration".to_owned()), outputs[0].arg_after("-show_entries"));
		}

		#[test]
		fn test_probe_duration_failure_defaults_zero() {
			let runner = FakeRunner::new(
				|_| return 0,
				|_| {
					return ProcessOutput {
						status: ProcessStatus::from_code(Some(1)),
						stdout: Vec::new(),
						stderr: b"No such file".to_vec(),
					};
				},
			);

			assert_eq!(0.0, probe_duration(&runner, Path::new("/missing.mkv")));
		}

		#[test]
		fn test_probe_duration_garbage_defaults_zero() {
			let runner = FakeRunner::new(|_| return 0, |_| return stdout_output("garbage"));

			assert_eq!(0.0, probe_duration(&runner, Path::new("/movie.mkv")));
		}
	}

	mod subtitle_streams {
		use super::*;

		const PROBE_JSON: &str = r#"{
	"programs": [],
	"streams": [
		{ "index": 2, "codec_name": "subrip", "tags": { "language": "eng" } },
		{ "index": 3, "codec_name": "hdmv_pgs_subtitle", "tags": { "language": "fre" } },
		{ "index": 4, "codec_name": "ass" }
	]
}"#;

		#[test]
		fn test_parse_streams() {
			let streams = parse_subtitle_streams(PROBE_JSON.as_bytes()).expect("Expected json to parse");

			assert_eq!(
				vec![
					SubtitleStream {
						index:      2,
						codec_name: "subrip".to_owned(),
						language:   "eng".to_owned(),
					},
					SubtitleStream {
						index:      3,
						codec_name: "hdmv_pgs_subtitle".to_owned(),
						language:   "fre".to_owned(),
					},
					SubtitleStream {
						index:      4,
						codec_name: "ass".to_owned(),
						language:   UNKNOWN_LANGUAGE.to_owned(),
					},
				],
				streams
			);
		}

		#[test]
		fn test_parse_no_streams_key() {
			assert_eq!(
				Vec::<SubtitleStream>::new(),
				parse_subtitle_streams(b"{}").expect("Expected json to parse")
			);
		}

		#[test]
		fn test_probe_malformed_is_empty() {
			let runner = FakeRunner::new(|_| return 0, |_| return stdout_output("{ not json"));

			assert!(probe_subtitle_streams(&runner, Path::new("/movie.mkv")).is_empty());
		}

		#[test]
		fn test_probe_streams() {
			let runner = FakeRunner::new(|_| return 0, |_| return stdout_output(PROBE_JSON));

			assert_eq!(3, probe_subtitle_streams(&runner, Path::new("/movie.mkv")).len());
		}
	}
}
