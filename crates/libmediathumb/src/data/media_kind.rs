//! Module for the media kinds and their thumbnail generation profiles

use std::{
	borrow::Cow,
	path::{
		Path,
		PathBuf,
	},
};

/// Name of the priority thumbnail in a title directory
pub const PRIORITY_THUMBNAIL: &str = "thumb_15.jpg";
/// Flag file written after [PRIORITY_THUMBNAIL] was successfully generated
pub const PRIORITY_DONE_FLAG: &str = "thumb_15.done";
/// Flag file written after the filmstrip was completely generated
pub const FILMSTRIP_DONE_FLAG: &str = ".done";
/// Name of the extracted cover art in a title directory
pub const COVER_FILE: &str = "cover.jpg";
/// Flag file written after [COVER_FILE] was successfully extracted
pub const COVER_DONE_FLAG: &str = "cover.done";

/// Where in the media the priority thumbnail is taken, relative to the duration
pub const PRIORITY_POSITION: f64 = 0.15;

/// The kind of media a [ThumbnailProfile] is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
	Video,
	Music,
}

impl MediaKind {
	/// Get the string representation, used as the database column value and directory name
	#[must_use]
	pub fn as_str(self) -> &'static str {
		return match self {
			Self::Video => "video",
			Self::Music => "music",
		};
	}
}

impl std::fmt::Display for MediaKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return write!(f, "{}", self.as_str());
	}
}

/// How the secondary (long running) job of a title is generated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryMode {
	/// Extract one frame every `interval` seconds across the whole media
	Filmstrip {
		/// Seconds between frames
		interval: u32,
		/// Width of each frame
		width:    u32,
		/// Height of each frame
		height:   u32,
	},
	/// Extract the embedded cover art
	Cover,
}

/// Everything that differs between the video and music thumbnail generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailProfile {
	/// The media kind this profile is for
	pub kind:          MediaKind,
	/// Width of the priority thumbnail
	pub width:         u32,
	/// Height of the priority thumbnail
	pub height:        u32,
	/// Seek to [PRIORITY_POSITION] of the duration for the priority thumbnail
	/// Without seeking, the first frame of the first video stream is used (like embedded art)
	pub priority_seek: bool,
	/// How the secondary job is generated
	pub secondary:     SecondaryMode,
}

impl ThumbnailProfile {
	/// Profile for video files: 16:9 priority thumbnail at 15% and a filmstrip every 5 seconds
	#[must_use]
	pub fn video() -> Self {
		return Self {
			kind:          MediaKind::Video,
			width:         320,
			height:        180,
			priority_seek: true,
			secondary:     SecondaryMode::Filmstrip {
				interval: 5,
				width:    160,
				height:   90,
			},
		};
	}

	/// Profile for music files: square priority thumbnail from the embedded art and the full cover
	#[must_use]
	pub fn music() -> Self {
		return Self {
			kind:          MediaKind::Music,
			width:         200,
			height:        200,
			priority_seek: false,
			secondary:     SecondaryMode::Cover,
		};
	}

	/// Get the profile for `kind`
	#[must_use]
	pub fn for_kind(kind: MediaKind) -> Self {
		return match kind {
			MediaKind::Video => Self::video(),
			MediaKind::Music => Self::music(),
		};
	}

	/// Get the flag file that marks the secondary job as done
	#[must_use]
	pub fn secondary_done_flag(&self) -> &'static str {
		return match self.secondary {
			SecondaryMode::Filmstrip { .. } => FILMSTRIP_DONE_FLAG,
			SecondaryMode::Cover => COVER_DONE_FLAG,
		};
	}
}

/// Paths of all outputs of a single title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitlePaths {
	/// The directory containing all outputs
	pub dir: PathBuf,
}

impl TitlePaths {
	/// Get the paths for `sanitized_title` under the thumbnail root of a kind
	///
	/// The directory is always a direct child of `kind_root`, see [`title_dir_name`].
	#[must_use]
	pub fn new(kind_root: &Path, sanitized_title: &str) -> Self {
		return Self {
			dir: kind_root.join(title_dir_name(sanitized_title).as_ref()),
		};
	}

	#[must_use]
	pub fn priority_thumbnail(&self) -> PathBuf {
		return self.dir.join(PRIORITY_THUMBNAIL);
	}

	#[must_use]
	pub fn priority_done_flag(&self) -> PathBuf {
		return self.dir.join(PRIORITY_DONE_FLAG);
	}

	#[must_use]
	pub fn cover(&self) -> PathBuf {
		return self.dir.join(COVER_FILE);
	}

	/// Get the path of the secondary done flag for `profile`
	#[must_use]
	pub fn secondary_done_flag(&self, profile: &ThumbnailProfile) -> PathBuf {
		return self.dir.join(profile.secondary_done_flag());
	}
}

/// Get the directory name for `sanitized_title`
///
/// Empty titles and titles made up only of dots (like `.` or `..`) would resolve to the kind root or outside of it,
/// so they get a `_` prefixed.
#[must_use]
pub fn title_dir_name(sanitized_title: &str) -> Cow<'_, str> {
	if sanitized_title.bytes().all(|v| return v == b'.') {
		return Cow::Owned(format!("_{sanitized_title}"));
	}

	return Cow::Borrowed(sanitized_title);
}

/// Parse a filmstrip frame file name (like `0012.jpg`) into its frame number
#[must_use]
pub fn parse_frame_number(file_name: &str) -> Option<u32> {
	let stem = file_name.strip_suffix(".jpg")?;

	if stem.is_empty() || !stem.bytes().all(|v| return v.is_ascii_digit()) {
		return None;
	}

	return stem.parse().ok();
}
