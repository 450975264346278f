//! Module for utility functions, that may be used in various other modules

use std::{
	ffi::OsStr,
	path::{
		Path,
		PathBuf,
	},
};

use path_absolutize::Absolutize;
use walkdir::WalkDir;

/// Extensions that are considered video files (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v", "wmv", "flv", "ts", "mpg", "mpeg"];
/// Extensions that are considered music files (lowercase)
pub const MUSIC_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "ogg", "opus", "wav", "aac", "wma"];

/// Simple helper to resolve "~" to the Home directory
/// System agnostic as long as [`dirs::home_dir`] support's it
pub fn expand_tidle<I: AsRef<Path>>(input: I) -> Option<PathBuf> {
	let path = input.as_ref();

	if !path.starts_with("~") {
		return Some(path.to_owned());
	}
	if path == Path::new("~") {
		return dirs::home_dir();
	}

	// "~user" syntax is not supported, "starts_with" only matches whole components
	let rest = path.strip_prefix("~").ok()?;

	return dirs::home_dir().map(|home| {
		// handle case where "home_dir" might be set to the root POSIX directory
		if home == Path::new("/") {
			return Path::new("/").join(rest);
		}

		return home.join(rest);
	});
}

/// Convert input path to a absolute path, without hitting the filesystem.
/// This function handles `~`(home)
///
/// If the start is not absolute, CWD will be used.
///
/// This functions behavior:
/// - `/path/to/inner/../somewhere` -> `/path/to/somewhere`
/// - `relative/to/somewhere` -> `CWD/relative/to/somewhere`
/// - `~/somewhere/in/home` -> `HOME/somewhere/in/home`
pub fn to_absolute<P: AsRef<Path>>(input: P) -> std::io::Result<PathBuf> {
	let Some(converted) = expand_tidle(input) else {
		return Err(std::io::Error::new(
			std::io::ErrorKind::InvalidInput,
			"Could not resolve \"~\"",
		));
	};

	return converted.absolutize().map(|v| return v.to_path_buf());
}

/// Check if the extension of `path` is in `list`, case-insensitive
pub fn has_extension(path: &Path, list: &[&str]) -> bool {
	return path
		.extension()
		.and_then(OsStr::to_str)
		.is_some_and(|ext| return list.iter().any(|v| return v.eq_ignore_ascii_case(ext)));
}

/// Check if `path` looks like a video file
#[inline]
pub fn is_video_file(path: &Path) -> bool {
	return has_extension(path, VIDEO_EXTENSIONS);
}

/// Check if `path` looks like a music file
#[inline]
pub fn is_music_file(path: &Path) -> bool {
	return has_extension(path, MUSIC_EXTENSIONS);
}

/// Get the title used for a media file when none is known: the file stem
pub fn title_from_path(path: &Path) -> String {
	return path
		.file_stem()
		.map_or_else(|| return path.to_string_lossy().to_string(), |v| return v.to_string_lossy().to_string());
}

/// Find all files in `paths` (recursively for directories) for which `filter` returns `true`
///
/// The result is sorted and does not contain duplicates, unreadable entries are logged and skipped.
pub fn find_files<F>(paths: &[&Path], filter: F) -> Vec<PathBuf>
where
	F: Fn(&Path) -> bool,
{
	let mut found: Vec<PathBuf> = paths
		.iter()
		.flat_map(|path| {
			return WalkDir::new(path).follow_links(true).into_iter().filter_map(|entry| {
				return match entry {
					Ok(entry) => Some(entry),
					Err(err) => {
						warn!("Could not read entry while searching for media files: {}", err);
						None
					},
				};
			});
		})
		.filter(|entry| return entry.file_type().is_file() && filter(entry.path()))
		.map(walkdir::DirEntry::into_path)
		.collect();

	found.sort();
	found.dedup();

	return found;
}

#[cfg(test)]
mod test {
	use super::*;

	mod expand_tidle {
		use super::*;

		#[test]
		fn basic_func() {
			// should not modify a absolute path
			let absolue_path = PathBuf::from("/absolute/to/path");
			assert_eq!(
				absolue_path,
				expand_tidle(&absolue_path).expect("Expected to return a SOME value")
			);

			// should not modify a relative path
			let relative_path = PathBuf::from("./inner/path");
			assert_eq!(
				relative_path,
				expand_tidle(&relative_path).expect("Expected to return a SOME value")
			);

			// should resolve "~" without extra paths
			assert_eq!(dirs::home_dir(), expand_tidle("~"));

			// should resolve "~" with extra paths
			let home = dirs::home_dir().expect("Expected to have a HOME");
			let expected = if home == Path::new("/") {
				PathBuf::from("/some/path")
			} else {
				home.join("some/path")
			};
			assert_eq!(
				expected,
				expand_tidle("~/some/path").expect("Expected to return a SOME value")
			);

			// should return weird path "~user"
			let weird_path = PathBuf::from("~user");
			assert_eq!(
				weird_path,
				expand_tidle(&weird_path).expect("Expected to return a SOME value")
			);
		}
	}

	mod to_absolute {
		use super::*;

		#[test]
		fn basic_func() {
			// should not modify the input
			let absolue_path = PathBuf::from("/absolute/to/path");
			assert_eq!(
				absolue_path,
				to_absolute(&absolue_path).expect("Expected to return a OK value")
			);

			// should modify the input, but not the base
			assert_eq!(
				absolue_path,
				to_absolute("/absolute/to/inner/../path").expect("Expected to return a OK value")
			);

			// should add CWD as a base
			assert_eq!(
				Path::join(&std::env::current_dir().expect("Expected to have a CWD"), "inner/path"),
				to_absolute("./inner/path").expect("Expected to return a OK value")
			);
		}
	}

	mod extensions {
		use super::*;

		#[test]
		fn test_is_video_file() {
			assert!(is_video_file(Path::new("/some/movie.mkv")));
			assert!(is_video_file(Path::new("/some/MOVIE.MP4")));
			assert!(!is_video_file(Path::new("/some/track.flac")));
			assert!(!is_video_file(Path::new("/some/noextension")));
		}

		#[test]
		fn test_is_music_file() {
			assert!(is_music_file(Path::new("/some/track.flac")));
			assert!(is_music_file(Path::new("track.Mp3")));
			assert!(!is_music_file(Path::new("/some/movie.mkv")));
		}

		#[test]
		fn test_title_from_path() {
			assert_eq!("Movie: Part 1", title_from_path(Path::new("/media/Movie: Part 1.mkv")));
			assert_eq!("noext", title_from_path(Path::new("noext")));
		}
	}

	mod find_files {
		use super::*;

		#[test]
		fn test_find_files() {
			let dir = tempfile::Builder::new()
				.prefix("mediathumb-test-find-")
				.tempdir()
				.expect("Expected a temp dir to be created");
			std::fs::create_dir_all(dir.path().join("nested")).expect("Expected dir to be created");
			for name in ["a.mkv", "nested/b.MP4", "c.flac", "notes.txt"] {
				std::fs::write(dir.path().join(name), b"").expect("Expected file to be written");
			}

			// duplicate and single-file inputs are fine
			let single = dir.path().join("c.flac");
			let found = find_files(&[dir.path(), dir.path(), &single], |v| {
				return is_video_file(v) || is_music_file(v);
			});

			assert_eq!(
				vec![
					dir.path().join("a.mkv"),
					dir.path().join("c.flac"),
					dir.path().join("nested/b.MP4")
				],
				found
			);
		}

		#[test]
		fn test_find_files_missing() {
			assert!(find_files(&[Path::new("/does/not/exist/mediathumb")], |_| return true).is_empty());
		}
	}
}
