//! Module for turning titles into filesystem-safe names

use std::{
	collections::HashMap,
	sync::Mutex,
};

/// Characters that are not allowed in a directory name on at least one common filesystem
const ILLEGAL_CHARACTERS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
/// Character the illegal characters get replaced with
const REPLACEMENT: char = '-';

/// Replace all characters of `title` that are not allowed in a directory name with `-`
///
/// This is used for the output directory of a title and as the key in the progress table
#[must_use]
pub fn sanitize_title(title: &str) -> String {
	return title
		.chars()
		.map(|c| {
			if ILLEGAL_CHARACTERS.contains(&c) {
				return REPLACEMENT;
			}

			return c;
		})
		.collect();
}

/// Memoizing wrapper around [sanitize_title]
///
/// Titles are sanitized on every enqueue and lookup, so the result is kept
#[derive(Debug, Default)]
pub struct TitleSanitizer {
	cache: Mutex<HashMap<String, String>>,
}

impl TitleSanitizer {
	/// Create a new empty [TitleSanitizer]
	#[must_use]
	pub fn new() -> Self {
		return Self::default();
	}

	/// Get the sanitized variant of `title`
	pub fn sanitize(&self, title: &str) -> String {
		let Ok(mut cache) = self.cache.lock() else {
			// the memoization is only a optimization
			return sanitize_title(title);
		};

		if let Some(found) = cache.get(title) {
			return found.clone();
		}

		let sanitized = sanitize_title(title);
		cache.insert(title.to_owned(), sanitized.clone());

		return sanitized;
	}

	/// Get how many titles are memoized
	pub fn len(&self) -> usize {
		return self.cache.lock().map(|v| return v.len()).unwrap_or(0);
	}

	/// Get if no titles are memoized
	pub fn is_empty(&self) -> bool {
		return self.len() == 0;
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_sanitize_all_illegal() {
		assert_eq!("---------", sanitize_title("\\/*?:\"<>|"));
	}

	#[test]
	fn test_sanitize_deterministic() {
		let first = sanitize_title("A/B:C");

		assert_eq!("A-B-C", first);
		assert_eq!(first, sanitize_title("A/B:C"));
		assert!(!first.contains(ILLEGAL_CHARACTERS));
	}

	#[test]
	fn test_sanitize_empty_and_unicode() {
		assert_eq!("", sanitize_title(""));
		assert_eq!("Café - Part 1", sanitize_title("Café - Part 1"));
		assert_eq!("Movie- Part 1", sanitize_title("Movie: Part 1"));
	}

	#[test]
	fn test_sanitizer_memoizes() {
		let sanitizer = TitleSanitizer::new();

		assert!(sanitizer.is_empty());
		assert_eq!("A-B", sanitizer.sanitize("A/B"));
		assert_eq!("A-B", sanitizer.sanitize("A/B"));
		assert_eq!(1, sanitizer.len());
		assert_eq!("C-D", sanitizer.sanitize("C?D"));
		assert_eq!(2, sanitizer.len());
	}
}
