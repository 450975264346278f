//! Module for Clap related structs (derived)

#![deny(missing_docs)] // comments are used for "--help" generation, so it should always be defined

use clap::{
	ArgAction,
	Parser,
	Subcommand,
	ValueEnum,
};
use clap_complete::Shell;
use is_terminal::IsTerminal;
use libmediathumb::{
	data::media_kind::MediaKind,
	error::IOErrorToError,
	utils::to_absolute,
};
use std::path::{
	Path,
	PathBuf,
};

/// Name of the directory inside the user cache directory, if no cache directory is set
const DEFAULT_CACHE_DIR_NAME: &str = "mediathumb";
/// Name of the database inside the cache directory, if no database path is set
const DEFAULT_DB_NAME: &str = "mediathumb.db";

/// Trait to check and transform all Command Structures
trait Check {
	/// Check and transform self to be correct
	fn check(&mut self) -> Result<(), crate::Error>;
}

#[derive(Debug, Parser, Clone, PartialEq)]
#[command(author, version = env!("MEDIATHUMB_VERSION"), about, long_about = None)]
#[command(bin_name("mediathumb"))]
#[command(args_override_self(true))] // specifying a argument multiple times overwrites the earlier ones
#[command(disable_help_subcommand(true))] // Disable subcommand "help", only "-h --help" should be used
#[command(subcommand_negates_reqs(true))]
pub struct CliDerive {
	/// Set logging verbosity (0 - Default - WARN, 1 - INFO, 2 - DEBUG, 3 - TRACE)
	#[arg(short, long, action = ArgAction::Count, env = "MEDIATHUMB_VERBOSITY")]
	pub verbosity:    u8,
	/// Directory to store generated thumbnails in, defaults to "mediathumb" in the user cache directory
	#[arg(long = "cache-dir", env = "MEDIATHUMB_CACHE_DIR")]
	pub cache_dir:    Option<PathBuf>,
	/// Database path to store the progress and extracted subtitles in, defaults to "mediathumb.db" in the cache directory
	#[arg(long = "db", env = "MEDIATHUMB_DB")]
	pub db_path:      Option<PathBuf>,
	/// Explicitly set interactive / not interactive
	#[arg(long = "interactive")]
	pub explicit_tty: Option<bool>,
	/// Force Color to be active in any mode
	#[arg(long = "color")]
	pub force_color:  bool,

	#[command(subcommand)]
	pub subcommands: SubCommands,
}

impl CliDerive {
	/// Execute clap::Parser::parse and apply custom validation and transformation logic
	pub fn custom_parse() -> Result<Self, crate::Error> {
		let mut parsed = Self::parse();

		Check::check(&mut parsed)?;

		return Ok(parsed);
	}

	/// Get if the mode is interactive or not
	#[must_use]
	pub fn is_interactive(&self) -> bool {
		if let Some(explicit) = self.explicit_tty {
			return explicit;
		}

		return std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
	}

	/// Get if the colors are enabled or not
	#[must_use]
	pub fn enable_colors(&self) -> bool {
		return self.force_color | self.is_interactive();
	}

	/// Get the resolved cache directory
	#[must_use]
	pub fn cache_dir(&self) -> &Path {
		return self
			.cache_dir
			.as_deref()
			.expect("Expected trait \"Check\" to be run on \"CliDerive\" before this point");
	}

	/// Get the resolved database path
	#[must_use]
	pub fn db_path(&self) -> &Path {
		return self
			.db_path
			.as_deref()
			.expect("Expected trait \"Check\" to be run on \"CliDerive\" before this point");
	}

	/// Get the directory the thumbnails of all media kinds are stored in
	#[must_use]
	pub fn thumbnail_root(&self) -> PathBuf {
		return self.cache_dir().join("thumbnails");
	}
}

impl Check for CliDerive {
	fn check(&mut self) -> Result<(), crate::Error> {
		let cache_dir = match self.cache_dir.take() {
			Some(v) => resolve_path(&v)?,
			None => {
				dirs::cache_dir()
					.ok_or_else(|| return crate::Error::other("Could not determine the user cache directory, use \"--cache-dir\""))?
					.join(DEFAULT_CACHE_DIR_NAME)
			},
		};

		let db_path = match self.db_path.take() {
			Some(v) => resolve_path(&v)?,
			None => cache_dir.join(DEFAULT_DB_NAME),
		};

		self.cache_dir = Some(cache_dir);
		self.db_path = Some(db_path);

		return Check::check(&mut self.subcommands);
	}
}

/// Expand "~" in `path` and make it absolute
fn resolve_path(path: &Path) -> Result<PathBuf, crate::Error> {
	return to_absolute(path).attach_path_err(path);
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum SubCommands {
	/// Generate the thumbnails for all media files in the given paths
	Thumbnails(CommandThumbnails),
	/// Extract the subtitle streams of all videos in the given paths
	Subtitles(CommandSubtitles),
	/// Remove stored progress and subtitle records
	Clear(CommandClear),
	/// Generate shell completions
	Completions(CommandCompletions),
}

impl Check for SubCommands {
	fn check(&mut self) -> Result<(), crate::Error> {
		match self {
			SubCommands::Thumbnails(v) => return Check::check(v),
			SubCommands::Subtitles(v) => return Check::check(v),
			SubCommands::Clear(v) => return Check::check(v),
			SubCommands::Completions(v) => return Check::check(v),
		}
	}
}

/// Which media kinds to generate thumbnails for
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
	/// Only video files
	Video,
	/// Only music files
	Music,
	/// Decide by the file extension
	Auto,
}

impl KindArg {
	/// Get whether files of `kind` should be processed
	#[must_use]
	pub fn includes(self, kind: MediaKind) -> bool {
		return match self {
			Self::Auto => true,
			Self::Video => kind == MediaKind::Video,
			Self::Music => kind == MediaKind::Music,
		};
	}
}

/// Generate the icon thumbnail and the filmstrip or cover for media files
#[derive(Debug, Parser, Clone, PartialEq)]
pub struct CommandThumbnails {
	/// Media kinds to process
	#[arg(long = "kind", value_enum, default_value_t = KindArg::Auto)]
	pub kind:            KindArg,
	/// Only generate the icon thumbnail, dont generate the filmstrip or cover
	#[arg(long = "no-secondary")]
	pub no_secondary:    bool,
	/// Stop a single ffmpeg job after this many seconds, by default jobs are not limited
	#[arg(long = "job-timeout", value_parser = clap::value_parser!(u64).range(1..))]
	pub job_timeout:     Option<u64>,

	/// Files or directories (searched recursively) to generate thumbnails for
	#[arg(required = true)]
	pub paths: Vec<PathBuf>,
}

impl Check for CommandThumbnails {
	fn check(&mut self) -> Result<(), crate::Error> {
		self.paths = resolve_paths(&self.paths)?;

		return Ok(());
	}
}

/// Extract all supported subtitle streams of videos
#[derive(Debug, Parser, Clone, PartialEq)]
pub struct CommandSubtitles {
	/// Directory to write the subtitles to, defaults to "subtitles" in the cache directory
	#[arg(short = 'o', long = "out")]
	pub output_path: Option<PathBuf>,
	/// Number of videos to process at the same time, defaults to the number of CPUs
	#[arg(long = "workers", value_parser = clap::value_parser!(u64).range(1..))]
	pub workers:     Option<u64>,

	/// Files or directories (searched recursively) to extract subtitles from
	#[arg(required = true)]
	pub paths: Vec<PathBuf>,
}

impl Check for CommandSubtitles {
	fn check(&mut self) -> Result<(), crate::Error> {
		self.paths = resolve_paths(&self.paths)?;

		if let Some(out) = self.output_path.take() {
			self.output_path = Some(resolve_path(&out)?);
		}

		return Ok(());
	}
}

/// Remove stored records, if no flag is given everything is removed
#[derive(Debug, Parser, Clone, PartialEq)]
pub struct CommandClear {
	/// Remove the thumbnail progress of all media kinds
	#[arg(long = "progress")]
	pub progress:  bool,
	/// Remove the records of extracted subtitles
	#[arg(long = "subtitles")]
	pub subtitles: bool,
}

impl Check for CommandClear {
	fn check(&mut self) -> Result<(), crate::Error> {
		if !self.progress && !self.subtitles {
			self.progress = true;
			self.subtitles = true;
		}

		return Ok(());
	}
}

/// Generate shell completions for the given shell
#[derive(Debug, Parser, Clone, PartialEq)]
pub struct CommandCompletions {
	/// Write the completions to this file instead of STDOUT, the file must not exist yet
	#[arg(short = 'o', long = "out")]
	pub output_file_path: Option<PathBuf>,

	/// The shell to generate completions for
	#[arg(value_enum)]
	pub shell: Shell,
}

impl Check for CommandCompletions {
	fn check(&mut self) -> Result<(), crate::Error> {
		return Ok(());
	}
}

/// Resolve all `paths` with [resolve_path]
fn resolve_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, crate::Error> {
	return paths.iter().map(|v| return resolve_path(v)).collect();
}
