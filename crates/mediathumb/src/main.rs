#![allow(clippy::needless_return)]
#![warn(clippy::implicit_return)]

#[macro_use]
extern crate log;

use flexi_logger::LogSpecification;
use libmediathumb::Error;

mod clap_conf;
use clap_conf::*;
mod commands;
mod logger;
mod state;
mod utils;

/// Main
fn main() -> Result<(), crate::Error> {
	let mut logger_handle = logger::setup_logger()?;

	let cli_matches = CliDerive::custom_parse()?;

	log::info!("CLI Verbosity is {}", cli_matches.verbosity);

	// apply cli "verbosity" argument to the log level
	logger_handle.set_new_spec(match cli_matches.verbosity {
		0 => LogSpecification::warn(),
		1 => LogSpecification::info(),
		2 => LogSpecification::debug(),
		3 => LogSpecification::trace(),
		_ => {
			return Err(crate::Error::other(
				"Expected verbosity integer range between 0 and 3 (inclusive)",
			));
		},
	});

	colored::control::set_override(cli_matches.enable_colors());

	debug!(
		"Using cache directory \"{}\" and database \"{}\"",
		cli_matches.cache_dir().display(),
		cli_matches.db_path().display()
	);

	match &cli_matches.subcommands {
		SubCommands::Thumbnails(v) => commands::thumbnails::command_thumbnails(&cli_matches, v),
		SubCommands::Subtitles(v) => commands::subtitles::command_subtitles(&cli_matches, v),
		SubCommands::Clear(v) => commands::clear::command_clear(&cli_matches, v),
		SubCommands::Completions(v) => commands::completions::command_completions(&cli_matches, v),
	}?;

	return Ok(());
}
