use libmediathumb::{
	data::media_kind::MediaKind,
	main::{
		progress_store::ProgressStore,
		sql_utils::shared_connect,
		subtitles::SubtitleStore,
	},
};

use crate::clap_conf::{
	CliDerive,
	CommandClear,
};

/// Handler function for the "clear" subcommand
/// This function is mainly to keep the code structured and sorted
#[inline]
pub fn command_clear(main_args: &CliDerive, sub_args: &CommandClear) -> Result<(), crate::Error> {
	let connection = shared_connect(main_args.db_path())?;

	if sub_args.progress {
		for kind in [MediaKind::Video, MediaKind::Music] {
			let store = ProgressStore::new(connection.clone(), kind);
			let count = store.records().len();
			store.clear()?;

			println!("Removed {count} {kind} thumbnail progress records");
		}
	}

	if sub_args.subtitles {
		let removed = SubtitleStore::new(connection).clear()?;

		println!("Removed {removed} subtitle records");
	}

	return Ok(());
}
