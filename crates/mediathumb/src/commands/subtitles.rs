use std::{
	sync::{
		Arc,
		LazyLock,
	},
	time::Duration,
};

use colored::Colorize;
use indicatif::{
	ProgressBar,
	ProgressStyle,
};
use libmediathumb::{
	main::{
		sql_utils::shared_connect,
		subtitles::{
			SubtitleExtractor,
			SubtitleStore,
		},
	},
	spawn::runner::{
		ProcessRunner,
		SystemRunner,
	},
};

use crate::{
	clap_conf::{
		CliDerive,
		CommandSubtitles,
	},
	state::SubtitleState,
	utils,
};

/// Handler function for the "subtitles" subcommand
/// This function is mainly to keep the code structured and sorted
#[inline]
pub fn command_subtitles(main_args: &CliDerive, sub_args: &CommandSubtitles) -> Result<(), crate::Error> {
	let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
	utils::require_tools_installed(runner.as_ref())?;

	let output_dir = sub_args
		.output_path
		.clone()
		.unwrap_or_else(|| return main_args.cache_dir().join("subtitles"));
	let max_workers = match sub_args.workers {
		Some(v) => Some(
			usize::try_from(v).map_err(|_| return crate::Error::other(format!("Worker count {v} is too large")))?,
		),
		None => None,
	};

	let state = SubtitleState::new(sub_args.paths.clone(), output_dir.clone(), max_workers);
	let connection = shared_connect(main_args.db_path())?;
	let extractor = SubtitleExtractor::new(runner, SubtitleStore::new(connection));

	println!("Extracting subtitles to \"{}\"", output_dir.to_string_lossy());

	static SUBTITLE_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
		return ProgressStyle::default_spinner()
			.template("[{elapsed_precise}] {spinner} {msg}")
			.expect("Expected ProgressStyle template to be valid");
	});

	let bar: ProgressBar = ProgressBar::hidden().with_style(SUBTITLE_STYLE.clone());
	utils::set_progressbar(&bar, main_args);
	bar.set_message("Extracting subtitles");
	bar.enable_steady_tick(Duration::from_millis(200));

	let summary = extractor.extract_subtitles_from_videos(&state);
	bar.finish_and_clear();
	let summary = summary?;

	let failed = format!("{} streams failed", summary.failed);
	println!(
		"Found {} videos ({} already done), processed {}: {} streams extracted, {}",
		summary.scanned,
		summary.skipped,
		summary.processed,
		summary.extracted,
		if summary.failed > 0 { failed.red() } else { failed.normal() }
	);

	return Ok(());
}
