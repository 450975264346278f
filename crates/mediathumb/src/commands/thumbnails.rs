use std::{
	sync::{
		Arc,
		LazyLock,
		atomic::{
			AtomicBool,
			AtomicUsize,
			Ordering,
		},
	},
	time::Duration,
};

use indicatif::{
	ProgressBar,
	ProgressStyle,
};
use libmediathumb::{
	data::{
		media_kind::{
			MediaKind,
			ThumbnailProfile,
		},
		memory_cache::{
			CacheSizes,
			Caches,
		},
		title::TitleSanitizer,
	},
	main::{
		job_queue::JobTier,
		progress_store::ProgressStore,
		sql_utils::shared_connect,
		thumbnail_engine::{
			EngineContext,
			EngineOptions,
			ThumbnailManager,
		},
	},
	spawn::runner::{
		ProcessRunner,
		SystemRunner,
	},
	utils::title_from_path,
};

use crate::{
	clap_conf::{
		CliDerive,
		CommandThumbnails,
	},
	utils,
};

/// How long to wait for the managers to become idle before checking for a termination signal again
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Handler function for the "thumbnails" subcommand
/// This function is mainly to keep the code structured and sorted
#[inline]
pub fn command_thumbnails(main_args: &CliDerive, sub_args: &CommandThumbnails) -> Result<(), crate::Error> {
	let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
	utils::require_tools_installed(runner.as_ref())?;

	let files = utils::find_media_files(&sub_args.paths, sub_args.kind);

	if files.is_empty() {
		println!("No media files found");
		return Ok(());
	}

	let connection = shared_connect(main_args.db_path())?;
	let thumbnail_root = main_args.thumbnail_root();
	let context = EngineContext {
		runner,
		caches: Caches::new(CacheSizes::default()),
		sanitizer: Arc::new(TitleSanitizer::new()),
	};
	let options = EngineOptions {
		job_timeout: sub_args.job_timeout.map(Duration::from_secs),
		run_secondary: !sub_args.no_secondary,
		..EngineOptions::default()
	};

	static THUMBNAIL_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
		return ProgressStyle::default_spinner()
			.template("[{elapsed_precise}] {spinner} {pos} thumbnails ready {wide_msg}")
			.expect("Expected ProgressStyle template to be valid");
	});

	let bar: ProgressBar = ProgressBar::hidden().with_style(THUMBNAIL_STYLE.clone());
	utils::set_progressbar(&bar, main_args);
	bar.enable_steady_tick(Duration::from_millis(200));

	let ready_count = Arc::new(AtomicUsize::new(0));
	let mut managers: Vec<Arc<ThumbnailManager>> = Vec::new();

	for kind in [MediaKind::Video, MediaKind::Music] {
		if !files.iter().any(|(_, v)| return *v == kind) {
			continue;
		}

		let progress = Arc::new(ProgressStore::new(connection.clone(), kind));
		let manager = Arc::new(ThumbnailManager::new(
			ThumbnailProfile::for_kind(kind),
			&thumbnail_root,
			options.clone(),
			context.clone(),
			progress,
		)?);

		let cb_bar = bar.clone();
		let cb_count = ready_count.clone();
		let interactive = main_args.is_interactive();
		manager.register_callback(move |ready| {
			cb_count.fetch_add(1, Ordering::Relaxed);
			cb_bar.inc(1);

			let name = ready
				.source_path
				.file_name()
				.map_or_else(|| return ready.source_path.to_string_lossy(), |v| return v.to_string_lossy());
			if interactive {
				cb_bar.set_message(name.to_string());
			} else {
				println!(
					"Thumbnail ready ({}x{}): \"{}\"",
					ready.image.width(),
					ready.image.height(),
					name
				);
			}
		});

		managers.push(manager);
	}

	let interrupted = Arc::new(AtomicBool::new(false));
	{
		let managers = managers.clone();
		let interrupted = interrupted.clone();
		ctrlc::set_handler(move || {
			if interrupted.swap(true, Ordering::SeqCst) {
				return;
			}

			warn!("Received termination signal, stopping all thumbnail jobs");
			for manager in &managers {
				manager.stop_all_processes();
			}
		})
		.map_err(|err| return crate::Error::other(format!("Could not set the termination handler: {err}")))?;
	}

	let mut queued = 0;
	for (path, kind) in &files {
		let Some(manager) = managers.iter().find(|v| return v.kind() == *kind) else {
			continue;
		};

		if manager.check_and_queue(path, &title_from_path(path)) {
			queued += 1;
		}
	}

	info!("Queued {} of {} media files", queued, files.len());
	for manager in &managers {
		debug!(
			"{} manager: {} priority jobs, {} secondary jobs",
			manager.kind(),
			manager.queued(JobTier::Priority),
			manager.queued(JobTier::Secondary)
		);
		manager.start()?;
	}

	while !managers.iter().all(|v| return v.wait_idle(IDLE_POLL)) {
		if interrupted.load(Ordering::SeqCst) {
			break;
		}
	}

	for manager in &managers {
		manager.shutdown()?;
	}

	bar.finish_and_clear();

	let ready = ready_count.load(Ordering::Relaxed);
	if interrupted.load(Ordering::SeqCst) {
		println!("Stopped after {ready} thumbnails, the remaining ones continue on the next run");
	} else {
		println!(
			"Finished {} media files, {} thumbnails generated, {} already up-to-date",
			files.len(),
			ready,
			files.len() - queued
		);
	}

	return Ok(());
}
