//! Module for the thumbnail generation engine
//!
//! One [ThumbnailManager] exists per [MediaKind], each with a single worker thread that runs one external process at a time.
//! Jobs are picked from the priority tier first, finished thumbnails are put into the kind's cache and announced via callbacks.

use std::{
	path::{
		Path,
		PathBuf,
	},
	sync::{
		Arc,
		Condvar,
		Mutex,
		MutexGuard,
		PoisonError,
		RwLock,
		atomic::{
			AtomicBool,
			Ordering,
		},
	},
	thread::JoinHandle,
	time::{
		Duration,
		Instant,
	},
};

use super::{
	job_queue::{
		JobQueue,
		JobTier,
		QueueEntry,
		needed_tier,
	},
	progress_store::ProgressStore,
};
use crate::{
	data::{
		media_kind::{
			MediaKind,
			PRIORITY_POSITION,
			SecondaryMode,
			ThumbnailProfile,
			TitlePaths,
			parse_frame_number,
		},
		memory_cache::{
			Caches,
			Thumbnail,
			ThumbnailCache,
		},
		title::TitleSanitizer,
	},
	error::{
		CustomThreadJoin,
		IOErrorToError,
	},
	spawn::{
		ffmpeg,
		ffprobe,
		runner::{
			ProcessHandle,
			ProcessRunner,
			ProcessStatus,
			stop_gracefully,
		},
	},
};

/// How long the worker waits for new jobs before checking the shutdown flag again
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// How long a process gets to exit after being asked to terminate
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Event emitted when a thumbnail has been generated
#[derive(Debug, Clone)]
pub struct ThumbnailReady {
	/// The media file the thumbnail is for
	pub source_path: PathBuf,
	/// The decoded priority thumbnail
	pub image:       Arc<Thumbnail>,
}

/// Callback for [ThumbnailReady], called on the worker thread
pub type ReadyCallback = Box<dyn Fn(&ThumbnailReady) + Send + Sync>;

/// States a single job goes through, reported through the logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
	Queued,
	Probing,
	Extracting,
	Finalizing,
	Done,
	Failed,
}

/// Options for a [ThumbnailManager]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
	/// Kill a job that runs longer than this, [`None`] lets jobs run unbounded
	pub job_timeout:       Option<Duration>,
	/// Whether to queue the secondary job (filmstrip / cover) once the priority thumbnail exists
	pub run_secondary:     bool,
	/// Interval in which a running filmstrip is checked for progress
	pub progress_interval: Duration,
	/// Interval in which a running process is checked for having exited
	pub poll_interval:     Duration,
}

impl Default for EngineOptions {
	fn default() -> Self {
		return Self {
			job_timeout:       None,
			run_secondary:     true,
			progress_interval: Duration::from_secs(5),
			poll_interval:     Duration::from_millis(100),
		};
	}
}

/// Shared handles a [ThumbnailManager] works with
#[derive(Clone)]
pub struct EngineContext {
	/// Runner for ffmpeg and ffprobe
	pub runner:    Arc<dyn ProcessRunner>,
	/// The caches, the manager uses the one for its kind
	pub caches:    Arc<Caches>,
	/// Shared title sanitizer
	pub sanitizer: Arc<TitleSanitizer>,
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
	Success,
	Failed,
	/// The process was taken away by [ThumbnailManager::stop_all_processes]
	Cancelled,
}

/// How a spawned process ended
enum ProcessEnd {
	/// The process exited, with the last lines of STDERR
	Exited(ProcessStatus, String),
	/// The process ran longer than [EngineOptions::job_timeout] and was stopped
	TimedOut,
	/// The process could not be spawned or waited on
	Errored(crate::Error),
	/// The process was taken away by [ThumbnailManager::stop_all_processes]
	Detached,
}

/// The process of the currently running job
struct RunningJob {
	sanitized_title: String,
	handle:          Box<dyn ProcessHandle>,
}

/// State shared between the callers and the worker, behind one lock
struct EngineState {
	queue:   JobQueue,
	running: Option<RunningJob>,
}

/// Everything the worker thread needs
struct EngineShared {
	profile:   ThumbnailProfile,
	options:   EngineOptions,
	/// Thumbnail root of this kind, containing one directory per sanitized title
	root:      PathBuf,
	runner:    Arc<dyn ProcessRunner>,
	progress:  Arc<ProgressStore>,
	cache:     Arc<ThumbnailCache>,
	sanitizer: Arc<TitleSanitizer>,
	state:     Mutex<EngineState>,
	/// Notified on every queue change and every finished job
	wakeup:    Condvar,
	shutdown:  AtomicBool,
	callbacks: RwLock<Vec<ReadyCallback>>,
}

/// Thumbnail generation engine for a single [MediaKind]
pub struct ThumbnailManager {
	shared: Arc<EngineShared>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThumbnailManager {
	/// Create a new manager that writes its outputs to `thumbnail_root/<kind>/<sanitized title>/`
	///
	/// The worker is not running until [Self::start] is called, jobs can already be queued.
	pub fn new(
		profile: ThumbnailProfile,
		thumbnail_root: &Path,
		options: EngineOptions,
		context: EngineContext,
		progress: Arc<ProgressStore>,
	) -> Result<Self, crate::Error> {
		if progress.kind() != profile.kind {
			return Err(crate::Error::other(format!(
				"ProgressStore for \"{}\" cannot be used for a \"{}\" ThumbnailManager",
				progress.kind(),
				profile.kind
			)));
		}

		let cache = context.caches.thumbnails(profile.kind).clone();

		return Ok(Self {
			shared: Arc::new(EngineShared {
				root: thumbnail_root.join(profile.kind.as_str()),
				profile,
				options,
				runner: context.runner,
				progress,
				cache,
				sanitizer: context.sanitizer,
				state: Mutex::new(EngineState {
					queue:   JobQueue::new(),
					running: None,
				}),
				wakeup: Condvar::new(),
				shutdown: AtomicBool::new(false),
				callbacks: RwLock::new(Vec::new()),
			}),
			worker: Mutex::new(None),
		});
	}

	/// Get the media kind this manager is for
	pub fn kind(&self) -> MediaKind {
		return self.shared.profile.kind;
	}

	/// Start the worker thread, does nothing if it is already running
	pub fn start(&self) -> Result<(), crate::Error> {
		let mut worker = self.worker.lock()?;

		if worker.is_some() {
			return Ok(());
		}

		let shared = self.shared.clone();
		let handle = std::thread::Builder::new()
			.name(format!("{} thumbnail worker", self.kind()))
			.spawn(move || {
				shared.worker_loop();
			})
			.attach_location_err("thumbnail worker spawn")?;

		*worker = Some(handle);

		return Ok(());
	}

	/// Register a callback that gets called for every [ThumbnailReady]
	pub fn register_callback<F>(&self, callback: F)
	where
		F: Fn(&ThumbnailReady) + Send + Sync + 'static,
	{
		self.shared
			.callbacks
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(Box::new(callback));
	}

	/// Queue the next missing job of `title`
	///
	/// A missing priority thumbnail is queued in the priority tier, otherwise a unfinished secondary job in the secondary tier.
	/// Returns `true` if something was queued.
	pub fn check_and_queue(&self, source_path: &Path, title: &str) -> bool {
		return self.shared.queue_job(source_path, title, None);
	}

	/// Get the priority thumbnail of `source_path`, from the cache or decoded from disk
	pub fn thumbnail_for(&self, source_path: &Path, title: &str) -> Option<Arc<Thumbnail>> {
		let sanitized = self.shared.sanitizer.sanitize(title);

		return self.shared.load_thumbnail(source_path, &sanitized);
	}

	/// Get the number of waiting jobs in `tier`
	pub fn queued(&self, tier: JobTier) -> usize {
		return self.shared.lock_state().queue.len_of(tier);
	}

	/// Wait until no job is waiting or running, or `timeout` passed
	/// Returns `true` if the manager is idle
	pub fn wait_idle(&self, timeout: Duration) -> bool {
		let started = Instant::now();
		let mut state = self.shared.lock_state();

		loop {
			if state.queue.is_idle() {
				return true;
			}

			let elapsed = started.elapsed();
			if elapsed >= timeout || self.shared.shutdown.load(Ordering::SeqCst) {
				return state.queue.is_idle();
			}

			state = self
				.shared
				.wakeup
				.wait_timeout(state, (timeout - elapsed).min(IDLE_WAIT))
				.unwrap_or_else(PoisonError::into_inner)
				.0;
		}
	}

	/// Stop the worker: clear all queues and terminate the running process
	///
	/// The running process is detached before it is stopped, so no completion handling runs for it.
	/// No new jobs are accepted afterwards.
	pub fn stop_all_processes(&self) {
		self.shared.shutdown.store(true, Ordering::SeqCst);

		let running = {
			let mut state = self.shared.lock_state();
			let removed = state.queue.clear();
			debug!("{} thumbnail manager stopping, removed {} queued jobs", self.kind(), removed);

			state.running.take()
		};

		self.shared.wakeup.notify_all();

		if let Some(mut running) = running {
			info!("Stopping running {} thumbnail job \"{}\"", self.kind(), running.sanitized_title);
			stop_gracefully(running.handle.as_mut(), TERMINATE_GRACE);
		}
	}

	/// Stop all processes and wait for the worker to exit
	pub fn shutdown(&self) -> Result<(), crate::Error> {
		self.stop_all_processes();

		let worker = self.worker.lock()?.take();

		if let Some(worker) = worker {
			worker.join_err()?;
		}

		return Ok(());
	}
}

impl Drop for ThumbnailManager {
	fn drop(&mut self) {
		if let Err(err) = self.shutdown() {
			warn!("{} thumbnail worker did not exit cleanly: {}", self.kind(), err);
		}
	}
}

impl EngineShared {
	/// Lock the state, it is always left consistent so a poisoned lock is recovered
	fn lock_state(&self) -> MutexGuard<'_, EngineState> {
		return self.state.lock().unwrap_or_else(PoisonError::into_inner);
	}

	/// Log a job state transition
	fn report(&self, entry: &QueueEntry, state: JobState) {
		debug!(
			"{} {} job \"{}\": {:?}",
			self.profile.kind, entry.tier, entry.sanitized_title, state
		);
	}

	/// Determine which tier `sanitized_title` still needs
	fn needed(&self, sanitized_title: &str) -> Option<JobTier> {
		let paths = TitlePaths::new(&self.root, sanitized_title);
		let secondary_done = !self.options.run_secondary || self.progress.is_done(sanitized_title);

		return needed_tier(paths.priority_thumbnail().exists(), secondary_done);
	}

	/// Queue the next missing job of `title`
	///
	/// When `finished` is set, that job's title is marked as not active anymore in the same critical section as the queueing.
	/// A failed job's tier is not queued again, its output is still missing so it would be re-queued forever.
	fn queue_job(&self, source_path: &Path, title: &str, finished: Option<(&QueueEntry, JobOutcome)>) -> bool {
		let sanitized = self.sanitizer.sanitize(title);
		let skip_tier = finished.and_then(|(entry, outcome)| {
			return (outcome != JobOutcome::Success).then_some(entry.tier);
		});
		let tier = self.needed(&sanitized).filter(|tier| return Some(*tier) != skip_tier);

		let queued = {
			let mut state = self.lock_state();

			if let Some((entry, _)) = finished {
				state.queue.finish(&entry.sanitized_title);
			}

			match tier {
				Some(tier) if !self.shutdown.load(Ordering::SeqCst) => {
					let entry = QueueEntry {
						source_path: source_path.to_owned(),
						title: title.to_owned(),
						sanitized_title: sanitized,
						tier,
					};
					self.report(&entry, JobState::Queued);

					state.queue.push(entry)
				},
				_ => false,
			}
		};

		self.wakeup.notify_all();

		return queued;
	}

	/// The worker thread, runs until shutdown
	fn worker_loop(&self) {
		debug!("{} thumbnail worker started", self.profile.kind);

		loop {
			let entry = {
				let mut state = self.lock_state();

				loop {
					if self.shutdown.load(Ordering::SeqCst) {
						debug!("{} thumbnail worker exiting", self.profile.kind);
						return;
					}
					if let Some(entry) = state.queue.next() {
						break entry;
					}

					state = self
						.wakeup
						.wait_timeout(state, IDLE_WAIT)
						.unwrap_or_else(PoisonError::into_inner)
						.0;
				}
			};

			let outcome = self.run_job(&entry);

			// promote a finished priority job to its secondary job
			self.queue_job(&entry.source_path, &entry.title, Some((&entry, outcome)));
		}
	}

	/// Run a single job to completion
	fn run_job(&self, entry: &QueueEntry) -> JobOutcome {
		let paths = TitlePaths::new(&self.root, &entry.sanitized_title);

		if let Err(err) = std::fs::create_dir_all(&paths.dir).attach_path_err(&paths.dir) {
			warn!("Could not create thumbnail directory: {}", err);
			self.report(entry, JobState::Failed);
			return JobOutcome::Failed;
		}

		self.progress.ensure(&entry.sanitized_title);

		let outcome = match entry.tier {
			JobTier::Priority => self.run_priority(entry, &paths),
			JobTier::Secondary => match self.profile.secondary {
				SecondaryMode::Filmstrip {
					interval,
					width,
					height,
				} => self.run_filmstrip(entry, &paths, interval, ffmpeg::crop_scale_filter(width, height)),
				SecondaryMode::Cover => self.run_cover(entry, &paths),
			},
		};

		match outcome {
			JobOutcome::Success => {
				self.report(entry, JobState::Done);
				info!(
					"Generated {} {} thumbnail for \"{}\"",
					self.profile.kind, entry.tier, entry.title
				);
			},
			JobOutcome::Failed => self.report(entry, JobState::Failed),
			JobOutcome::Cancelled => debug!("{} job \"{}\" cancelled", entry.tier, entry.sanitized_title),
		}

		return outcome;
	}

	/// Generate the single priority thumbnail
	fn run_priority(&self, entry: &QueueEntry, paths: &TitlePaths) -> JobOutcome {
		let output = paths.priority_thumbnail();

		let seek = if self.profile.priority_seek {
			self.report(entry, JobState::Probing);
			let duration = ffprobe::probe_duration(self.runner.as_ref(), &entry.source_path);

			Some(duration * PRIORITY_POSITION)
		} else {
			None
		};

		self.report(entry, JobState::Extracting);
		let cmd = ffmpeg::single_frame_cmd(
			&entry.source_path,
			&output,
			seek,
			&ffmpeg::crop_scale_filter(self.profile.width, self.profile.height),
		);

		let end = self.run_process(entry, cmd, || {});

		let outcome = self.check_end(entry, end);
		if outcome != JobOutcome::Success {
			remove_partial(&output);
			return outcome;
		}

		self.report(entry, JobState::Finalizing);

		let image = match Thumbnail::load(&output) {
			Ok(v) => Arc::new(v),
			Err(err) => {
				warn!("Could not decode generated thumbnail \"{}\": {}", output.display(), err);
				remove_partial(&output);
				return JobOutcome::Failed;
			},
		};

		// only flag a thumbnail that is known to decode
		if let Err(err) = write_flag(&paths.priority_done_flag()) {
			warn!("{}", err);
		}

		self.cache.insert(entry.source_path.clone(), image.clone(), image.cost());
		self.emit(&ThumbnailReady {
			source_path: entry.source_path.clone(),
			image,
		});

		return JobOutcome::Success;
	}

	/// Generate (or resume) the filmstrip of a video
	fn run_filmstrip(&self, entry: &QueueEntry, paths: &TitlePaths, interval: u32, filter: String) -> JobOutcome {
		let title = &entry.sanitized_title;

		self.report(entry, JobState::Probing);
		let duration = ffprobe::probe_duration(self.runner.as_ref(), &entry.source_path);

		// "last_index" is at least "-1", so this is at least "0"
		let start_number = u32::try_from(self.progress.last_index(title) + 1).unwrap_or(0);
		debug!(
			"Filmstrip for \"{}\" starts at frame {} ({}s of {:.0}s)",
			title,
			start_number,
			u64::from(start_number) * u64::from(interval),
			duration
		);

		self.report(entry, JobState::Extracting);
		let cmd = ffmpeg::filmstrip_cmd(&entry.source_path, &paths.dir, start_number, interval, &filter);

		let end = self.run_process(entry, cmd, || {
			self.checkpoint(title, &paths.dir);
		});

		// keep the frames that were produced, even on failure
		let last_frame = self.checkpoint(title, &paths.dir);

		let outcome = self.check_end(entry, end);
		if outcome != JobOutcome::Success {
			return outcome;
		}

		self.report(entry, JobState::Finalizing);

		if let Err(err) = write_flag(&paths.secondary_done_flag(&self.profile)) {
			warn!("{}", err);
		}
		self.progress.mark_done(title, last_frame);
		self.emit_existing(entry, paths);

		return JobOutcome::Success;
	}

	/// Extract the embedded cover art
	fn run_cover(&self, entry: &QueueEntry, paths: &TitlePaths) -> JobOutcome {
		let output = paths.cover();

		self.report(entry, JobState::Extracting);
		let end = self.run_process(entry, ffmpeg::cover_cmd(&entry.source_path, &output), || {});

		let outcome = self.check_end(entry, end);
		if outcome != JobOutcome::Success {
			remove_partial(&output);
			return outcome;
		}

		self.report(entry, JobState::Finalizing);

		if let Err(err) = write_flag(&paths.secondary_done_flag(&self.profile)) {
			warn!("{}", err);
		}
		self.progress.mark_done(&entry.sanitized_title, None);
		self.emit_existing(entry, paths);

		return JobOutcome::Success;
	}

	/// Map a [ProcessEnd] to the outcome of the job, logging why it is not successful
	fn check_end(&self, entry: &QueueEntry, end: ProcessEnd) -> JobOutcome {
		return match end {
			ProcessEnd::Exited(status, _) if status.success() => JobOutcome::Success,
			ProcessEnd::Exited(status, last_lines) => {
				warn!(
					"{} {} job for \"{}\" failed: {}",
					self.profile.kind,
					entry.tier,
					entry.title,
					ffmpeg::unsuccessfull_command_exit(status, &last_lines)
				);
				JobOutcome::Failed
			},
			ProcessEnd::TimedOut => {
				warn!(
					"{} {} job for \"{}\" took longer than {:?}, killed",
					self.profile.kind,
					entry.tier,
					entry.title,
					self.options.job_timeout.unwrap_or_default()
				);
				JobOutcome::Failed
			},
			ProcessEnd::Errored(err) => {
				warn!(
					"{} {} job for \"{}\" could not be run: {}",
					self.profile.kind, entry.tier, entry.title, err
				);
				JobOutcome::Failed
			},
			ProcessEnd::Detached => JobOutcome::Cancelled,
		};
	}

	/// Spawn `cmd` and wait for it to end, calling `on_progress` every [EngineOptions::progress_interval]
	///
	/// The handle is stored in the state while running, so [ThumbnailManager::stop_all_processes] can take it away.
	/// The lock is only held for the non-blocking checks, never while waiting.
	fn run_process<F: FnMut()>(&self, entry: &QueueEntry, cmd: std::process::Command, mut on_progress: F) -> ProcessEnd {
		let mut handle = match self.runner.spawn(cmd) {
			Ok(v) => v,
			Err(err) => return ProcessEnd::Errored(err),
		};

		{
			let mut state = self.lock_state();

			// "stop_all_processes" was called while spawning
			if self.shutdown.load(Ordering::SeqCst) {
				drop(state);
				stop_gracefully(handle.as_mut(), TERMINATE_GRACE);
				return ProcessEnd::Detached;
			}

			state.running = Some(RunningJob {
				sanitized_title: entry.sanitized_title.clone(),
				handle,
			});
		}

		let started = Instant::now();
		let mut last_progress = Instant::now();

		loop {
			let polled = {
				let mut state = self.lock_state();
				let Some(running) = state.running.as_mut() else {
					return ProcessEnd::Detached;
				};

				running.handle.try_wait()
			};

			match polled {
				Ok(Some(status)) => {
					let Some(running) = self.lock_state().running.take() else {
						return ProcessEnd::Detached;
					};

					return ProcessEnd::Exited(status, running.handle.last_stderr());
				},
				Ok(None) => (),
				Err(err) => {
					let running = self.lock_state().running.take();
					if let Some(mut running) = running {
						stop_gracefully(running.handle.as_mut(), TERMINATE_GRACE);
					}

					return ProcessEnd::Errored(err);
				},
			}

			if self.options.job_timeout.is_some_and(|v| return started.elapsed() >= v) {
				let running = self.lock_state().running.take();

				return match running {
					Some(mut running) => {
						stop_gracefully(running.handle.as_mut(), TERMINATE_GRACE);
						ProcessEnd::TimedOut
					},
					None => ProcessEnd::Detached,
				};
			}

			if last_progress.elapsed() >= self.options.progress_interval {
				on_progress();
				last_progress = Instant::now();
			}

			std::thread::sleep(self.options.poll_interval);
		}
	}

	/// Scan the filmstrip directory and persist the highest frame number
	fn checkpoint(&self, sanitized_title: &str, dir: &Path) -> Option<i32> {
		let last_frame = i32::try_from(scan_last_frame(dir)?).ok()?;

		if self.progress.update_last_index(sanitized_title, last_frame) {
			trace!("Filmstrip \"{}\" progressed to frame {}", sanitized_title, last_frame);
		}

		return Some(last_frame);
	}

	/// Get the priority thumbnail from the cache, or decode it from disk into the cache
	fn load_thumbnail(&self, source_path: &Path, sanitized_title: &str) -> Option<Arc<Thumbnail>> {
		if let Some(found) = self.cache.get(&source_path.to_path_buf()) {
			return Some(found);
		}

		let path = TitlePaths::new(&self.root, sanitized_title).priority_thumbnail();
		if !path.exists() {
			return None;
		}

		let image = match Thumbnail::load(&path) {
			Ok(v) => Arc::new(v),
			Err(err) => {
				warn!("Could not decode thumbnail \"{}\": {}", path.display(), err);
				return None;
			},
		};

		self.cache.insert(source_path.to_owned(), image.clone(), image.cost());

		return Some(image);
	}

	/// Emit a [ThumbnailReady] for a finished secondary job, if the priority thumbnail exists
	fn emit_existing(&self, entry: &QueueEntry, paths: &TitlePaths) {
		let Some(image) = self.load_thumbnail(&entry.source_path, &entry.sanitized_title) else {
			trace!("No priority thumbnail in \"{}\" to announce", paths.dir.display());
			return;
		};

		self.emit(&ThumbnailReady {
			source_path: entry.source_path.clone(),
			image,
		});
	}

	/// Call all registered callbacks with `event`
	fn emit(&self, event: &ThumbnailReady) {
		let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);

		for callback in callbacks.iter() {
			callback(event);
		}
	}
}

/// Find the highest frame number in a filmstrip directory
fn scan_last_frame(dir: &Path) -> Option<u32> {
	let entries = match std::fs::read_dir(dir) {
		Ok(v) => v,
		Err(err) => {
			debug!("Could not scan \"{}\": {}", dir.display(), err);
			return None;
		},
	};

	return entries
		.filter_map(Result::ok)
		.filter_map(|v| return v.file_name().to_str().and_then(parse_frame_number))
		.max();
}

/// Write a empty flag file
fn write_flag(path: &Path) -> Result<(), crate::Error> {
	return std::fs::write(path, b"").attach_path_err(path);
}

/// Remove a possibly partially written output, so it is not mistaken for a finished one
fn remove_partial(path: &Path) {
	match std::fs::remove_file(path) {
		Ok(()) => trace!("Removed partial output \"{}\"", path.display()),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
		Err(err) => warn!("Could not remove partial output \"{}\": {}", path.display(), err),
	}
}
