//! Module for extracting the subtitle streams of videos
//!
//! Unlike the thumbnail generation, every video is processed independently, so videos are processed in parallel.
//! Only the calling thread writes to the database, after all workers are done.

use std::{
	collections::HashSet,
	path::{
		Path,
		PathBuf,
	},
	sync::{
		Arc,
		Mutex,
		PoisonError,
	},
};

use diesel::prelude::*;
use rayon::prelude::*;

use super::sql_utils::SharedConnection;
use crate::{
	data::{
		sql_models::SubtitleRow,
		sql_schema::subtitles,
		title::sanitize_title,
	},
	error::IOErrorToError,
	spawn::{
		ffmpeg::{
			self,
			SubtitleCodecArg,
		},
		ffprobe::{
			self,
			SubtitleStream,
		},
		runner::ProcessRunner,
	},
	traits::subtitle_options::SubtitleOptions,
	utils::{
		find_files,
		is_video_file,
		title_from_path,
	},
};

/// Subtitle codecs which are text based and can be converted to srt
pub const TEXT_CODECS: &[&str] = &["subrip", "srt", "ass", "ssa", "mov_text", "webvtt", "text"];
/// Subtitle codec which is bitmap based and only can be copied as is
pub const PGS_CODEC: &str = "hdmv_pgs_subtitle";

/// How a subtitle stream gets extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
	/// Converted to ".srt"
	Srt,
	/// Copied to ".sup"
	Sup,
}

impl SubtitleFormat {
	/// Get the format for `codec_name`, [`None`] if the codec is not supported
	#[must_use]
	pub fn for_codec(codec_name: &str) -> Option<Self> {
		if TEXT_CODECS.contains(&codec_name) {
			return Some(Self::Srt);
		}
		if codec_name == PGS_CODEC {
			return Some(Self::Sup);
		}

		return None;
	}

	/// Get the file extension of the output
	#[must_use]
	pub fn extension(self) -> &'static str {
		return match self {
			Self::Srt => "srt",
			Self::Sup => "sup",
		};
	}

	fn codec_arg(self) -> SubtitleCodecArg {
		return match self {
			Self::Srt => SubtitleCodecArg::Srt,
			Self::Sup => SubtitleCodecArg::Copy,
		};
	}
}

/// A extracted subtitle stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleRecord {
	/// The video the stream was extracted from
	pub video_path:   PathBuf,
	/// The absolute stream index in the video
	pub stream_index: u32,
	/// The language tag of the stream
	pub language:     String,
	/// The codec of the stream
	pub codec:        String,
	/// The extracted ".srt", if it was a text subtitle
	pub srt_path:     Option<PathBuf>,
	/// The extracted ".sup", if it was a bitmap subtitle
	pub sup_path:     Option<PathBuf>,
}

impl SubtitleRecord {
	fn to_row(&self) -> SubtitleRow {
		return SubtitleRow {
			video_path: path_key(&self.video_path),
			index_sub:  i32::try_from(self.stream_index).unwrap_or(i32::MAX),
			language:   self.language.clone(),
			codec:      self.codec.clone(),
			srt_path:   self.srt_path.as_ref().map(|v| return v.to_string_lossy().to_string()),
			sup_path:   self.sup_path.as_ref().map(|v| return v.to_string_lossy().to_string()),
		};
	}

	fn from_row(row: SubtitleRow) -> Self {
		return Self {
			video_path:   PathBuf::from(row.video_path),
			stream_index: u32::try_from(row.index_sub).unwrap_or_default(),
			language:     row.language,
			codec:        row.codec,
			srt_path:     row.srt_path.map(PathBuf::from),
			sup_path:     row.sup_path.map(PathBuf::from),
		};
	}
}

/// The key a video path is stored with
fn path_key(path: &Path) -> String {
	return path.to_string_lossy().to_string();
}

/// Persistent store of extracted subtitles
#[derive(Clone)]
pub struct SubtitleStore {
	connection: SharedConnection,
}

// manual implementation, because "SqliteConnection" does not implement "Debug"
impl std::fmt::Debug for SubtitleStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return f.debug_struct("SubtitleStore").finish_non_exhaustive();
	}
}

impl SubtitleStore {
	/// Create a new store on `connection`
	pub fn new(connection: SharedConnection) -> Self {
		return Self { connection };
	}

	/// Write all `records` with "REPLACE INTO" inside a single transaction
	pub fn save(&self, records: &[SubtitleRecord]) -> Result<(), crate::Error> {
		let rows: Vec<SubtitleRow> = records.iter().map(SubtitleRecord::to_row).collect();
		let mut connection = self.connection.lock()?;

		connection.transaction::<_, diesel::result::Error, _>(|conn| {
			for row in &rows {
				diesel::replace_into(subtitles::table).values(row).execute(conn)?;
			}

			return Ok(());
		})?;

		return Ok(());
	}

	/// Get whether `video_path` has at least one extracted subtitle stored
	pub fn has_video(&self, video_path: &Path) -> Result<bool, crate::Error> {
		let mut connection = self.connection.lock()?;

		let count: i64 = subtitles::table
			.filter(subtitles::video_path.eq(path_key(video_path)))
			.filter(subtitles::srt_path.is_not_null().or(subtitles::sup_path.is_not_null()))
			.count()
			.get_result(&mut *connection)?;

		return Ok(count > 0);
	}

	/// Get all stored records of `video_path`, ordered by stream index
	pub fn records_for(&self, video_path: &Path) -> Result<Vec<SubtitleRecord>, crate::Error> {
		let mut connection = self.connection.lock()?;

		let rows: Vec<SubtitleRow> = subtitles::table
			.filter(subtitles::video_path.eq(path_key(video_path)))
			.order(subtitles::index_sub.asc())
			.select(SubtitleRow::as_select())
			.load(&mut *connection)?;

		return Ok(rows.into_iter().map(SubtitleRecord::from_row).collect());
	}

	/// Remove all records, returns how many were removed
	pub fn clear(&self) -> Result<usize, crate::Error> {
		let mut connection = self.connection.lock()?;

		return Ok(diesel::delete(subtitles::table).execute(&mut *connection)?);
	}
}

/// Counts of a [SubtitleExtractor::extract_subtitles_from_videos] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtitleRunSummary {
	/// Video files found in the media folders
	pub scanned:   usize,
	/// Video files skipped, because their subtitles were already extracted
	pub skipped:   usize,
	/// Video files that were processed
	pub processed: usize,
	/// Subtitle streams successfully extracted
	pub extracted: usize,
	/// Subtitle streams that failed to extract
	pub failed:    usize,
}

/// Result of processing a single video
#[derive(Debug, Default)]
struct VideoResult {
	records: Vec<SubtitleRecord>,
	failed:  usize,
}

/// Batch extractor for the subtitles of all videos in some folders
pub struct SubtitleExtractor {
	runner: Arc<dyn ProcessRunner>,
	store:  SubtitleStore,
	/// Videos known to have extracted subtitles, checked before the store
	known:  Mutex<HashSet<PathBuf>>,
}

impl SubtitleExtractor {
	/// Create a new extractor
	pub fn new(runner: Arc<dyn ProcessRunner>, store: SubtitleStore) -> Self {
		return Self {
			runner,
			store,
			known: Mutex::new(HashSet::new()),
		};
	}

	/// Get the store the extractor writes to
	pub fn store(&self) -> &SubtitleStore {
		return &self.store;
	}

	/// Get whether the subtitles of `video_path` have already been extracted
	///
	/// The in-memory set is checked first, a hit in the store is added to it.
	pub fn subtitle_exists_in_db(&self, video_path: &Path) -> bool {
		if self
			.known
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.contains(video_path)
		{
			return true;
		}

		return match self.store.has_video(video_path) {
			Ok(true) => {
				self.mark_known(video_path.to_owned());
				true
			},
			Ok(false) => false,
			Err(err) => {
				warn!("Could not check stored subtitles of \"{}\": {}", video_path.display(), err);
				false
			},
		};
	}

	fn mark_known(&self, video_path: PathBuf) {
		self.known
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(video_path);
	}

	/// Extract the subtitles of all videos in the media folders that have not been extracted yet
	///
	/// Failing streams are only counted, errors are only returned for the setup (like the output directory or the worker pool).
	pub fn extract_subtitles_from_videos<O: SubtitleOptions>(&self, options: &O) -> Result<SubtitleRunSummary, crate::Error> {
		let output_dir = options.output_dir();
		std::fs::create_dir_all(output_dir).attach_path_err(output_dir)?;

		let mut summary = SubtitleRunSummary::default();
		let mut videos = Vec::new();

		for video in find_files(&options.media_folders(), is_video_file) {
			summary.scanned += 1;

			if self.subtitle_exists_in_db(&video) {
				trace!("Skipping \"{}\", subtitles already extracted", video.display());
				summary.skipped += 1;
				continue;
			}

			videos.push(video);
		}

		let workers = options
			.max_workers()
			.filter(|v| return *v > 0)
			.unwrap_or_else(|| return std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get));

		info!(
			"Extracting subtitles of {} videos ({} skipped) with {} workers",
			videos.len(),
			summary.skipped,
			workers
		);

		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(workers)
			.thread_name(|i| return format!("subtitle worker {i}"))
			.build()
			.map_err(|err| return crate::Error::other(format!("Could not create subtitle worker pool: {err}")))?;

		let results: Vec<(PathBuf, VideoResult)> = pool.install(|| {
			return videos
				.into_par_iter()
				.map(|video| {
					let result = self.process_video(&video, output_dir);
					return (video, result);
				})
				.collect();
		});

		let mut records = Vec::new();
		for (video, result) in results {
			summary.processed += 1;
			summary.extracted += result.records.len();
			summary.failed += result.failed;

			if !result.records.is_empty() {
				self.mark_known(video);
			}
			records.extend(result.records);
		}

		if let Err(err) = self.store.save(&records) {
			warn!("Could not save {} subtitle records: {}", records.len(), err);
		}

		return Ok(summary);
	}

	/// Probe and extract every supported subtitle stream of `video`
	fn process_video(&self, video: &Path, output_dir: &Path) -> VideoResult {
		let mut result = VideoResult::default();
		let streams = ffprobe::probe_subtitle_streams(self.runner.as_ref(), video);

		debug!("Found {} subtitle streams in \"{}\"", streams.len(), video.display());

		for stream in streams {
			let Some(format) = SubtitleFormat::for_codec(&stream.codec_name) else {
				debug!(
					"Skipping unsupported subtitle codec \"{}\" (stream {}) in \"{}\"",
					stream.codec_name,
					stream.index,
					video.display()
				);
				continue;
			};

			match self.extract_stream(video, &stream, format, output_dir) {
				Ok(record) => result.records.push(record),
				Err(err) => {
					warn!(
						"Extracting subtitle stream {} of \"{}\" failed: {}",
						stream.index,
						video.display(),
						err
					);
					result.failed += 1;
				},
			}
		}

		return result;
	}

	/// Extract a single subtitle stream
	fn extract_stream(
		&self,
		video: &Path,
		stream: &SubtitleStream,
		format: SubtitleFormat,
		output_dir: &Path,
	) -> Result<SubtitleRecord, crate::Error> {
		let output = subtitle_output_path(output_dir, video, stream, format);
		let cmd = ffmpeg::subtitle_cmd(video, stream.index, format.codec_arg(), &output);

		let command_output = self.runner.output(cmd)?;

		if !command_output.status.success() {
			let stderr = String::from_utf8_lossy(&command_output.stderr);
			return Err(ffmpeg::unsuccessfull_command_exit(command_output.status, stderr.trim()));
		}

		let (srt_path, sup_path) = match format {
			SubtitleFormat::Srt => (Some(output), None),
			SubtitleFormat::Sup => (None, Some(output)),
		};

		return Ok(SubtitleRecord {
			video_path: video.to_owned(),
			stream_index: stream.index,
			language: stream.language.clone(),
			codec: stream.codec_name.clone(),
			srt_path,
			sup_path,
		});
	}
}

/// Length of the video path hash in subtitle file names
const DISCRIMINATOR_LEN: usize = 8;

/// Get a short stable hash of the full `video` path
///
/// Videos with the same file name in different directories share one output directory, this keeps their subtitles apart.
fn video_discriminator(video: &Path) -> String {
	let hash = blake3::hash(video.as_os_str().as_encoded_bytes());

	return hash.to_hex().as_str()[..DISCRIMINATOR_LEN].to_owned();
}

/// Get the output path for a subtitle stream: `<output_dir>/<video name>.<path hash>.<stream index>.<language>.<extension>`
fn subtitle_output_path(output_dir: &Path, video: &Path, stream: &SubtitleStream, format: SubtitleFormat) -> PathBuf {
	return output_dir.join(format!(
		"{}.{}.{}.{}.{}",
		sanitize_title(&title_from_path(video)),
		video_discriminator(video),
		stream.index,
		sanitize_title(&stream.language),
		format.extension()
	));
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		main::sql_utils::test_utils::create_connection,
		spawn::runner::{
			ProcessOutput,
			ProcessStatus,
			test_utils::{
				FakeRunner,
				SpawnedCommand,
				stdout_output,
			},
		},
	};

	const PROBE_JSON: &str = r#"{
	"streams": [
		{ "index": 2, "codec_name": "subrip", "tags": { "language": "eng" } },
		{ "index": 3, "codec_name": "hdmv_pgs_subtitle", "tags": { "language": "fre" } },
		{ "index": 4, "codec_name": "dvb_subtitle", "tags": { "language": "ger" } }
	]
}"#;

	struct TestOptions {
		folders: Vec<PathBuf>,
		output:  PathBuf,
		workers: Option<usize>,
	}

	impl SubtitleOptions for TestOptions {
		fn media_folders(&self) -> Vec<&Path> {
			return self.folders.iter().map(PathBuf::as_path).collect();
		}

		fn output_dir(&self) -> &Path {
			return &self.output;
		}

		fn max_workers(&self) -> Option<usize> {
			return self.workers;
		}
	}

	fn is_probe(cmd: &SpawnedCommand) -> bool {
		return cmd.arg_after("-select_streams").is_some();
	}

	/// Fake runner that answers probes with [PROBE_JSON] and fails extraction of streams in `failing`
	fn fake_runner(failing: &'static [&'static str]) -> FakeRunner {
		return FakeRunner::new(
			|_| return 0,
			move |cmd| {
				if is_probe(cmd) {
					return stdout_output(PROBE_JSON);
				}

				let map = cmd.arg_after("-map").unwrap_or_default();
				let code = if failing.contains(&map.as_str()) { 1 } else { 0 };

				return ProcessOutput {
					status: ProcessStatus::from_code(Some(code)),
					stdout: Vec::new(),
					stderr: b"some error".to_vec(),
				};
			},
		);
	}

	fn setup_media(names: &[&str]) -> (tempfile::TempDir, TestOptions) {
		let dir = tempfile::Builder::new()
			.prefix("mediathumb-test-subtitles-")
			.tempdir()
			.expect("Expected a temp dir to be created");
		let media = dir.path().join("media");
		std::fs::create_dir_all(media.join("nested")).expect("Expected dir to be created");

		for name in names {
			std::fs::write(media.join(name), b"").expect("Expected file to be written");
		}

		let options = TestOptions {
			folders: vec![media],
			output:  dir.path().join("subs"),
			workers: Some(2),
		};

		return (dir, options);
	}

	#[test]
	fn test_for_codec() {
		assert_eq!(Some(SubtitleFormat::Srt), SubtitleFormat::for_codec("subrip"));
		assert_eq!(Some(SubtitleFormat::Srt), SubtitleFormat::for_codec("mov_text"));
		assert_eq!(Some(SubtitleFormat::Sup), SubtitleFormat::for_codec("hdmv_pgs_subtitle"));
		assert_eq!(None, SubtitleFormat::for_codec("dvb_subtitle"));
	}

	fn eng_stream() -> SubtitleStream {
		return SubtitleStream {
			index:      2,
			codec_name: "subrip".to_owned(),
			language:   "eng".to_owned(),
		};
	}

	#[test]
	fn test_output_path() {
		let video = Path::new("/media/Movie: Part 1.mkv");
		let hash = video_discriminator(video);

		assert_eq!(DISCRIMINATOR_LEN, hash.len());
		assert!(hash.bytes().all(|v| return v.is_ascii_hexdigit()));
		// stable across calls
		assert_eq!(hash, video_discriminator(video));

		assert_eq!(
			Path::new("/subs").join(format!("Movie- Part 1.{hash}.2.eng.srt")),
			subtitle_output_path(Path::new("/subs"), video, &eng_stream(), SubtitleFormat::Srt)
		);
	}

	#[test]
	fn test_output_path_same_file_name() {
		let output = Path::new("/subs");
		let first = subtitle_output_path(output, Path::new("/media/ep.mkv"), &eng_stream(), SubtitleFormat::Srt);
		let second = subtitle_output_path(
			output,
			Path::new("/media/nested/ep.mkv"),
			&eng_stream(),
			SubtitleFormat::Srt,
		);

		assert_ne!(first, second);
		assert_eq!(Some(output), first.parent());
		assert_eq!(Some(output), second.parent());
	}

	#[test]
	fn test_extract() {
		let (_dir, connection) = create_connection();
		let (_media, options) = setup_media(&["a.mkv", "nested/b.mkv", "c.flac"]);
		let runner = fake_runner(&[]).into_arc();
		let extractor = SubtitleExtractor::new(runner.clone(), SubtitleStore::new(connection));

		let summary = extractor
			.extract_subtitles_from_videos(&options)
			.expect("Expected extraction to run");

		assert_eq!(
			SubtitleRunSummary {
				scanned:   2,
				skipped:   0,
				processed: 2,
				extracted: 4,
				failed:    0,
			},
			summary
		);

		let video = options.folders[0].join("a.mkv");
		let hash = video_discriminator(&video);
		let records = extractor.store().records_for(&video).expect("Expected records to load");
		assert_eq!(2, records.len());
		assert_eq!(Some(options.output.join(format!("a.{hash}.2.eng.srt"))), records[0].srt_path);
		assert_eq!(None, records[0].sup_path);
		assert_eq!(Some(options.output.join(format!("a.{hash}.3.fre.sup"))), records[1].sup_path);
		assert_eq!("hdmv_pgs_subtitle", records[1].codec);

		// the pgs stream is copied, the text stream converted
		let outputs = runner.outputs.lock().expect("Expected lock to not be poisoned");
		let codecs: HashSet<String> = outputs
			.iter()
			.filter(|v| return !is_probe(v))
			.filter_map(|v| return v.arg_after("-c:s"))
			.collect();
		assert_eq!(HashSet::from(["srt".to_owned(), "copy".to_owned()]), codecs);
	}

	#[test]
	fn test_extract_same_file_name() {
		let (_dir, connection) = create_connection();
		let (_media, options) = setup_media(&["ep.mkv", "nested/ep.mkv"]);
		let runner = fake_runner(&[]).into_arc();
		let extractor = SubtitleExtractor::new(runner.clone(), SubtitleStore::new(connection));

		let summary = extractor
			.extract_subtitles_from_videos(&options)
			.expect("Expected extraction to run");
		assert_eq!(4, summary.extracted);

		let top = extractor
			.store()
			.records_for(&options.folders[0].join("ep.mkv"))
			.expect("Expected records to load");
		let nested = extractor
			.store()
			.records_for(&options.folders[0].join("nested/ep.mkv"))
			.expect("Expected records to load");
		assert_eq!(2, top.len());
		assert_eq!(2, nested.len());
		assert_ne!(top[0].srt_path, nested[0].srt_path);
		assert_ne!(top[1].sup_path, nested[1].sup_path);

		// every extraction wrote to its own file
		let outputs = runner.outputs.lock().expect("Expected lock to not be poisoned");
		let written: HashSet<PathBuf> = outputs
			.iter()
			.filter(|v| return !is_probe(v))
			.map(SpawnedCommand::output_path)
			.collect();
		assert_eq!(4, written.len());
	}

	#[test]
	fn test_debug_skips_connection() {
		let (_dir, connection) = create_connection();

		assert_eq!("SubtitleStore { .. }", format!("{:?}", SubtitleStore::new(connection)));
	}

	#[test]
	fn test_failed_stream_does_not_abort() {
		let (_dir, connection) = create_connection();
		let (_media, options) = setup_media(&["a.mkv"]);
		let extractor = SubtitleExtractor::new(fake_runner(&["0:2"]).into_arc(), SubtitleStore::new(connection));

		let summary = extractor
			.extract_subtitles_from_videos(&options)
			.expect("Expected extraction to run");

		assert_eq!(1, summary.extracted);
		assert_eq!(1, summary.failed);
	}

	#[test]
	fn test_skip_already_extracted() {
		let (_dir, connection) = create_connection();
		let (_media, options) = setup_media(&["a.mkv", "b.mkv"]);
		let video = options.folders[0].join("a.mkv");

		// a previous run extracted "a.mkv"
		SubtitleStore::new(connection.clone())
			.save(&[SubtitleRecord {
				video_path:   video.clone(),
				stream_index: 2,
				language:     "eng".to_owned(),
				codec:        "subrip".to_owned(),
				srt_path:     Some(options.output.join("a.2.eng.srt")),
				sup_path:     None,
			}])
			.expect("Expected save to succeed");

		let runner = fake_runner(&[]).into_arc();
		let extractor = SubtitleExtractor::new(runner.clone(), SubtitleStore::new(connection));

		let summary = extractor
			.extract_subtitles_from_videos(&options)
			.expect("Expected extraction to run");

		assert_eq!(2, summary.scanned);
		assert_eq!(1, summary.skipped);
		assert_eq!(1, summary.processed);

		let outputs = runner.outputs.lock().expect("Expected lock to not be poisoned");
		assert!(outputs.iter().all(|v| return v.arg_after("-i") != Some(video.to_string_lossy().to_string())));
		assert!(!outputs.iter().any(|v| return is_probe(v) && v.output_path() == video));
	}

	#[test]
	fn test_exists_backfills_memory() {
		let (_dir, connection) = create_connection();
		let store = SubtitleStore::new(connection.clone());
		let video = PathBuf::from("/media/a.mkv");

		let extractor = SubtitleExtractor::new(fake_runner(&[]).into_arc(), store.clone());
		assert!(!extractor.subtitle_exists_in_db(&video));

		store
			.save(&[SubtitleRecord {
				video_path:   video.clone(),
				stream_index: 3,
				language:     "fre".to_owned(),
				codec:        "hdmv_pgs_subtitle".to_owned(),
				srt_path:     None,
				sup_path:     Some(PathBuf::from("/subs/a.3.fre.sup")),
			}])
			.expect("Expected save to succeed");

		assert!(extractor.subtitle_exists_in_db(&video));

		// served from memory, even if the store is gone
		store.clear().expect("Expected clear to succeed");
		assert!(extractor.subtitle_exists_in_db(&video));
	}
}
