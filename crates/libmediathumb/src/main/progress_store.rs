//! Module for checkpointing the thumbnail generation progress
//!
//! Secondary jobs (like a filmstrip) can take a long time, the stored `last_index` allows them to resume from the next frame
//! instead of starting from frame 0 again after a restart.

use std::{
	collections::HashMap,
	sync::{
		Mutex,
		MutexGuard,
		PoisonError,
	},
};

use diesel::prelude::*;

use super::sql_utils::{
	SharedConnection,
	apply_sqlite_migrations,
};
use crate::data::{
	media_kind::MediaKind,
	sql_models::ProgressRow,
	sql_schema::thumbnail_progress,
};

/// The `last_index` of a title which has no frames yet
pub const NO_INDEX: i32 = -1;

/// Progress of a single title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
	/// Whether the secondary job has successfully finished
	pub done:       bool,
	/// The last produced frame number, [NO_INDEX] if none
	pub last_index: i32,
}

impl Default for ProgressRecord {
	fn default() -> Self {
		return Self {
			done:       false,
			last_index: NO_INDEX,
		};
	}
}

/// Persistent progress of all titles of a single [MediaKind]
///
/// All records are kept in memory, every change is also written to the database.
/// Database failures are only logged, the in-memory state keeps working for the lifetime of the process.
pub struct ProgressStore {
	kind:       MediaKind,
	connection: SharedConnection,
	/// Lock order: always lock this before the connection
	records:    Mutex<HashMap<String, ProgressRecord>>,
}

// manual implementation, because "SqliteConnection" does not implement "Debug"
impl std::fmt::Debug for ProgressStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return f
			.debug_struct("ProgressStore")
			.field("kind", &self.kind)
			.field("records", &self.records)
			.finish_non_exhaustive();
	}
}

impl ProgressStore {
	/// Create a new store for `kind` and load all existing records
	pub fn new(connection: SharedConnection, kind: MediaKind) -> Self {
		let records = match load(&connection, kind) {
			Ok(v) => v,
			Err(err) => {
				warn!("Could not load {} thumbnail progress, starting empty: {}", kind, err);
				HashMap::new()
			},
		};

		debug!("Loaded {} {} progress records", records.len(), kind);

		return Self {
			kind,
			connection,
			records: Mutex::new(records),
		};
	}

	/// Get the media kind of this store
	pub fn kind(&self) -> MediaKind {
		return self.kind;
	}

	/// Lock the records, they are always left consistent so a poisoned lock is recovered
	fn lock(&self) -> MutexGuard<'_, HashMap<String, ProgressRecord>> {
		return self.records.lock().unwrap_or_else(PoisonError::into_inner);
	}

	/// Get the record for `sanitized_title`
	pub fn get(&self, sanitized_title: &str) -> Option<ProgressRecord> {
		return self.lock().get(sanitized_title).copied();
	}

	/// Get whether the secondary job of `sanitized_title` is done
	pub fn is_done(&self, sanitized_title: &str) -> bool {
		return self.get(sanitized_title).is_some_and(|v| return v.done);
	}

	/// Get the last produced frame of `sanitized_title`, [NO_INDEX] if unknown
	pub fn last_index(&self, sanitized_title: &str) -> i32 {
		return self.get(sanitized_title).map_or(NO_INDEX, |v| return v.last_index);
	}

	/// Get a copy of all records
	pub fn records(&self) -> HashMap<String, ProgressRecord> {
		return self.lock().clone();
	}

	/// Create the record for `sanitized_title` if it does not exist yet and return it
	pub fn ensure(&self, sanitized_title: &str) -> ProgressRecord {
		let mut records = self.lock();

		if let Some(record) = records.get(sanitized_title) {
			return *record;
		}

		let record = ProgressRecord::default();
		records.insert(sanitized_title.to_owned(), record);
		self.persist_logged(&[(sanitized_title, record)]);

		return record;
	}

	/// Advance the `last_index` of `sanitized_title` to `index`
	/// Returns `true` if the index was changed, a lower or equal `index` does not change anything
	pub fn update_last_index(&self, sanitized_title: &str, index: i32) -> bool {
		let mut records = self.lock();
		let record = records.entry(sanitized_title.to_owned()).or_default();

		if index <= record.last_index {
			return false;
		}

		record.last_index = index;
		let record = *record;
		self.persist_logged(&[(sanitized_title, record)]);

		return true;
	}

	/// Mark the secondary job of `sanitized_title` as done, with the final `last_index` if known
	pub fn mark_done(&self, sanitized_title: &str, last_index: Option<i32>) {
		let mut records = self.lock();
		let record = records.entry(sanitized_title.to_owned()).or_default();

		record.done = true;
		if let Some(index) = last_index {
			record.last_index = record.last_index.max(index);
		}

		let record = *record;
		self.persist_logged(&[(sanitized_title, record)]);
	}

	/// Write all in-memory records to the database
	pub fn save(&self) {
		let records = self.lock();
		let all: Vec<(&str, ProgressRecord)> = records.iter().map(|(k, v)| return (k.as_str(), *v)).collect();

		self.persist_logged(&all);
	}

	/// Merge `records` into the in-memory state and write them to the database
	pub fn save_records(&self, new_records: &HashMap<String, ProgressRecord>) -> Result<(), crate::Error> {
		let mut records = self.lock();

		for (title, record) in new_records {
			records.insert(title.clone(), *record);
		}

		let all: Vec<(&str, ProgressRecord)> = new_records.iter().map(|(k, v)| return (k.as_str(), *v)).collect();

		return self.persist(&all);
	}

	/// Remove all records of this store's media kind, from memory and the database
	pub fn clear(&self) -> Result<(), crate::Error> {
		let mut records = self.lock();
		records.clear();

		let mut connection = self.connection.lock()?;
		let deleted = diesel::delete(thumbnail_progress::table.filter(thumbnail_progress::media_kind.eq(self.kind.as_str())))
			.execute(&mut *connection)?;

		debug!("Cleared {} {} progress records", deleted, self.kind);

		return Ok(());
	}

	/// Write `records` with "REPLACE INTO" inside a single transaction
	fn persist(&self, records: &[(&str, ProgressRecord)]) -> Result<(), crate::Error> {
		let rows: Vec<ProgressRow> = records
			.iter()
			.map(|(title, record)| {
				return ProgressRow {
					media_kind:      self.kind.as_str().to_owned(),
					sanitized_title: (*title).to_owned(),
					done:            record.done,
					last_index:      record.last_index,
				};
			})
			.collect();

		let mut connection = self.connection.lock()?;

		connection.transaction::<_, diesel::result::Error, _>(|conn| {
			for row in &rows {
				diesel::replace_into(thumbnail_progress::table)
					.values(row)
					.execute(conn)?;
			}

			return Ok(());
		})?;

		return Ok(());
	}

	/// Same as [Self::persist], but only logs a failure
	fn persist_logged(&self, records: &[(&str, ProgressRecord)]) {
		if let Err(err) = self.persist(records) {
			warn!("Could not save {} thumbnail progress: {}", self.kind, err);
		}
	}
}

/// Load all records of `kind`, creating the table first if necessary
fn load(connection: &SharedConnection, kind: MediaKind) -> Result<HashMap<String, ProgressRecord>, crate::Error> {
	let mut connection = connection.lock()?;

	apply_sqlite_migrations(&mut connection)?;

	let rows: Vec<ProgressRow> = thumbnail_progress::table
		.filter(thumbnail_progress::media_kind.eq(kind.as_str()))
		.select(ProgressRow::as_select())
		.load(&mut *connection)?;

	return Ok(rows
		.into_iter()
		.map(|row| {
			return (
				row.sanitized_title,
				ProgressRecord {
					done:       row.done,
					last_index: row.last_index.max(NO_INDEX),
				},
			);
		})
		.collect());
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::main::sql_utils::test_utils::create_connection;

	#[test]
	fn test_new_empty() {
		let (_dir, connection) = create_connection();
		let store = ProgressStore::new(connection, MediaKind::Video);

		assert!(store.records().is_empty());
		assert_eq!(NO_INDEX, store.last_index("unknown"));
		assert!(!store.is_done("unknown"));
	}

	#[test]
	fn test_debug_skips_connection() {
		let (_dir, connection) = create_connection();
		let store = ProgressStore::new(connection, MediaKind::Music);
		store.ensure("Track");

		let formatted = format!("{store:?}");
		assert!(formatted.starts_with("ProgressStore { kind: Music"));
		assert!(formatted.contains("\"Track\""));
	}

	#[test]
	fn test_persisted_across_instances() {
		let (_dir, connection) = create_connection();

		{
			let store = ProgressStore::new(connection.clone(), MediaKind::Video);
			store.ensure("Movie- Part 1");
			assert!(store.update_last_index("Movie- Part 1", 9));
			store.mark_done("Other", Some(19));
		}

		let store = ProgressStore::new(connection, MediaKind::Video);

		assert_eq!(
			Some(ProgressRecord {
				done:       false,
				last_index: 9,
			}),
			store.get("Movie- Part 1")
		);
		assert_eq!(
			Some(ProgressRecord {
				done:       true,
				last_index: 19,
			}),
			store.get("Other")
		);
	}

	#[test]
	fn test_kinds_are_separate() {
		let (_dir, connection) = create_connection();

		let video = ProgressStore::new(connection.clone(), MediaKind::Video);
		video.mark_done("Same Title", None);

		let music = ProgressStore::new(connection, MediaKind::Music);
		assert!(!music.is_done("Same Title"));
		music.ensure("Same Title");

		video.clear().expect("Expected clear to succeed");
		assert!(video.records().is_empty());
		// clearing one kind does not touch the other kind
		let music = ProgressStore::new(music.connection.clone(), MediaKind::Music);
		assert!(music.get("Same Title").is_some());
	}

	#[test]
	fn test_last_index_monotonic() {
		let (_dir, connection) = create_connection();
		let store = ProgressStore::new(connection, MediaKind::Video);

		assert!(store.update_last_index("a", 5));
		assert!(!store.update_last_index("a", 3));
		assert!(!store.update_last_index("a", 5));
		assert_eq!(5, store.last_index("a"));

		store.mark_done("a", Some(2));
		assert_eq!(5, store.last_index("a"));
		assert!(store.is_done("a"));
	}

	#[test]
	fn test_ensure_keeps_existing() {
		let (_dir, connection) = create_connection();
		let store = ProgressStore::new(connection, MediaKind::Music);

		store.mark_done("a", None);

		assert!(store.ensure("a").done);
		assert_eq!(ProgressRecord::default(), store.ensure("b"));
	}

	#[test]
	fn test_save_records() {
		let (_dir, connection) = create_connection();
		let store = ProgressStore::new(connection.clone(), MediaKind::Video);

		let mut records = HashMap::new();
		records.insert(
			"a".to_owned(),
			ProgressRecord {
				done:       true,
				last_index: 3,
			},
		);
		records.insert("b".to_owned(), ProgressRecord::default());
		store.save_records(&records).expect("Expected save to succeed");

		let store = ProgressStore::new(connection, MediaKind::Video);
		assert_eq!(records, store.records());
	}

	#[test]
	fn test_database_failure_keeps_memory() {
		let (_dir, connection) = create_connection();
		let store = ProgressStore::new(connection.clone(), MediaKind::Video);

		diesel::sql_query("DROP TABLE thumbnail_progress")
			.execute(&mut *connection.lock().expect("Expected lock to not be poisoned"))
			.expect("Expected table to be dropped");

		assert!(store.update_last_index("a", 4));
		store.mark_done("a", None);
		store.save();

		assert!(store.is_done("a"));
		assert_eq!(4, store.last_index("a"));
	}
}
