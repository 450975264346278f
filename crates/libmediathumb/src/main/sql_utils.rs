//! Module for SQL Utility functions

use crate::error::IOErrorToError;
use diesel::prelude::*;
use std::{
	path::Path,
	sync::{
		Arc,
		Mutex,
	},
};

/// All migrations from "libmediathumb/migrations" embedded into the binary
pub const MIGRATIONS: diesel_migrations::EmbeddedMigrations = diesel_migrations::embed_migrations!();

/// A connection shared between all stores, access is serialized through the lock
pub type SharedConnection = Arc<Mutex<SqliteConnection>>;

/// Open a SQLite Connection for `sqlite_path` and apply all migrations
pub fn sqlite_connect<P: AsRef<Path>>(sqlite_path: P) -> Result<SqliteConnection, crate::Error> {
	return match sqlite_path.as_ref().to_str() {
		Some(path) => {
			let mut connection = SqliteConnection::establish(path)?;

			apply_sqlite_migrations(&mut connection)?;

			return Ok(connection);
		},
		None => Err(crate::Error::other(format!(
			"SQLite only accepts UTF-8 Paths, and given path failed to be converted to a string without being lossy, Path (converted lossy): \"{}\"",
			sqlite_path.as_ref().to_string_lossy()
		))),
	};
}

/// Open a [SharedConnection] for `sqlite_path`, creating the parent directories if necessary
pub fn shared_connect<P: AsRef<Path>>(sqlite_path: P) -> Result<SharedConnection, crate::Error> {
	let sqlite_path = sqlite_path.as_ref();

	if let Some(parent) = sqlite_path.parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent).attach_path_err(parent)?;
		}
	}

	return Ok(Arc::new(Mutex::new(sqlite_connect(sqlite_path)?)));
}

/// Apply all (up) migrations to a SQLite Database
/// Migrations only create what does not exist yet, so this can be run on every connect
#[inline]
pub fn apply_sqlite_migrations(connection: &mut SqliteConnection) -> Result<(), crate::Error> {
	let applied = diesel_migrations::MigrationHarness::run_pending_migrations(connection, MIGRATIONS)
		.map_err(|err| return crate::Error::other(format!("Applying SQL Migrations Errored! Error:\n{}", err)))?;

	debug!("Applied Migrations: {:?}", applied);

	return Ok(());
}

#[cfg(test)]
pub(crate) mod test_utils {
	use super::*;

	/// Create a new database in a new temporary directory
	/// The directory has to be kept alive for as long as the connection is used
	pub fn create_connection() -> (tempfile::TempDir, SharedConnection) {
		let dir = tempfile::Builder::new()
			.prefix("mediathumb-test-sqlite-")
			.tempdir()
			.expect("Expected a temp dir to be created");

		let connection = shared_connect(dir.path().join("test.db")).expect("Expected SQLite to successfully start");

		return (dir, connection);
	}
}
