use crate::error::{Result, StoreError};
use crate::KvEngine;
use futures::future::{FutureExt, LocalBoxFuture};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A [`KvEngine`] that keeps one file per key on disk.
///
/// Layout: `<root>/<database>/<record space>/<hex(key)>.json`. Keys are hex
/// encoded so any string is a valid, collision-free file name. Writes go to a
/// temporary file first and are renamed into place, so a crash mid-write
/// leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct DirectoryEngine {
	database: PathBuf,
	records: PathBuf,
}

impl DirectoryEngine {
	pub fn new(root: impl AsRef<Path>, database_name: &str, store_name: &str) -> Self {
		let database = root.as_ref().join(database_name);
		let records = database.join(store_name);
		Self { database, records }
	}

	pub fn database_path(&self) -> &Path {
		&self.database
	}

	fn file_for(dir: &Path, key: &str) -> PathBuf {
		let mut name = String::with_capacity(key.len() * 2 + 5);
		for byte in key.bytes() {
			name.push_str(&format!("{byte:02x}"));
		}
		name.push_str(".json");
		dir.join(name)
	}
}

impl KvEngine for DirectoryEngine {
	type Connection = PathBuf;

	fn connect(&self) -> LocalBoxFuture<'static, Result<PathBuf>> {
		let records = self.records.clone();
		async move {
			fs::create_dir_all(&records).map_err(|e| {
				StoreError::StorageUnavailable(format!("{}: {e}", records.display()))
			})?;
			Ok(records)
		}
		.boxed_local()
	}

	async fn get(&self, conn: &PathBuf, key: &str) -> Result<Option<String>> {
		match fs::read_to_string(Self::file_for(conn, key)) {
			Ok(value) => Ok(Some(value)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StoreError::engine(e)),
		}
	}

	async fn set(&self, conn: &PathBuf, key: &str, value: &str) -> Result<()> {
		let target = Self::file_for(conn, key);
		let temp = target.with_extension("json.tmp");

		let mut file = fs::File::create(&temp).map_err(StoreError::engine)?;
		file.write_all(value.as_bytes()).map_err(StoreError::engine)?;
		file.sync_all().map_err(StoreError::engine)?;
		fs::rename(&temp, &target).map_err(StoreError::engine)
	}

	async fn remove(&self, conn: &PathBuf, key: &str) -> Result<()> {
		match fs::remove_file(Self::file_for(conn, key)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::engine(e)),
		}
	}

	async fn destroy(&self) -> Result<()> {
		match fs::remove_dir_all(&self.database) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::engine(e)),
		}
	}
}
