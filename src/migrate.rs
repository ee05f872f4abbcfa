use crate::error::StoreError;
use crate::{KvAdapter, KvEngine, LegacyStore};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

static PROCESS_MIGRATION_ATTEMPTED: AtomicBool = AtomicBool::new(false);

/// Records whether the legacy migration has already been attempted.
///
/// [`MigrationGuard::process()`] is shared by the whole process and is only
/// reset by restarting it (a page reload in the browser). Tests use
/// [`MigrationGuard::scoped()`] so each case starts fresh.
#[derive(Debug, Clone)]
pub struct MigrationGuard {
	flag: GuardFlag,
}

#[derive(Debug, Clone)]
enum GuardFlag {
	Process,
	Scoped(Rc<Cell<bool>>),
}

impl Default for MigrationGuard {
	fn default() -> Self {
		Self::process()
	}
}

impl MigrationGuard {
	pub fn process() -> Self {
		Self {
			flag: GuardFlag::Process,
		}
	}

	pub fn scoped() -> Self {
		Self {
			flag: GuardFlag::Scoped(Rc::new(Cell::new(false))),
		}
	}

	/// Returns `true` for the first caller only.
	pub fn try_claim(&self) -> bool {
		match &self.flag {
			GuardFlag::Process => !PROCESS_MIGRATION_ATTEMPTED.swap(true, Ordering::SeqCst),
			GuardFlag::Scoped(flag) => !flag.replace(true),
		}
	}

	pub fn attempted(&self) -> bool {
		match &self.flag {
			GuardFlag::Process => PROCESS_MIGRATION_ATTEMPTED.load(Ordering::SeqCst),
			GuardFlag::Scoped(flag) => flag.get(),
		}
	}
}

/// Moves a blob from the legacy mechanism into durable storage.
pub struct Migrator<'a, L: LegacyStore> {
	legacy: &'a L,
	legacy_key: &'a str,
	durable_key: &'a str,
}

impl<'a, L: LegacyStore> Migrator<'a, L> {
	pub fn new(legacy: &'a L, legacy_key: &'a str, durable_key: &'a str) -> Self {
		Self {
			legacy,
			legacy_key,
			durable_key,
		}
	}

	/// Copies the legacy blob verbatim and deletes it once the copy is durable.
	///
	/// Returns `false` when the legacy mechanism can't be read or the durable
	/// write fails; the legacy blob is then left in place for the next load.
	/// With nothing to migrate this is a silent success, so calling it again
	/// after a successful run changes nothing.
	pub async fn migrate<E: KvEngine>(&self, adapter: &KvAdapter<E>) -> bool {
		let raw = match self.legacy.get_item(self.legacy_key) {
			Ok(Some(raw)) => raw,
			Ok(None) => {
				log::debug!("no legacy state under `{}`", self.legacy_key);
				return true;
			}
			Err(e) => {
				log::warn!("legacy storage unreadable, skipping migration: {e}");
				return false;
			}
		};

		if let Err(e) = adapter.set(self.durable_key, &raw).await {
			let failure = StoreError::MigrationFailure {
				key: self.legacy_key.to_string(),
				reason: e.to_string(),
			};
			log::warn!("{failure}; legacy data kept for the next attempt");
			return false;
		}

		if let Err(e) = self.legacy.remove_item(self.legacy_key) {
			log::error!(
				"migrated `{}` but could not delete the legacy copy: {e}",
				self.legacy_key
			);
		}

		log::info!(
			"migrated {} bytes of legacy state into `{}`",
			raw.len(),
			self.durable_key
		);
		true
	}
}
