mod adapter;
mod config;
mod directory;
mod error;
mod memory;
mod migrate;
mod persist;
mod state;
mod store;

#[cfg(feature = "web")]
mod web;

use futures::future::LocalBoxFuture;

pub use adapter::{JsonStorage, KvAdapter};
pub use config::StoreConfig;
pub use directory::DirectoryEngine;
pub use error::{Result, StoreError};
pub use memory::{MemoryEngine, MemoryLegacy};
pub use migrate::{MigrationGuard, Migrator};
pub use persist::PersistHealth;
pub use state::{Collection, RegistrationDraft, SchoolState};
pub use store::{HydrationPhase, PersistenceState, SchoolStore, SubscriptionId};

#[cfg(feature = "web")]
pub use web::{BrowserSpawner, IdbEngine, LocalStorageLegacy};

/// An asynchronous, string-keyed storage engine addressed by a database name
/// and a record space inside it.
///
/// Engines are single-threaded: connections and futures are not required to
/// be `Send`, which lets browser handles (`IdbDatabase`) implement this trait
/// directly.
#[allow(async_fn_in_trait)]
pub trait KvEngine: 'static {
	/// Handle to an open database.
	type Connection: Clone + 'static;

	/// Opens the database, creating the record space if it does not exist.
	///
	/// The returned future must not borrow the engine so that
	/// [`KvAdapter`] can share one in-flight open between callers.
	fn connect(&self) -> LocalBoxFuture<'static, Result<Self::Connection>>;

	/// Returns the raw string stored under `key`, or `None`.
	async fn get(&self, conn: &Self::Connection, key: &str) -> Result<Option<String>>;

	/// Upserts `value` under `key`.
	async fn set(&self, conn: &Self::Connection, key: &str, value: &str) -> Result<()>;

	/// Deletes `key`. Deleting an absent key succeeds.
	async fn remove(&self, conn: &Self::Connection, key: &str) -> Result<()>;

	/// Releases a connection before the database is destroyed.
	fn close(&self, _conn: Self::Connection) {}

	/// Deletes the whole database.
	async fn destroy(&self) -> Result<()>;
}

/// The synchronous, size-limited mechanism older releases persisted to.
///
/// Only the migrator touches it: one read, and one delete after the value has
/// been copied into durable storage.
pub trait LegacyStore {
	fn get_item(&self, key: &str) -> Result<Option<String>>;

	fn remove_item(&self, key: &str) -> Result<()>;
}
