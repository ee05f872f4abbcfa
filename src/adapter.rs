//! Durable key-value adapter and its JSON layer.
//!
//! ```text
//! JsonStorage ── serde_json ──► KvAdapter ── shared connection ──► KvEngine
//!  (logs, degrades)              (Result)                          (IndexedDB,
//!                                                                    directory,
//!                                                                    memory)
//! ```

use crate::error::{Result, StoreError};
use crate::KvEngine;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

type PendingConnection<C> = Shared<LocalBoxFuture<'static, Result<C>>>;

/// Wraps a [`KvEngine`] with a cached connection.
///
/// The first [`open()`](Self::open) starts connecting; every caller that
/// arrives while that is in flight, or after it completed, awaits the same
/// shared future. A failed open is evicted so the next call retries.
pub struct KvAdapter<E: KvEngine> {
	engine: E,
	connection: RefCell<Option<PendingConnection<E::Connection>>>,
}

impl<E: KvEngine> KvAdapter<E> {
	pub fn new(engine: E) -> Self {
		Self {
			engine,
			connection: RefCell::new(None),
		}
	}

	pub fn engine(&self) -> &E {
		&self.engine
	}

	/// Returns the open connection, connecting on first use.
	pub async fn open(&self) -> Result<E::Connection> {
		let pending = self
			.connection
			.borrow_mut()
			.get_or_insert_with(|| self.engine.connect().shared())
			.clone();

		match pending.clone().await {
			Ok(conn) => Ok(conn),
			Err(e) => {
				let mut slot = self.connection.borrow_mut();
				if slot.as_ref().is_some_and(|cached| cached.ptr_eq(&pending)) {
					*slot = None;
				}
				Err(e)
			}
		}
	}

	/// Returns the raw string stored under `key`.
	///
	/// Fails with [`StoreError::StorageUnavailable`] when the engine cannot be
	/// opened; callers should read that as "no data".
	pub async fn get(&self, key: &str) -> Result<Option<String>> {
		let conn = self.open().await?;
		self.engine.get(&conn, key).await
	}

	pub async fn set(&self, key: &str, value: &str) -> Result<()> {
		let conn = self.open().await?;
		self.engine.set(&conn, key, value).await
	}

	pub async fn remove(&self, key: &str) -> Result<()> {
		let conn = self.open().await?;
		self.engine.remove(&conn, key).await
	}

	/// Closes the cached connection and deletes the database.
	///
	/// The next operation reconnects and recreates an empty record space.
	pub async fn destroy(&self) -> Result<()> {
		let cached = self.connection.borrow_mut().take();
		if let Some(Ok(conn)) = cached.as_ref().and_then(|pending| pending.peek()) {
			self.engine.close(conn.clone());
		}
		self.engine.destroy().await
	}
}

/// JSON encode/decode over a [`KvAdapter`].
///
/// This is the best-effort boundary: reads never fail (a miss, an unavailable
/// engine and a malformed record all come back as `None`), and write failures
/// are logged before being returned.
pub struct JsonStorage<E: KvEngine> {
	adapter: Rc<KvAdapter<E>>,
}

impl<E: KvEngine> Clone for JsonStorage<E> {
	fn clone(&self) -> Self {
		Self {
			adapter: self.adapter.clone(),
		}
	}
}

impl<E: KvEngine> JsonStorage<E> {
	pub fn new(adapter: Rc<KvAdapter<E>>) -> Self {
		Self { adapter }
	}

	pub fn adapter(&self) -> &KvAdapter<E> {
		&self.adapter
	}

	pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		let raw = match self.adapter.get(key).await {
			Ok(raw) => raw?,
			Err(e) => {
				log::warn!("reading `{key}` failed, treating as empty: {e}");
				return None;
			}
		};

		match serde_json::from_str(&raw) {
			Ok(value) => Some(value),
			Err(e) => {
				log::warn!("discarding malformed record `{key}`: {e}");
				None
			}
		}
	}

	/// Encodes and stores `value`, logging any failure.
	///
	/// The error is still returned so the store's background writer can
	/// record it in [`PersistHealth`](crate::PersistHealth). It never reaches
	/// a setter.
	pub async fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
		let result = match serde_json::to_string(value) {
			Ok(raw) => self.adapter.set(key, &raw).await,
			Err(e) => Err(StoreError::from(e)),
		};
		if let Err(e) = &result {
			log::warn!("persisting `{key}` failed, keeping it in memory only: {e}");
		}
		result
	}

	pub async fn remove_item(&self, key: &str) {
		if let Err(e) = self.adapter.remove(key).await {
			log::warn!("removing `{key}` failed: {e}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MemoryEngine;
	use futures::executor::block_on;
	use futures::future::join;
	use serde_json::{json, Value};

	fn storage(engine: &MemoryEngine) -> JsonStorage<MemoryEngine> {
		JsonStorage::new(Rc::new(KvAdapter::new(engine.clone())))
	}

	#[test]
	fn test_open_is_shared() {
		let engine = MemoryEngine::new();
		let adapter = KvAdapter::new(engine.clone());

		block_on(async {
			let (a, b) = join(adapter.open(), adapter.open()).await;
			assert!(a.is_ok() && b.is_ok());
			adapter.set("k", "v").await.unwrap();
			adapter.get("k").await.unwrap();
		});

		assert_eq!(engine.connect_count(), 1, "database should be opened once");
	}

	#[test]
	fn test_failed_open_is_retried() {
		let engine = MemoryEngine::unavailable();
		let adapter = KvAdapter::new(engine.clone());

		block_on(async {
			let err = adapter.get("k").await.unwrap_err();
			assert!(err.is_unavailable());

			engine.set_available(true);
			assert_eq!(adapter.get("k").await.unwrap(), None);
		});

		assert_eq!(engine.connect_count(), 2);
	}

	#[test]
	fn test_remove_absent_key() {
		let adapter = KvAdapter::new(MemoryEngine::new());
		block_on(async {
			adapter.remove("nothing-here").await.unwrap();
		});
	}

	#[test]
	fn test_destroy_drops_connection() {
		let engine = MemoryEngine::new();
		let adapter = KvAdapter::new(engine.clone());

		block_on(async {
			adapter.set("k", "v").await.unwrap();
			adapter.destroy().await.unwrap();
			assert_eq!(adapter.get("k").await.unwrap(), None);
		});

		assert_eq!(engine.connect_count(), 2);
		assert_eq!(engine.destroy_count(), 1);
	}

	#[test]
	fn test_json_round_trip() {
		let engine = MemoryEngine::new();
		let storage = storage(&engine);
		let value = json!({
			"students": [{"id": 1, "name": "Awa", "tags": ["new", null], "fee": 12.5}],
			"settings": {"currency": "XOF", "nested": {"flag": true}}
		});

		block_on(async {
			storage.set_item("snap", &value).await.unwrap();
			let back: Option<Value> = storage.get_item("snap").await;
			assert_eq!(back, Some(value));
		});
	}

	#[test]
	fn test_malformed_record_is_a_miss() {
		let engine = MemoryEngine::new();
		engine.insert("snap", "{not json");
		let storage = storage(&engine);

		let back: Option<Value> = block_on(storage.get_item("snap"));
		assert_eq!(back, None);
	}

	#[test]
	fn test_unavailable_engine_is_a_miss() {
		let storage = storage(&MemoryEngine::unavailable());

		block_on(async {
			let back: Option<Value> = storage.get_item("snap").await;
			assert_eq!(back, None);
			assert!(storage.set_item("snap", &json!([])).await.is_err());
			storage.remove_item("snap").await;
		});
	}

	#[test]
	fn test_none_is_stored_as_null() {
		let engine = MemoryEngine::new();
		let storage = storage(&engine);

		block_on(storage.set_item("empty", &Option::<u32>::None)).unwrap();
		assert_eq!(engine.record("empty").as_deref(), Some("null"));
	}

	#[test]
	fn test_failed_write_reported() {
		let engine = MemoryEngine::new();
		engine.fail_writes(true);
		let storage = storage(&engine);

		let err = block_on(storage.set_item("snap", &json!({"a": 1}))).unwrap_err();
		assert!(matches!(err, StoreError::Engine(_)));
		assert_eq!(engine.record("snap"), None);
	}
}
