//! Browser backends: IndexedDB as the durable engine, `localStorage` as the
//! legacy mechanism, and `spawn_local` for background writes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      SchoolStore                         │
//! │                                                          │
//! │  set_x() ──► state ──► slot ──► spawn_local() ──► IndexedDB
//! │                │                 (fire & forget)         │
//! │  x()  ◄────────┘                                         │
//! │                                                          │
//! │  On init: localStorage ──► migrate ──► IndexedDB         │
//! │           IndexedDB ──► hydrate ──► state                │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::error::{Result, StoreError};
use crate::{KvEngine, LegacyStore, StoreConfig};
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{IdbDatabase, IdbFactory, IdbRequest, IdbTransactionMode, Storage};

const DB_VERSION: u32 = 1;

/// IndexedDB-backed [`KvEngine`].
///
/// One database with one object store using out-of-line string keys; values
/// are stored as JS strings.
///
/// # Third-Party Context Warning
///
/// Browsers increasingly restrict storage APIs in third-party contexts
/// (iframes on different domains) and in private browsing. Expect
/// [`StoreError::StorageUnavailable`] there; the store then runs memory-only.
#[derive(Debug, Clone)]
pub struct IdbEngine {
	database_name: Rc<str>,
	store_name: Rc<str>,
}

impl IdbEngine {
	pub fn new(database_name: &str, store_name: &str) -> Self {
		Self {
			database_name: database_name.into(),
			store_name: store_name.into(),
		}
	}

	pub fn from_config(config: &StoreConfig) -> Self {
		Self::new(&config.database_name, &config.store_name)
	}

	fn factory() -> Result<IdbFactory> {
		let window = web_sys::window()
			.ok_or_else(|| StoreError::StorageUnavailable("no window object".into()))?;
		window
			.indexed_db()
			.map_err(|e| StoreError::StorageUnavailable(format!("IndexedDB error: {:?}", e)))?
			.ok_or_else(|| StoreError::StorageUnavailable("IndexedDB not available".into()))
	}

	/// Opens or creates the database and its object store.
	async fn open_database(database_name: Rc<str>, store_name: Rc<str>) -> Result<IdbDatabase> {
		let open_request = Self::factory()?
			.open_with_f64(&database_name, DB_VERSION as f64)
			.map_err(|e| StoreError::StorageUnavailable(format!("Failed to open DB: {:?}", e)))?;

		let upgrade_store = store_name.clone();
		let on_upgrade = Closure::once(move |event: web_sys::IdbVersionChangeEvent| {
			let Some(target) = event.target() else { return };
			let request: IdbRequest = target.unchecked_into();
			let Ok(db) = request.result() else { return };
			let db: IdbDatabase = db.unchecked_into();

			if !db.object_store_names().contains(&upgrade_store) {
				if let Err(e) = db.create_object_store(&upgrade_store) {
					log::error!("creating object store `{upgrade_store}` failed: {:?}", e);
				}
			}
		});
		open_request.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
		on_upgrade.forget();

		let db = Self::await_request::<IdbDatabase>(&open_request)
			.await
			.map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

		// Step aside when another page or a wipe deletes or upgrades the database.
		let closing = db.clone();
		let on_version_change = Closure::<dyn FnMut(web_sys::Event)>::new(move |_event| {
			closing.close();
		});
		db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));
		on_version_change.forget();

		Ok(db)
	}

	fn object_store(
		&self,
		db: &IdbDatabase,
		mode: IdbTransactionMode,
	) -> Result<web_sys::IdbObjectStore> {
		let transaction = db
			.transaction_with_str_and_mode(&self.store_name, mode)
			.map_err(|e| StoreError::Engine(format!("Transaction error: {:?}", e)))?;

		transaction
			.object_store(&self.store_name)
			.map_err(|e| StoreError::Engine(format!("Object store error: {:?}", e)))
	}

	/// Helper to await an IdbRequest and extract the result
	async fn await_request<T: JsCast>(request: &IdbRequest) -> Result<T> {
		let (sender, receiver) = futures_channel::oneshot::channel();
		let sender = Rc::new(RefCell::new(Some(sender)));

		let success_sender = sender.clone();
		let onsuccess = Closure::once(move |_event: web_sys::Event| {
			if let Some(sender) = success_sender.borrow_mut().take() {
				let _ = sender.send(Ok(()));
			}
		});

		let error_sender = sender.clone();
		let onerror = Closure::once(move |_event: web_sys::Event| {
			if let Some(sender) = error_sender.borrow_mut().take() {
				let _ = sender.send(Err(StoreError::Engine("IndexedDB request failed".into())));
			}
		});

		request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
		request.set_onerror(Some(onerror.as_ref().unchecked_ref()));

		onsuccess.forget();
		onerror.forget();

		receiver
			.await
			.map_err(|_| StoreError::Engine("Channel closed".into()))??;

		request
			.result()
			.map_err(|e| StoreError::Engine(format!("Result error: {:?}", e)))?
			.dyn_into::<T>()
			.map_err(|_| StoreError::Engine("Type cast failed".into()))
	}
}

impl KvEngine for IdbEngine {
	type Connection = IdbDatabase;

	fn connect(&self) -> LocalBoxFuture<'static, Result<IdbDatabase>> {
		Self::open_database(self.database_name.clone(), self.store_name.clone()).boxed_local()
	}

	async fn get(&self, db: &IdbDatabase, key: &str) -> Result<Option<String>> {
		let request = self
			.object_store(db, IdbTransactionMode::Readonly)?
			.get(&JsValue::from_str(key))
			.map_err(|e| StoreError::Engine(format!("Get error: {:?}", e)))?;

		let value = Self::await_request::<JsValue>(&request).await?;
		if value.is_undefined() || value.is_null() {
			return Ok(None);
		}
		value
			.as_string()
			.map(Some)
			.ok_or_else(|| StoreError::Serialization(format!("record `{key}` is not a string")))
	}

	async fn set(&self, db: &IdbDatabase, key: &str, value: &str) -> Result<()> {
		let request = self
			.object_store(db, IdbTransactionMode::Readwrite)?
			.put_with_key(&JsValue::from_str(value), &JsValue::from_str(key))
			.map_err(|e| StoreError::Engine(format!("Put error: {:?}", e)))?;

		Self::await_request::<JsValue>(&request).await?;
		Ok(())
	}

	async fn remove(&self, db: &IdbDatabase, key: &str) -> Result<()> {
		let request = self
			.object_store(db, IdbTransactionMode::Readwrite)?
			.delete(&JsValue::from_str(key))
			.map_err(|e| StoreError::Engine(format!("Delete error: {:?}", e)))?;

		Self::await_request::<JsValue>(&request).await?;
		Ok(())
	}

	fn close(&self, db: IdbDatabase) {
		db.close();
	}

	async fn destroy(&self) -> Result<()> {
		let request = Self::factory()?
			.delete_database(&self.database_name)
			.map_err(|e| StoreError::Engine(format!("Delete database error: {:?}", e)))?;

		Self::await_request::<JsValue>(&request).await?;
		Ok(())
	}
}

/// `window.localStorage` as the [`LegacyStore`].
#[derive(Debug, Clone, Default)]
pub struct LocalStorageLegacy;

impl LocalStorageLegacy {
	pub fn new() -> Self {
		Self
	}

	fn storage() -> Result<Storage> {
		let window = web_sys::window()
			.ok_or_else(|| StoreError::StorageUnavailable("no window object".into()))?;
		window
			.local_storage()
			.map_err(|e| StoreError::StorageUnavailable(format!("localStorage error: {:?}", e)))?
			.ok_or_else(|| StoreError::StorageUnavailable("localStorage not available".into()))
	}
}

impl LegacyStore for LocalStorageLegacy {
	fn get_item(&self, key: &str) -> Result<Option<String>> {
		Self::storage()?
			.get_item(key)
			.map_err(|e| StoreError::Engine(format!("localStorage read error: {:?}", e)))
	}

	fn remove_item(&self, key: &str) -> Result<()> {
		Self::storage()?
			.remove_item(key)
			.map_err(|e| StoreError::Engine(format!("localStorage delete error: {:?}", e)))
	}
}

/// Runs background writes on the browser's event loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserSpawner;

impl LocalSpawn for BrowserSpawner {
	fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
		spawn_local(future);
		Ok(())
	}
}
