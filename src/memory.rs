//! In-process engines.
//!
//! [`MemoryEngine`] clones share one record map, so a second store built from
//! a clone sees what the first one persisted, the way a reloaded page sees the
//! same browser database. Failure switches let tests make the engine
//! unavailable, make writes fail, or make every call suspend once.

use crate::error::{Result, StoreError};
use crate::{KvEngine, LegacyStore};
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::task::Poll;

#[derive(Debug)]
struct MemoryInner {
	records: BTreeMap<String, String>,
	available: bool,
	fail_writes: bool,
	yielding: bool,
	connects: usize,
	writes: usize,
	destroys: usize,
}

/// A [`KvEngine`] that keeps records in memory.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
	inner: Rc<RefCell<MemoryInner>>,
}

/// Connection handle for [`MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
	inner: Rc<RefCell<MemoryInner>>,
}

impl Default for MemoryEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryEngine {
	pub fn new() -> Self {
		Self {
			inner: Rc::new(RefCell::new(MemoryInner {
				records: BTreeMap::new(),
				available: true,
				fail_writes: false,
				yielding: false,
				connects: 0,
				writes: 0,
				destroys: 0,
			})),
		}
	}

	/// An engine that refuses to open, like a browser with storage disabled.
	pub fn unavailable() -> Self {
		let engine = Self::new();
		engine.set_available(false);
		engine
	}

	pub fn set_available(&self, available: bool) {
		self.inner.borrow_mut().available = available;
	}

	/// Makes every subsequent `set` fail, like an exceeded quota.
	pub fn fail_writes(&self, fail: bool) {
		self.inner.borrow_mut().fail_writes = fail;
	}

	/// Makes every call return `Pending` once before completing, so callers
	/// interleave the way they do against a real asynchronous backend.
	pub fn set_yielding(&self, yielding: bool) {
		self.inner.borrow_mut().yielding = yielding;
	}

	/// Seeds a raw record without going through a connection.
	pub fn insert(&self, key: &str, value: &str) {
		self.inner
			.borrow_mut()
			.records
			.insert(key.to_string(), value.to_string());
	}

	/// Reads a raw record without going through a connection.
	pub fn record(&self, key: &str) -> Option<String> {
		self.inner.borrow().records.get(key).cloned()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.borrow().records.is_empty()
	}

	/// Number of times a connection was requested.
	pub fn connect_count(&self) -> usize {
		self.inner.borrow().connects
	}

	/// Number of successful writes.
	pub fn write_count(&self) -> usize {
		self.inner.borrow().writes
	}

	pub fn destroy_count(&self) -> usize {
		self.inner.borrow().destroys
	}
}

impl KvEngine for MemoryEngine {
	type Connection = MemoryConnection;

	fn connect(&self) -> LocalBoxFuture<'static, Result<MemoryConnection>> {
		let inner = self.inner.clone();
		inner.borrow_mut().connects += 1;
		async move {
			maybe_yield(&inner).await;
			if !inner.borrow().available {
				return Err(StoreError::StorageUnavailable(
					"memory engine disabled".into(),
				));
			}
			Ok(MemoryConnection { inner })
		}
		.boxed_local()
	}

	async fn get(&self, conn: &MemoryConnection, key: &str) -> Result<Option<String>> {
		maybe_yield(&conn.inner).await;
		let inner = conn.inner.borrow();
		if !inner.available {
			return Err(StoreError::StorageUnavailable("memory engine disabled".into()));
		}
		Ok(inner.records.get(key).cloned())
	}

	async fn set(&self, conn: &MemoryConnection, key: &str, value: &str) -> Result<()> {
		maybe_yield(&conn.inner).await;
		let mut inner = conn.inner.borrow_mut();
		if !inner.available {
			return Err(StoreError::StorageUnavailable("memory engine disabled".into()));
		}
		if inner.fail_writes {
			return Err(StoreError::Engine("quota exceeded".into()));
		}
		inner.records.insert(key.to_string(), value.to_string());
		inner.writes += 1;
		Ok(())
	}

	async fn remove(&self, conn: &MemoryConnection, key: &str) -> Result<()> {
		maybe_yield(&conn.inner).await;
		let mut inner = conn.inner.borrow_mut();
		if !inner.available {
			return Err(StoreError::StorageUnavailable("memory engine disabled".into()));
		}
		inner.records.remove(key);
		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		maybe_yield(&self.inner).await;
		let mut inner = self.inner.borrow_mut();
		inner.records.clear();
		inner.destroys += 1;
		Ok(())
	}
}

async fn maybe_yield(inner: &RefCell<MemoryInner>) {
	if inner.borrow().yielding {
		yield_now().await;
	}
}

/// Returns `Pending` once, waking itself, then completes.
pub(crate) async fn yield_now() {
	let mut yielded = false;
	futures::future::poll_fn(|cx| {
		if yielded {
			return Poll::Ready(());
		}
		yielded = true;
		cx.waker().wake_by_ref();
		Poll::Pending
	})
	.await;
}

/// A [`LegacyStore`] over a plain map.
#[derive(Debug, Clone, Default)]
pub struct MemoryLegacy {
	items: Rc<RefCell<BTreeMap<String, String>>>,
	broken: Rc<RefCell<bool>>,
}

impl MemoryLegacy {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds a legacy blob, as an older release would have left it.
	pub fn insert(&self, key: &str, value: &str) {
		self.items
			.borrow_mut()
			.insert(key.to_string(), value.to_string());
	}

	pub fn contains(&self, key: &str) -> bool {
		self.items.borrow().contains_key(key)
	}

	/// Makes every access fail, like a sandboxed iframe.
	pub fn set_broken(&self, broken: bool) {
		*self.broken.borrow_mut() = broken;
	}

	fn check(&self) -> Result<()> {
		if *self.broken.borrow() {
			return Err(StoreError::StorageUnavailable("legacy storage blocked".into()));
		}
		Ok(())
	}
}

impl LegacyStore for MemoryLegacy {
	fn get_item(&self, key: &str) -> Result<Option<String>> {
		self.check()?;
		Ok(self.items.borrow().get(key).cloned())
	}

	fn remove_item(&self, key: &str) -> Result<()> {
		self.check()?;
		self.items.borrow_mut().remove(key);
		Ok(())
	}
}
