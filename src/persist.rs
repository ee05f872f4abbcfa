//! Single-slot persistence queue.
//!
//! At most one snapshot write is in flight. A snapshot scheduled while a write
//! is running waits in the slot; a newer one replaces it. Writes therefore
//! complete in the order they were issued and the last one to land is always
//! the newest state.
//!
//! ```text
//! schedule(v1) ──► slot[v1] ──► worker ──► write v1 ─────────┐
//! schedule(v2) ──► slot[v2]                                  │
//! schedule(v3) ──► slot[v3]  (v2 dropped)  worker ◄──────────┘──► write v3
//! ```
//!
//! A wipe [suspends](Persister::suspend) the queue: the slot is emptied, the
//! running write is awaited, and nothing new starts until it resumes.

use crate::{JsonStorage, KvEngine};
use chrono::{DateTime, Utc};
use futures::channel::oneshot;
use futures::task::{LocalSpawn, LocalSpawnExt};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Outcome of the background writes, for callers that want to surface
/// degraded persistence instead of only reading the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistHealth {
	/// Version of the newest snapshot known to be durable.
	pub last_persisted_version: Option<u64>,
	pub last_success_at: Option<DateTime<Utc>>,
	pub last_failure_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
	/// Total failed writes since the store was created.
	pub failed_writes: u64,
	/// Whether the most recent attempt failed.
	pub last_attempt_failed: bool,
}

impl PersistHealth {
	pub fn last_persist_failed(&self) -> bool {
		self.last_attempt_failed
	}
}

struct PendingWrite {
	version: u64,
	snapshot: Value,
}

#[derive(Default)]
struct Queue {
	pending: Option<PendingWrite>,
	in_flight: bool,
	suspended: bool,
	idle_waiters: Vec<oneshot::Sender<()>>,
	health: PersistHealth,
}

impl Queue {
	fn next_write(&mut self) -> Option<PendingWrite> {
		if self.suspended {
			return None;
		}
		self.pending.take()
	}

	fn finish(&mut self) {
		self.in_flight = false;
		for waiter in self.idle_waiters.drain(..) {
			let _ = waiter.send(());
		}
	}
}

pub(crate) struct Persister<E: KvEngine> {
	queue: Rc<RefCell<Queue>>,
	storage: JsonStorage<E>,
	key: String,
	spawner: Rc<dyn LocalSpawn>,
}

impl<E: KvEngine> Persister<E> {
	pub(crate) fn new(storage: JsonStorage<E>, key: String, spawner: Rc<dyn LocalSpawn>) -> Self {
		Self {
			queue: Rc::new(RefCell::new(Queue::default())),
			storage,
			key,
			spawner,
		}
	}

	/// Queues `snapshot` and starts the worker if none is running.
	pub(crate) fn schedule(&self, version: u64, snapshot: Value) {
		let mut queue = self.queue.borrow_mut();
		if let Some(dropped) = queue.pending.replace(PendingWrite { version, snapshot }) {
			log::trace!("snapshot v{} superseded by v{version}", dropped.version);
		}
		drop(queue);
		self.start();
	}

	/// Drops the queued snapshot and waits for the running write to land.
	///
	/// Snapshots scheduled while the returned guard is alive wait in the slot;
	/// dropping the guard starts the newest of them.
	pub(crate) async fn suspend(&self) -> Suspension<'_, E> {
		let suspension = Suspension { persister: self };
		let idle = {
			let mut queue = self.queue.borrow_mut();
			queue.suspended = true;
			if let Some(dropped) = queue.pending.take() {
				log::debug!("discarding queued snapshot v{}", dropped.version);
			}
			if !queue.in_flight {
				return suspension;
			}
			let (sender, receiver) = oneshot::channel();
			queue.idle_waiters.push(sender);
			receiver
		};
		let _ = idle.await;
		suspension
	}

	fn resume(&self) {
		self.queue.borrow_mut().suspended = false;
		self.start();
	}

	fn start(&self) {
		{
			let mut queue = self.queue.borrow_mut();
			if queue.suspended || queue.in_flight || queue.pending.is_none() {
				return;
			}
			queue.in_flight = true;
		}

		let queue = self.queue.clone();
		let storage = self.storage.clone();
		let key = self.key.clone();
		let spawned = self.spawner.spawn_local(async move {
			loop {
				let next = queue.borrow_mut().next_write();
				let Some(write) = next else {
					queue.borrow_mut().finish();
					break;
				};

				let result = storage.set_item(&key, &write.snapshot).await;

				let mut state = queue.borrow_mut();
				let health = &mut state.health;
				match result {
					Ok(()) => {
						health.last_persisted_version = Some(write.version);
						health.last_success_at = Some(Utc::now());
						health.last_attempt_failed = false;
					}
					Err(e) => {
						health.last_error = Some(e.to_string());
						health.last_failure_at = Some(Utc::now());
						health.failed_writes += 1;
						health.last_attempt_failed = true;
					}
				}
			}
		});

		if let Err(e) = spawned {
			log::warn!("could not start persistence task, snapshot kept in memory only: {e}");
			let mut queue = self.queue.borrow_mut();
			queue.pending = None;
			queue.finish();
			queue.health.last_error = Some(e.to_string());
			queue.health.last_failure_at = Some(Utc::now());
			queue.health.failed_writes += 1;
			queue.health.last_attempt_failed = true;
		}
	}

	pub(crate) fn health(&self) -> PersistHealth {
		self.queue.borrow().health.clone()
	}

	pub(crate) fn is_idle(&self) -> bool {
		let queue = self.queue.borrow();
		!queue.in_flight && queue.pending.is_none()
	}
}

/// Holds the queue still; see [`Persister::suspend`].
pub(crate) struct Suspension<'a, E: KvEngine> {
	persister: &'a Persister<E>,
}

impl<E: KvEngine> Drop for Suspension<'_, E> {
	fn drop(&mut self) {
		self.persister.resume();
	}
}
