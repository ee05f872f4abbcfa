use crate::error::Result;
use crate::persist::Persister;
use crate::state::{envelope, open_envelope, COLLECTION_COUNT};
use crate::{
	Collection, JsonStorage, KvAdapter, KvEngine, LegacyStore, MigrationGuard, Migrator,
	PersistHealth, RegistrationDraft, SchoolState, StoreConfig,
};
use futures::channel::oneshot;
use futures::task::LocalSpawn;
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Indicates whether the store's writes reach durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceState {
	/// The engine opened during hydration. State survives a reload.
	Persisted,
	/// The engine could not be opened (private browsing, storage blocked,
	/// etc). State lives in memory only; the remote backend remains the
	/// source of truth and can repopulate it after a reload.
	MemoryOnly,
}

/// Lifecycle of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationPhase {
	Uninitialized,
	Hydrating,
	Ready,
}

/// Handle returned by [`SchoolStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Rc<dyn Fn(Collection)>;

struct Inner<E: KvEngine> {
	config: StoreConfig,
	storage: JsonStorage<E>,
	persister: Persister<E>,
	state: RefCell<SchoolState>,
	phases: RefCell<[HydrationPhase; COLLECTION_COUNT]>,
	hydration_started: Cell<bool>,
	hydrated: Cell<bool>,
	/// Callers waiting on a hydration another caller is running.
	hydration_waiters: RefCell<Vec<oneshot::Sender<()>>>,
	/// A setter ran before hydration finished; persist once it has.
	persist_deferred: Cell<bool>,
	version: Cell<u64>,
	persistence_state: Cell<PersistenceState>,
	listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
	next_subscription: Cell<u64>,
}

/// The dashboard's cache of reference data.
///
/// Every setter replaces its collection synchronously, so the next read sees
/// the new value, and then queues a write of the whole snapshot. The write is
/// never awaited by the setter and its failure never reaches the caller; see
/// [`persist_health()`](Self::persist_health) for the outcome.
///
/// The handle is cheap to clone; clones share the same state. It is
/// single-threaded (`!Send`), like the event loop it serves.
///
/// # Examples
/// ```
/// use futures::executor::LocalPool;
/// use schoolstate::{MemoryEngine, MemoryLegacy, MigrationGuard, SchoolStore, StoreConfig};
/// use serde_json::json;
/// use std::rc::Rc;
///
/// let mut pool = LocalPool::new();
/// let engine = MemoryEngine::new();
/// let store = SchoolStore::new(StoreConfig::default(), engine, Rc::new(pool.spawner()));
/// pool.run_until(store.hydrate(&MemoryLegacy::new(), &MigrationGuard::scoped()));
///
/// store.set_students(vec![json!({"id": 1, "name": "A"})]);
/// assert_eq!(store.students(), vec![json!({"id": 1, "name": "A"})]);
///
/// // Let the background write land.
/// pool.run_until_stalled();
/// assert!(store.is_persist_idle());
/// ```
pub struct SchoolStore<E: KvEngine> {
	inner: Rc<Inner<E>>,
}

impl<E: KvEngine> Clone for SchoolStore<E> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<E: KvEngine> SchoolStore<E> {
	/// Creates an empty, not yet hydrated store.
	///
	/// Readers see empty collections until [`hydrate()`](Self::hydrate)
	/// completes. Background writes are spawned on `spawner`.
	pub fn new(config: StoreConfig, engine: E, spawner: Rc<dyn LocalSpawn>) -> Self {
		let storage = JsonStorage::new(Rc::new(KvAdapter::new(engine)));
		let persister = Persister::new(storage.clone(), config.snapshot_key.clone(), spawner);

		Self {
			inner: Rc::new(Inner {
				config,
				storage,
				persister,
				state: RefCell::new(SchoolState::default()),
				phases: RefCell::new([HydrationPhase::Uninitialized; COLLECTION_COUNT]),
				hydration_started: Cell::new(false),
				hydrated: Cell::new(false),
				hydration_waiters: RefCell::new(Vec::new()),
				persist_deferred: Cell::new(false),
				version: Cell::new(0),
				persistence_state: Cell::new(PersistenceState::MemoryOnly),
				listeners: RefCell::new(Vec::new()),
				next_subscription: Cell::new(0),
			}),
		}
	}

	/// Creates and hydrates a store, migrating legacy data at most once per
	/// process.
	pub async fn init<L: LegacyStore>(
		config: StoreConfig,
		engine: E,
		legacy: &L,
		spawner: Rc<dyn LocalSpawn>,
	) -> Self {
		let store = Self::new(config, engine, spawner);
		store.hydrate(legacy, &MigrationGuard::process()).await;
		store
	}

	/// Loads the persisted snapshot into memory.
	///
	/// Runs the legacy migration first when `guard` has not been claimed yet.
	/// Never fails: an unavailable engine or an unreadable snapshot leaves the
	/// collections empty. Only the first call does the work; calls made while
	/// it runs wait for it, and later calls return at once.
	pub async fn hydrate<L: LegacyStore>(&self, legacy: &L, guard: &MigrationGuard) {
		let inner: &Inner<E> = &self.inner;
		loop {
			if inner.hydrated.get() {
				return;
			}
			if !inner.hydration_started.replace(true) {
				break;
			}
			let (sender, receiver) = oneshot::channel();
			inner.hydration_waiters.borrow_mut().push(sender);
			if receiver.await.is_ok() {
				return;
			}
			// The hydrating caller was dropped before finishing; take over.
		}
		let _reopen = ReopenIfAbandoned(inner);

		for phase in inner.phases.borrow_mut().iter_mut() {
			if *phase == HydrationPhase::Uninitialized {
				*phase = HydrationPhase::Hydrating;
			}
		}

		let adapter = inner.storage.adapter();
		let key = &inner.config.snapshot_key;

		if guard.try_claim() {
			Migrator::new(legacy, &inner.config.legacy_key, key)
				.migrate(adapter)
				.await;
		}

		let snapshot = match adapter.open().await {
			Ok(_) => {
				inner.persistence_state.set(PersistenceState::Persisted);
				inner.storage.get_item::<Value>(key).await
			}
			Err(e) => {
				log::warn!(
					"durable storage unavailable ({e}), falling back to memory-only state. \
					 Collections will be refetched after a reload."
				);
				inner.persistence_state.set(PersistenceState::MemoryOnly);
				None
			}
		};

		match snapshot {
			Some(snapshot) => self.merge(snapshot),
			None => log::debug!("no snapshot under `{key}`, starting empty"),
		}

		inner
			.phases
			.borrow_mut()
			.fill(HydrationPhase::Ready);
		inner.hydrated.set(true);

		for &collection in Collection::ALL {
			self.notify(collection);
		}
		if inner.persist_deferred.take() {
			self.persist();
		}
		for waiter in inner.hydration_waiters.take() {
			let _ = waiter.send(());
		}
	}

	fn merge(&self, snapshot: Value) {
		let Some((entries, version)) = open_envelope(snapshot) else {
			log::warn!("stored snapshot is not an object, ignoring it");
			return;
		};
		let inner = &self.inner;
		inner.version.set(inner.version.get().max(version));

		let phases = inner.phases.borrow();
		let mut state = inner.state.borrow_mut();
		for (key, value) in entries {
			match Collection::from_key(&key) {
				// Set while hydrating; the newer value wins.
				Some(collection) if phases[collection.index()] == HydrationPhase::Ready => {}
				Some(collection) => {
					if let Err(e) = state.load(collection, value) {
						log::warn!("ignoring malformed `{key}` in snapshot: {e}");
					}
				}
				None => {
					state.extras.insert(key, value);
				}
			}
		}
	}

	fn update(&self, collection: Collection, apply: impl FnOnce(&mut SchoolState)) {
		apply(&mut self.inner.state.borrow_mut());
		self.inner.phases.borrow_mut()[collection.index()] = HydrationPhase::Ready;
		self.persist();
		self.notify(collection);
	}

	fn persist(&self) {
		let inner = &self.inner;
		if !inner.hydrated.get() {
			inner.persist_deferred.set(true);
			return;
		}
		let version = inner.version.get() + 1;
		inner.version.set(version);
		let snapshot = envelope(&inner.state.borrow(), version);
		inner.persister.schedule(version, snapshot);
	}

	fn notify(&self, collection: Collection) {
		let listeners: Vec<Listener> = self
			.inner
			.listeners
			.borrow()
			.iter()
			.map(|(_, listener)| listener.clone())
			.collect();
		for listener in listeners {
			listener(collection);
		}
	}

	/// Calls `listener` with the collection that changed, after every setter
	/// and once per collection when hydration completes.
	pub fn subscribe(&self, listener: impl Fn(Collection) + 'static) -> SubscriptionId {
		let id = SubscriptionId(self.inner.next_subscription.get());
		self.inner.next_subscription.set(id.0 + 1);
		self.inner
			.listeners
			.borrow_mut()
			.push((id, Rc::new(listener)));
		id
	}

	/// Returns `false` if `id` was not subscribed.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut listeners = self.inner.listeners.borrow_mut();
		let before = listeners.len();
		listeners.retain(|(other, _)| *other != id);
		listeners.len() != before
	}

	/// Discards the registration wizard's draft and nothing else.
	pub fn reset_registration(&self) {
		self.update(Collection::Registration, |state| {
			state.registration = RegistrationDraft::default();
		});
	}

	/// Route-change hook: leaving the registration wizard drops its draft so
	/// an abandoned enrollment does not leak into the next one.
	pub fn on_navigate(&self, from: &str, to: &str) {
		let route = self.inner.config.registration_route.as_str();
		if within_route(from, route) && !within_route(to, route) {
			log::debug!("left registration wizard ({from} -> {to}), discarding draft");
			self.reset_registration();
		}
	}

	pub fn phase(&self, collection: Collection) -> HydrationPhase {
		self.inner.phases.borrow()[collection.index()]
	}

	/// Returns `true` once hydration has completed.
	pub fn is_hydrated(&self) -> bool {
		self.inner.hydrated.get()
	}

	pub fn persistence_state(&self) -> PersistenceState {
		self.inner.persistence_state.get()
	}

	pub fn is_persisted(&self) -> bool {
		self.persistence_state() == PersistenceState::Persisted
	}

	pub fn persist_health(&self) -> PersistHealth {
		self.inner.persister.health()
	}

	/// Returns `true` when no snapshot write is queued or running.
	pub fn is_persist_idle(&self) -> bool {
		self.inner.persister.is_idle()
	}

	/// A copy of every collection.
	pub fn state(&self) -> SchoolState {
		self.inner.state.borrow().clone()
	}

	pub fn config(&self) -> &StoreConfig {
		&self.inner.config
	}

	/// Deletes the persisted snapshot and the database holding it.
	///
	/// A snapshot still queued from an earlier setter is discarded and a write
	/// already running is awaited first, so neither lands after the wipe.
	/// In-memory collections are left as they are; the next setter writes a
	/// fresh snapshot into a recreated database.
	pub async fn clear_all_data(&self) -> Result<()> {
		let _suspension = self.inner.persister.suspend().await;
		let adapter = self.inner.storage.adapter();
		let removed = adapter.remove(&self.inner.config.snapshot_key).await;
		let destroyed = adapter.destroy().await;
		match removed.and(destroyed) {
			Ok(()) => {
				log::info!("cleared persisted state");
				Ok(())
			}
			Err(e) => {
				log::warn!("clearing persisted state failed: {e}");
				Err(e)
			}
		}
	}
}

/// Hands hydration to the next caller if the running one is dropped midway.
struct ReopenIfAbandoned<'a, E: KvEngine>(&'a Inner<E>);

impl<E: KvEngine> Drop for ReopenIfAbandoned<'_, E> {
	fn drop(&mut self) {
		if self.0.hydrated.get() {
			return;
		}
		self.0.hydration_started.set(false);
		// Dropping the senders wakes the waiters so one of them takes over.
		self.0.hydration_waiters.borrow_mut().clear();
	}
}

fn within_route(path: &str, route: &str) -> bool {
	match path.strip_prefix(route) {
		Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
		None => false,
	}
}

macro_rules! accessors {
	($( $(#[$doc:meta])* $field:ident, $setter:ident: $ty:ty => $variant:ident; )*) => {
		impl<E: KvEngine> SchoolStore<E> {
			$(
				$(#[$doc])*
				pub fn $field(&self) -> $ty {
					self.inner.state.borrow().$field.clone()
				}

				pub fn $setter(&self, value: $ty) {
					self.update(Collection::$variant, move |state| state.$field = value);
				}
			)*
		}
	};
}

accessors! {
	students, set_students: Vec<Value> => Students;
	registrations, set_registrations: Vec<Value> => Registrations;
	classes, set_classes: Vec<Value> => Classes;
	academic_years, set_academic_years: Vec<Value> => AcademicYears;
	/// Tariff lines per class and fee type.
	pricing, set_pricing: Vec<Value> => Pricing;
	fee_types, set_fee_types: Vec<Value> => FeeTypes;
	users, set_users: Vec<Value> => Users;
	settings, set_settings: Map<String, Value> => Settings;
	cash_registers, set_cash_registers: Vec<Value> => CashRegisters;
	permissions, set_permissions: Vec<Value> => Permissions;
	/// The academic year the dashboard is scoped to, if one was chosen.
	current_academic_year, set_current_academic_year: Option<Value> => CurrentAcademicYear;
	/// The signed-in user, if any.
	current_user, set_current_user: Option<Value> => CurrentUser;
	/// Draft of the enrollment wizard. Cleared by
	/// [`reset_registration()`](Self::reset_registration).
	registration, set_registration: RegistrationDraft => Registration;
}
