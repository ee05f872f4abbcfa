use thiserror::Error;

/// Failures raised by the storage layer.
///
/// Everything here is a soft failure from the application's point of view:
/// the adapter, migrator and store log these and degrade to "no data" or
/// "not persisted". Only explicit operations (raw [`KvAdapter`](crate::KvAdapter)
/// calls, [`StoreConfig`](crate::StoreConfig) parsing, data wipes) hand them
/// back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	/// The durable engine could not be opened (disabled, blocked, private mode).
	#[error("durable storage unavailable: {0}")]
	StorageUnavailable(String),

	/// A stored value could not be encoded or decoded as JSON.
	#[error("serialization failed: {0}")]
	Serialization(String),

	/// The engine opened but a request against it failed (quota, I/O).
	#[error("storage request failed: {0}")]
	Engine(String),

	/// Copying the legacy blob into durable storage failed.
	#[error("migration of legacy key `{key}` failed: {reason}")]
	MigrationFailure { key: String, reason: String },

	#[error("invalid configuration: {0}")]
	Config(String),
}

impl StoreError {
	pub(crate) fn engine(e: impl std::fmt::Display) -> Self {
		StoreError::Engine(e.to_string())
	}

	/// Returns `true` when the engine itself could not be reached.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, StoreError::StorageUnavailable(_))
	}
}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Serialization(e.to_string())
	}
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
