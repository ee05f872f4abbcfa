use crate::error::{Result, StoreError};
use toml_edit::DocumentMut;

/// Database that holds the persisted dashboard state.
pub const DEFAULT_DATABASE_NAME: &str = "school-admin";
/// Record space (object store) inside [`DEFAULT_DATABASE_NAME`].
pub const DEFAULT_STORE_NAME: &str = "keyval";
/// Key under which the full state snapshot is written.
pub const DEFAULT_SNAPSHOT_KEY: &str = "school-store";
/// Key the synchronous legacy mechanism used for the same snapshot.
pub const DEFAULT_LEGACY_KEY: &str = "school-store";
/// Route prefix of the enrollment wizard.
pub const DEFAULT_REGISTRATION_ROUTE: &str = "/registration";

/// Configuration for the school state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
	/// Name of the durable database.
	pub database_name: String,
	/// Name of the record space inside the database.
	pub store_name: String,
	/// Key of the persisted snapshot.
	pub snapshot_key: String,
	/// Key read (once) from the legacy mechanism during migration.
	pub legacy_key: String,
	/// Leaving any route under this prefix discards the registration draft.
	pub registration_route: String,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			database_name: DEFAULT_DATABASE_NAME.to_string(),
			store_name: DEFAULT_STORE_NAME.to_string(),
			snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
			legacy_key: DEFAULT_LEGACY_KEY.to_string(),
			registration_route: DEFAULT_REGISTRATION_ROUTE.to_string(),
		}
	}
}

impl StoreConfig {
	/// Reads the `[store]` table of a TOML document.
	///
	/// Every field is optional and falls back to its default. A missing
	/// `[store]` table yields the default configuration.
	///
	/// ```
	/// use schoolstate::StoreConfig;
	///
	/// let config = StoreConfig::from_toml_str(
	///     r#"
	///     [store]
	///     database = "campus-nord"
	///     snapshot_key = "state"
	///     "#,
	/// )
	/// .unwrap();
	///
	/// assert_eq!(config.database_name, "campus-nord");
	/// assert_eq!(config.snapshot_key, "state");
	/// assert_eq!(config.store_name, "keyval");
	/// ```
	pub fn from_toml_str(source: &str) -> Result<Self> {
		let doc = source
			.parse::<DocumentMut>()
			.map_err(|e| StoreError::Config(e.to_string()))?;

		let mut config = Self::default();
		let Some(item) = doc.get("store") else {
			return Ok(config);
		};
		let table = item
			.as_table_like()
			.ok_or_else(|| StoreError::Config("`store` must be a table".into()))?;

		let fields: [(&str, &mut String); 5] = [
			("database", &mut config.database_name),
			("record_space", &mut config.store_name),
			("snapshot_key", &mut config.snapshot_key),
			("legacy_key", &mut config.legacy_key),
			("registration_route", &mut config.registration_route),
		];
		for (name, slot) in fields {
			if let Some(value) = table.get(name) {
				let value = value
					.as_str()
					.ok_or_else(|| StoreError::Config(format!("`store.{name}` must be a string")))?;
				*slot = value.to_string();
			}
		}

		config.validate()?;
		Ok(config)
	}

	/// Rejects configurations that would address no storage at all, or whose
	/// registration route could never be left.
	pub fn validate(&self) -> Result<()> {
		let required = [
			("database", &self.database_name),
			("record_space", &self.store_name),
			("snapshot_key", &self.snapshot_key),
			("legacy_key", &self.legacy_key),
		];
		for (name, value) in required {
			if value.trim().is_empty() {
				return Err(StoreError::Config(format!("`store.{name}` must not be empty")));
			}
		}

		// An empty route matches every path, so leaving the wizard would never
		// be detected.
		let route = self.registration_route.as_str();
		if !route.starts_with('/') || route.len() < 2 || route.ends_with('/') {
			return Err(StoreError::Config(format!(
				"`store.registration_route` must be an absolute path like \"/registration\", got {route:?}"
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_missing_table_yields_defaults() {
		let config = StoreConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
		assert_eq!(config, StoreConfig::default());
	}

	#[test]
	fn test_all_fields_read() {
		let config = StoreConfig::from_toml_str(
			r#"
			[store]
			database = "db"
			record_space = "rs"
			snapshot_key = "snap"
			legacy_key = "old"
			registration_route = "/enroll"
			"#,
		)
		.unwrap();

		assert_eq!(config.database_name, "db");
		assert_eq!(config.store_name, "rs");
		assert_eq!(config.snapshot_key, "snap");
		assert_eq!(config.legacy_key, "old");
		assert_eq!(config.registration_route, "/enroll");
	}

	#[test]
	fn test_rejects_non_string_field() {
		let err = StoreConfig::from_toml_str("[store]\ndatabase = 3\n").unwrap_err();
		assert!(matches!(err, StoreError::Config(_)));
	}

	#[test]
	fn test_rejects_empty_key() {
		let err = StoreConfig::from_toml_str("[store]\nsnapshot_key = \"  \"\n").unwrap_err();
		assert_eq!(
			err,
			StoreError::Config("`store.snapshot_key` must not be empty".into())
		);
	}

	#[test]
	fn test_rejects_unusable_registration_route() {
		for route in ["", "registration", "/", "/registration/"] {
			let config = StoreConfig {
				registration_route: route.to_string(),
				..StoreConfig::default()
			};
			assert!(
				matches!(config.validate(), Err(StoreError::Config(_))),
				"{route:?} should be rejected"
			);
		}

		let err = StoreConfig::from_toml_str("[store]\nregistration_route = \"\"\n").unwrap_err();
		assert!(matches!(err, StoreError::Config(_)));
		assert!(StoreConfig::default().validate().is_ok());
	}

	#[test]
	fn test_rejects_malformed_document() {
		assert!(StoreConfig::from_toml_str("[store\n").is_err());
	}
}
