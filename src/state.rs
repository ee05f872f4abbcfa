//! Domain collections held by the store and their snapshot encoding.
//!
//! Collection values are plain JSON: the records come from the remote backend
//! and are only cached here, so the store does not impose a schema on them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Working set of an in-progress enrollment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistrationDraft {
	pub student: Map<String, Value>,
	pub documents: Vec<Value>,
	pub payment: Map<String, Value>,
}

impl RegistrationDraft {
	pub fn is_empty(&self) -> bool {
		self.student.is_empty() && self.documents.is_empty() && self.payment.is_empty()
	}
}

macro_rules! collections {
	($( $variant:ident => $field:ident : $ty:ty = $key:literal ),* $(,)?) => {
		/// Names a collection of [`SchoolState`].
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
		pub enum Collection {
			$( $variant, )*
		}

		impl Collection {
			pub const ALL: &'static [Collection] = &[$( Collection::$variant, )*];

			/// Key of this collection inside a persisted snapshot.
			pub fn key(self) -> &'static str {
				match self {
					$( Collection::$variant => $key, )*
				}
			}

			pub fn from_key(key: &str) -> Option<Self> {
				match key {
					$( $key => Some(Collection::$variant), )*
					_ => None,
				}
			}

			pub(crate) fn index(self) -> usize {
				self as usize
			}
		}

		/// Every cached collection, each defaulting to empty.
		#[derive(Debug, Clone, Default, PartialEq)]
		pub struct SchoolState {
			$( pub $field: $ty, )*
			/// Snapshot entries this build does not know about, written back
			/// untouched.
			pub extras: Map<String, Value>,
		}

		impl SchoolState {
			/// Replaces one collection from its snapshot value.
			///
			/// On a type mismatch the collection is left as it was.
			pub(crate) fn load(
				&mut self,
				collection: Collection,
				value: Value,
			) -> Result<(), serde_json::Error> {
				match collection {
					$( Collection::$variant => {
						self.$field = serde_json::from_value(value)?;
					} )*
				}
				Ok(())
			}

			/// Encodes the state as the snapshot's `state` object.
			pub fn to_map(&self) -> Map<String, Value> {
				let mut map = self.extras.clone();
				$(
					map.insert(
						$key.to_string(),
						serde_json::to_value(&self.$field).unwrap_or(Value::Null),
					);
				)*
				map
			}
		}
	};
}

collections! {
	Students => students: Vec<Value> = "students",
	Registrations => registrations: Vec<Value> = "registrations",
	Classes => classes: Vec<Value> = "classes",
	AcademicYears => academic_years: Vec<Value> = "academicYears",
	Pricing => pricing: Vec<Value> = "pricing",
	FeeTypes => fee_types: Vec<Value> = "feeTypes",
	Users => users: Vec<Value> = "users",
	Settings => settings: Map<String, Value> = "settings",
	CashRegisters => cash_registers: Vec<Value> = "cashRegisters",
	Permissions => permissions: Vec<Value> = "permissions",
	CurrentAcademicYear => current_academic_year: Option<Value> = "currentAcademicYear",
	CurrentUser => current_user: Option<Value> = "currentUser",
	Registration => registration: RegistrationDraft = "registration",
}

pub(crate) const COLLECTION_COUNT: usize = Collection::ALL.len();

/// Builds the persisted envelope around `state`.
pub(crate) fn envelope(state: &SchoolState, version: u64) -> Value {
	json!({
		"state": state.to_map(),
		"version": version,
		"savedAt": Utc::now().to_rfc3339(),
	})
}

/// Splits a stored snapshot into its state object and version.
///
/// Accepts the `{"state": {...}, "version": n}` envelope and, for blobs written
/// before the envelope existed, a bare state object.
pub(crate) fn open_envelope(snapshot: Value) -> Option<(Map<String, Value>, u64)> {
	let Value::Object(mut outer) = snapshot else {
		return None;
	};
	match outer.remove("state") {
		Some(Value::Object(state)) => {
			let version = outer.get("version").and_then(Value::as_u64).unwrap_or(0);
			Some((state, version))
		}
		Some(other) => {
			outer.insert("state".to_string(), other);
			Some((outer, 0))
		}
		None => Some((outer, 0)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_keys_round_trip() {
		for &collection in Collection::ALL {
			assert_eq!(Collection::from_key(collection.key()), Some(collection));
		}
		assert_eq!(Collection::from_key("nope"), None);
		assert_eq!(COLLECTION_COUNT, 13);
	}

	#[test]
	fn test_default_map_is_empty() {
		let map = SchoolState::default().to_map();
		assert_eq!(map["students"], json!([]));
		assert_eq!(map["settings"], json!({}));
		assert_eq!(map["currentUser"], Value::Null);
		assert_eq!(
			map["registration"],
			json!({"student": {}, "documents": [], "payment": {}})
		);
	}

	#[test]
	fn test_load_rejects_wrong_shape() {
		let mut state = SchoolState::default();
		state.students = vec![json!({"id": 1})];

		assert!(state.load(Collection::Students, json!({"not": "a list"})).is_err());
		assert_eq!(state.students, vec![json!({"id": 1})]);
	}

	#[test]
	fn test_partial_draft_fills_defaults() {
		let mut state = SchoolState::default();
		state
			.load(Collection::Registration, json!({"student": {"name": "Awa"}}))
			.unwrap();

		assert_eq!(state.registration.student["name"], "Awa");
		assert!(state.registration.documents.is_empty());
	}

	#[test]
	fn test_extras_are_written_back() {
		let mut state = SchoolState::default();
		state.extras.insert("timetables".into(), json!([1]));

		assert_eq!(state.to_map()["timetables"], json!([1]));
	}

	#[test]
	fn test_open_envelope() {
		let (state, version) =
			open_envelope(json!({"state": {"students": []}, "version": 7})).unwrap();
		assert!(state.contains_key("students"));
		assert_eq!(version, 7);

		let (state, version) = open_envelope(json!({"a": 1})).unwrap();
		assert_eq!(state["a"], 1);
		assert_eq!(version, 0);

		assert!(open_envelope(json!([1, 2])).is_none());
	}
}
