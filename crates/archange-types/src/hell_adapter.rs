//! Ban Ledger adapter trait.
//!
//! The Ban Ledger is the only suspending collaborator of the admission
//! engine: every other decision is made on in-memory state. Implementations
//! own the durable record of delayed/blocked identities and their expiry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ArResult;
use crate::types::Timestamp;

// HellMode //
//**********//
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HellMode {
	Delayed,
	Blocked,
}

impl HellMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			HellMode::Delayed => "DELAYED",
			HellMode::Blocked => "BLOCKED",
		}
	}
}

impl std::fmt::Display for HellMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for HellMode {
	type Err = crate::error::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"DELAYED" => Ok(HellMode::Delayed),
			"BLOCKED" => Ok(HellMode::Blocked),
			_ => Err(crate::error::Error::Internal(
				format!("unknown hell mode: {}", s).into(),
			)),
		}
	}
}

// HellRecord //
//************//
/// A persisted ban record. At most one active record exists per
/// `subject_value`; an expired record is treated as absent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HellRecord {
	pub id: i64,
	pub subject_value: Box<str>,
	pub mode: HellMode,
	pub started_at: Timestamp,
	/// `Timestamp::NEVER` (0) means the record never auto-expires.
	pub expires_at: Timestamp,
}

impl HellRecord {
	pub fn is_expired(&self, now: Timestamp) -> bool {
		self.expires_at != Timestamp::NEVER && self.expires_at < now
	}
}

/// Fields for a record that has not been assigned a ledger id yet.
#[derive(Clone, Debug)]
pub struct NewHellRecord {
	pub subject_value: Box<str>,
	pub mode: HellMode,
	pub started_at: Timestamp,
	pub expires_at: Timestamp,
}

// HellAdapter //
//*************//
#[async_trait]
pub trait HellAdapter: Send + Sync {
	/// Look up the active record for a subject value (fingerprint hash or
	/// caller identity value). Expiry is not evaluated here; callers decide.
	async fn find_by_value(&self, value: &str) -> ArResult<Option<HellRecord>>;

	/// Insert a record, replacing any existing record for the same subject
	/// value (upsert semantics). Returns the ledger id.
	async fn insert(&self, record: &NewHellRecord) -> ArResult<i64>;

	/// Update mode and lifetime of an existing record. Returns the updated
	/// record, or `None` if the id is gone.
	async fn update(
		&self,
		id: i64,
		mode: HellMode,
		started_at: Timestamp,
		expires_at: Timestamp,
	) -> ArResult<Option<HellRecord>>;

	/// Delete a record by id. Returns whether a row was removed.
	async fn delete_by_id(&self, id: i64) -> ArResult<bool>;

	/// Delete every record whose expiry has passed. Returns the count of
	/// removed rows. Records with `expires_at == 0` are never touched.
	async fn delete_expired(&self, now: Timestamp) -> ArResult<u32>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hell_mode_serde() {
		let json = serde_json::to_string(&HellMode::Blocked).unwrap();
		assert_eq!(json, "\"BLOCKED\"");
		let mode: HellMode = serde_json::from_str("\"DELAYED\"").unwrap();
		assert_eq!(mode, HellMode::Delayed);
	}

	#[test]
	fn test_hell_mode_parse() {
		assert_eq!("BLOCKED".parse::<HellMode>().unwrap(), HellMode::Blocked);
		assert!("blocked".parse::<HellMode>().is_err());
	}

	#[test]
	fn test_record_expiry() {
		let record = HellRecord {
			id: 1,
			subject_value: "fp".into(),
			mode: HellMode::Delayed,
			started_at: Timestamp(1_000),
			expires_at: Timestamp(2_000),
		};
		assert!(!record.is_expired(Timestamp(1_500)));
		assert!(!record.is_expired(Timestamp(2_000)));
		assert!(record.is_expired(Timestamp(2_001)));
	}

	#[test]
	fn test_permanent_record_never_expires() {
		let record = HellRecord {
			id: 1,
			subject_value: "fp".into(),
			mode: HellMode::Blocked,
			started_at: Timestamp(1_000),
			expires_at: Timestamp::NEVER,
		};
		assert!(!record.is_expired(Timestamp(i64::MAX)));
	}
}

// vim: ts=4
