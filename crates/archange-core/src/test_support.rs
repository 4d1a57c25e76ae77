//! Test doubles for the Ban Ledger.

use async_trait::async_trait;
use parking_lot::Mutex;

use archange_types::hell_adapter::{HellAdapter, HellMode, HellRecord, NewHellRecord};
use archange_types::prelude::*;

/// In-memory ledger with upsert semantics, mirroring the SQLite adapter.
pub struct MemoryHellAdapter {
	records: Mutex<Vec<HellRecord>>,
	next_id: Mutex<i64>,
}

impl MemoryHellAdapter {
	pub fn new() -> Self {
		Self { records: Mutex::new(Vec::new()), next_id: Mutex::new(1) }
	}
}

#[async_trait]
impl HellAdapter for MemoryHellAdapter {
	async fn find_by_value(&self, value: &str) -> ArResult<Option<HellRecord>> {
		Ok(self.records.lock().iter().find(|r| &*r.subject_value == value).cloned())
	}

	async fn insert(&self, record: &NewHellRecord) -> ArResult<i64> {
		let mut records = self.records.lock();
		records.retain(|r| r.subject_value != record.subject_value);

		let mut next_id = self.next_id.lock();
		let id = *next_id;
		*next_id += 1;

		records.push(HellRecord {
			id,
			subject_value: record.subject_value.clone(),
			mode: record.mode,
			started_at: record.started_at,
			expires_at: record.expires_at,
		});
		Ok(id)
	}

	async fn update(
		&self,
		id: i64,
		mode: HellMode,
		started_at: Timestamp,
		expires_at: Timestamp,
	) -> ArResult<Option<HellRecord>> {
		let mut records = self.records.lock();
		match records.iter_mut().find(|r| r.id == id) {
			Some(record) => {
				record.mode = mode;
				record.started_at = started_at;
				record.expires_at = expires_at;
				Ok(Some(record.clone()))
			}
			None => Ok(None),
		}
	}

	async fn delete_by_id(&self, id: i64) -> ArResult<bool> {
		let mut records = self.records.lock();
		let before = records.len();
		records.retain(|r| r.id != id);
		Ok(records.len() < before)
	}

	async fn delete_expired(&self, now: Timestamp) -> ArResult<u32> {
		let mut records = self.records.lock();
		let before = records.len();
		records.retain(|r| !r.is_expired(now));
		Ok((before - records.len()) as u32)
	}
}

/// Ledger that fails every call, for fail-open coverage.
pub struct FailingHellAdapter;

#[async_trait]
impl HellAdapter for FailingHellAdapter {
	async fn find_by_value(&self, _value: &str) -> ArResult<Option<HellRecord>> {
		Err(Error::DbError)
	}

	async fn insert(&self, _record: &NewHellRecord) -> ArResult<i64> {
		Err(Error::DbError)
	}

	async fn update(
		&self,
		_id: i64,
		_mode: HellMode,
		_started_at: Timestamp,
		_expires_at: Timestamp,
	) -> ArResult<Option<HellRecord>> {
		Err(Error::DbError)
	}

	async fn delete_by_id(&self, _id: i64) -> ArResult<bool> {
		Err(Error::DbError)
	}

	async fn delete_expired(&self, _now: Timestamp) -> ArResult<u32> {
		Err(Error::DbError)
	}
}

// vim: ts=4
