//! SQLite-backed Ban Ledger adapter.
//!
//! Stores at most one hell record per subject value, enforced with a
//! unique index and upsert writes. Expiry is interpreted by the engine;
//! the ledger only removes rows when asked to.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use archange_types::hell_adapter::{HellAdapter, HellMode, HellRecord, NewHellRecord};
use archange_types::prelude::*;

mod schema;

fn row_to_record(row: &SqliteRow) -> ArResult<HellRecord> {
	let mode: &str = row.try_get("mode").or(Err(Error::DbError))?;
	Ok(HellRecord {
		id: row.try_get("hell_id").or(Err(Error::DbError))?,
		subject_value: row.try_get::<String, _>("subject_value").or(Err(Error::DbError))?.into(),
		mode: mode.parse::<HellMode>()?,
		started_at: Timestamp(row.try_get("started_at").or(Err(Error::DbError))?),
		expires_at: Timestamp(row.try_get("expires_at").or(Err(Error::DbError))?),
	})
}

// HellAdapterSqlite //
//*******************//
#[derive(Debug)]
pub struct HellAdapterSqlite {
	db: SqlitePool,
}

impl HellAdapterSqlite {
	pub async fn new(path: impl AsRef<Path>) -> ArResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.map_err(|e| {
				error!("Failed to open hell ledger {}: {}", path.as_ref().display(), e);
				Error::DbError
			})?;

		schema::init_db(&db).await.map_err(|e| {
			error!("Failed to initialize hell ledger schema: {}", e);
			Error::DbError
		})?;

		Ok(Self { db })
	}
}

#[async_trait]
impl HellAdapter for HellAdapterSqlite {
	async fn find_by_value(&self, value: &str) -> ArResult<Option<HellRecord>> {
		let row = sqlx::query(
			"SELECT hell_id, subject_value, mode, started_at, expires_at
				FROM hell WHERE subject_value = ?",
		)
		.bind(value)
		.fetch_optional(&self.db)
		.await
		.map_err(|e| {
			error!("Failed to look up hell record for {}: {}", value, e);
			Error::DbError
		})?;

		row.as_ref().map(row_to_record).transpose()
	}

	async fn insert(&self, record: &NewHellRecord) -> ArResult<i64> {
		sqlx::query_scalar::<_, i64>(
			"INSERT INTO hell (subject_value, mode, started_at, expires_at)
				VALUES (?, ?, ?, ?)
				ON CONFLICT(subject_value) DO UPDATE SET
					mode = excluded.mode,
					started_at = excluded.started_at,
					expires_at = excluded.expires_at
				RETURNING hell_id",
		)
		.bind(&*record.subject_value)
		.bind(record.mode.as_str())
		.bind(record.started_at.0)
		.bind(record.expires_at.0)
		.fetch_one(&self.db)
		.await
		.map_err(|e| {
			error!("Failed to insert hell record for {}: {}", record.subject_value, e);
			Error::DbError
		})
	}

	async fn update(
		&self,
		id: i64,
		mode: HellMode,
		started_at: Timestamp,
		expires_at: Timestamp,
	) -> ArResult<Option<HellRecord>> {
		let row = sqlx::query(
			"UPDATE hell SET mode = ?, started_at = ?, expires_at = ?
				WHERE hell_id = ?
				RETURNING hell_id, subject_value, mode, started_at, expires_at",
		)
		.bind(mode.as_str())
		.bind(started_at.0)
		.bind(expires_at.0)
		.bind(id)
		.fetch_optional(&self.db)
		.await
		.map_err(|e| {
			error!("Failed to update hell record {}: {}", id, e);
			Error::DbError
		})?;

		row.as_ref().map(row_to_record).transpose()
	}

	async fn delete_by_id(&self, id: i64) -> ArResult<bool> {
		let result = sqlx::query("DELETE FROM hell WHERE hell_id = ?")
			.bind(id)
			.execute(&self.db)
			.await
			.map_err(|e| {
				error!("Failed to delete hell record {}: {}", id, e);
				Error::DbError
			})?;

		Ok(result.rows_affected() > 0)
	}

	async fn delete_expired(&self, now: Timestamp) -> ArResult<u32> {
		let result = sqlx::query("DELETE FROM hell WHERE expires_at != 0 AND expires_at < ?")
			.bind(now.0)
			.execute(&self.db)
			.await
			.map_err(|e| {
				error!("Failed to sweep expired hell records: {}", e);
				Error::DbError
			})?;

		Ok(result.rows_affected() as u32)
	}
}

// vim: ts=4
