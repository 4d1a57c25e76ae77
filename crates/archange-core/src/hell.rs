//! Ban state machine.
//!
//! An origin moves from no record to DELAYED to BLOCKED. Limiter
//! exhaustion while a DELAYED record is active escalates straight to
//! BLOCKED with the repeat-offense lifetime; exhaustion with no active
//! record draws on a rolling strike budget, yielding DELAYED while the
//! budget lasts and BLOCKED once it is spent. Ledger failures never reach
//! the admission path: every fallible call is logged and degraded to
//! "no record" (fail-open).

use std::sync::Arc;

use archange_types::adlogs::Adlogs;
use archange_types::hell_adapter::{HellAdapter, HellMode, HellRecord, NewHellRecord};
use archange_types::prelude::*;

use crate::registry::StrikeBudget;
use crate::settings::EngineConfig;

/// Event message emitted when an origin is pushed to DELAYED.
pub const EV_DELAYED: &str = "origin delayed";
/// Event message emitted when an origin is pushed to BLOCKED.
pub const EV_BLOCKED: &str = "origin blocked";
/// Event message emitted when an expired record is dropped on lookup.
pub const EV_EXPIRED: &str = "hell record expired";

// Escalation //
//************//
/// A ban decision that still has to be written to the ledger. Produced
/// inside the caller lock; persisted outside it.
#[derive(Clone, Debug)]
pub struct Escalation {
	pub record: NewHellRecord,
	/// Ledger id to update in place; `None` inserts a fresh record.
	pub update_id: Option<i64>,
}

// Hell //
//******//
pub struct Hell {
	adapter: Arc<dyn HellAdapter>,
	adlogs: Adlogs,
	delayed_lifetime_ms: i64,
	strike_budget: u32,
	strike_window_ms: i64,
	blocked_repeat_ms: i64,
	blocked_full_ms: i64,
}

impl Hell {
	pub fn new(adapter: Arc<dyn HellAdapter>, adlogs: Adlogs, config: &EngineConfig) -> Self {
		Self {
			adapter,
			adlogs,
			delayed_lifetime_ms: config.delayed_lifetime_ms,
			strike_budget: config.strike_budget,
			strike_window_ms: config.strike_window_ms,
			blocked_repeat_ms: config.blocked_repeat_ms,
			blocked_full_ms: config.blocked_full_ms,
		}
	}

	/// Look up the active ban record for a subject. Absent and expired
	/// records both resolve to `None`; an expired record is deleted as a
	/// side effect. A ledger failure resolves to `None` as well.
	pub async fn get_ban(&self, subject: &str) -> Option<HellRecord> {
		let record = match self.adapter.find_by_value(subject).await {
			Ok(record) => record?,
			Err(err) => {
				warn!("Hell lookup for {} failed, treating as not banned: {}", subject, err);
				return None;
			}
		};

		if record.is_expired(now()) {
			debug!("Hell record {} for {} has expired, dropping it", record.id, subject);
			self.adlogs.info("hell", EV_EXPIRED);
			if let Err(err) = self.adapter.delete_by_id(record.id).await {
				warn!("Failed to delete expired hell record {}: {}", record.id, err);
			}
			return None;
		}

		Some(record)
	}

	/// Decide the escalation for a limiter exhaustion. Pure in-memory
	/// logic, run while holding the caller lock; mutates the origin's
	/// strike budget.
	pub fn decide_escalation(
		&self,
		snapshot: Option<&HellRecord>,
		strikes: &mut StrikeBudget,
		subject: &str,
		now: Timestamp,
	) -> Escalation {
		// Repeat offense: exhaustion while a DELAYED record is still live
		// skips the budget entirely.
		if let Some(active) =
			snapshot.filter(|r| r.mode == HellMode::Delayed && !r.is_expired(now))
		{
			return Escalation {
				record: NewHellRecord {
					subject_value: subject.into(),
					mode: HellMode::Blocked,
					started_at: now,
					expires_at: now.saturating_add_ms(self.blocked_repeat_ms),
				},
				update_id: (active.id != 0).then_some(active.id),
			};
		}

		// The window anchors at the first strike of a full budget and is
		// reset lazily once a violation arrives after it lapsed.
		if strikes.remaining == self.strike_budget
			|| now.since(strikes.window_started_at) > self.strike_window_ms
		{
			strikes.remaining = self.strike_budget;
			strikes.window_started_at = now;
		}

		if strikes.remaining == 0 {
			strikes.remaining = self.strike_budget;
			strikes.window_started_at = now;
			Escalation {
				record: NewHellRecord {
					subject_value: subject.into(),
					mode: HellMode::Blocked,
					started_at: now,
					expires_at: now.saturating_add_ms(self.blocked_full_ms),
				},
				update_id: None,
			}
		} else {
			strikes.remaining -= 1;
			Escalation {
				record: NewHellRecord {
					subject_value: subject.into(),
					mode: HellMode::Delayed,
					started_at: now,
					expires_at: now.saturating_add_ms(self.delayed_lifetime_ms),
				},
				update_id: None,
			}
		}
	}

	/// Write an escalation to the ledger and return the resulting record.
	/// On ledger failure the record is returned with `id == 0`; it still
	/// denies the offending request from the in-memory snapshot.
	pub async fn persist_escalation(&self, escalation: Escalation) -> HellRecord {
		let Escalation { record, update_id } = escalation;

		let event = match record.mode {
			HellMode::Delayed => EV_DELAYED,
			HellMode::Blocked => EV_BLOCKED,
		};
		self.adlogs.warning("hell", event);
		debug!(
			"Escalating {} to {} until {}",
			record.subject_value, record.mode, record.expires_at.0
		);

		if let Some(id) = update_id {
			match self.adapter.update(id, record.mode, record.started_at, record.expires_at).await
			{
				Ok(Some(updated)) => return updated,
				// Row disappeared under us, fall through to a fresh insert.
				Ok(None) => {}
				Err(err) => {
					warn!("Failed to update hell record {}: {}", id, err);
					return Self::unpersisted(record);
				}
			}
		}

		match self.adapter.insert(&record).await {
			Ok(id) => HellRecord {
				id,
				subject_value: record.subject_value,
				mode: record.mode,
				started_at: record.started_at,
				expires_at: record.expires_at,
			},
			Err(err) => {
				warn!("Failed to persist hell record for {}: {}", record.subject_value, err);
				Self::unpersisted(record)
			}
		}
	}

	/// One-time startup sweep of expired ledger rows.
	pub async fn sweep_expired(&self) {
		match self.adapter.delete_expired(now()).await {
			Ok(count) => {
				self.adlogs
					.info("hell", &format!("hell sweep removed {} expired records", count));
			}
			Err(err) => {
				warn!("Hell startup sweep failed: {}", err);
				self.adlogs.warning("hell", "hell sweep failed, expired records left in place");
			}
		}
	}

	fn unpersisted(record: NewHellRecord) -> HellRecord {
		HellRecord {
			id: 0,
			subject_value: record.subject_value,
			mode: record.mode,
			started_at: record.started_at,
			expires_at: record.expires_at,
		}
	}
}


// vim: ts=4
