//! Caller and origin registry.
//!
//! Process-wide map from identity value to caller. Each caller owns the
//! origins seen under it, one per device/browser fingerprint, each origin
//! carrying its own token bucket, strike budget and cached ban snapshot.
//! Lookup-or-create and bucket accounting are serialized (registry lock,
//! then per-caller mutex) so concurrent requests for the same identity
//! cannot double-create state or double-admit past the limit.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use archange_types::hell_adapter::HellRecord;
use archange_types::prelude::*;

use crate::bucket::TokenBucket;
use crate::fingerprint::fingerprint_hash;
use crate::origin::{CallerIdentity, RequestOrigin};
use crate::ua::UserAgent;

// StrikeBudget //
//**************//
/// Rolling budget of tolerated delay-level violations. The window anchors
/// at the first strike and is reset lazily on the next violation after it
/// lapses.
#[derive(Clone, Copy, Debug)]
pub struct StrikeBudget {
	pub remaining: u32,
	pub window_started_at: Timestamp,
}

impl StrikeBudget {
	pub fn new(budget: u32, now: Timestamp) -> Self {
		Self { remaining: budget, window_started_at: now }
	}
}

// Origin //
//********//
/// One distinguishable device/browser combination under a caller.
#[derive(Clone, Debug)]
pub struct Origin {
	pub fingerprint: Box<str>,
	pub client_ip: Box<str>,
	pub user_agent: UserAgent,
	pub created_at: Timestamp,
	pub last_access_at: Timestamp,
	pub request_count: u64,
	pub bucket: TokenBucket,
	/// Cached ban state, `None` until seeded from the ledger.
	pub hell_snapshot: Option<HellRecord>,
	pub strikes: StrikeBudget,
}

impl Origin {
	fn new(
		fingerprint: Box<str>,
		origin: &RequestOrigin,
		capacity: i32,
		strike_budget: u32,
		now: Timestamp,
	) -> Self {
		Self {
			fingerprint,
			client_ip: origin.client_ip.clone(),
			user_agent: origin.user_agent.clone(),
			created_at: now,
			last_access_at: now,
			request_count: 0,
			bucket: TokenBucket::new(capacity, now),
			hell_snapshot: None,
			strikes: StrikeBudget::new(strike_budget, now),
		}
	}

	/// Per-request accounting, run before the bucket decision.
	pub fn touch(&mut self, now: Timestamp) {
		self.last_access_at = now;
		self.request_count += 1;
	}
}

// Caller //
//********//
/// An admission-tracked identity. Lives for the rest of the process once
/// created.
#[derive(Clone, Debug)]
pub struct Caller {
	pub identity: CallerIdentity,
	pub identity_value: Box<str>,
	/// False when the caller claimed an API key the registry does not know.
	pub authorized: bool,
	pub created_at: Timestamp,
	pub origins: Vec<Origin>,
	/// Caller-level ban snapshot, seeded alongside the first origin.
	pub hell_snapshot: Option<HellRecord>,
}

// Resolved //
//**********//
/// Outcome of a registry resolution. The `new_*` flags tell the caller
/// which ledger seedings are still owed for this entry.
pub struct Resolved {
	pub caller: Arc<Mutex<Caller>>,
	pub origin_index: usize,
	pub fingerprint: Box<str>,
	pub new_caller: bool,
	pub new_origin: bool,
}

// CallerRegistry //
//****************//
pub struct CallerRegistry {
	callers: RwLock<HashMap<Box<str>, Arc<Mutex<Caller>>>>,
}

impl CallerRegistry {
	pub fn new() -> Self {
		Self { callers: RwLock::new(HashMap::new()) }
	}

	/// Resolve the caller and origin for a classified request, creating
	/// either as needed.
	pub fn get_or_create(
		&self,
		origin: &RequestOrigin,
		ua_raw: &str,
		capacity: i32,
		strike_budget: u32,
		now: Timestamp,
	) -> Resolved {
		let fingerprint =
			fingerprint_hash(ua_raw, &origin.identity_value, &origin.client_ip);

		// Fast path: caller already known.
		let existing = self.callers.read().get(&origin.identity_value).cloned();
		if let Some(caller) = existing {
			let (origin_index, new_origin) = Self::check_add_origin(
				&caller,
				origin,
				&fingerprint,
				capacity,
				strike_budget,
				now,
			);
			return Resolved { caller, origin_index, fingerprint, new_caller: false, new_origin };
		}

		// Slow path: take the write lock and re-check, another request may
		// have created the caller in the meantime.
		let mut callers = self.callers.write();
		if let Some(caller) = callers.get(&origin.identity_value).cloned() {
			drop(callers);
			let (origin_index, new_origin) = Self::check_add_origin(
				&caller,
				origin,
				&fingerprint,
				capacity,
				strike_budget,
				now,
			);
			return Resolved { caller, origin_index, fingerprint, new_caller: false, new_origin };
		}

		let caller = Arc::new(Mutex::new(Caller {
			identity: origin.identity,
			identity_value: origin.identity_value.clone(),
			authorized: !origin.trust_mismatch,
			created_at: now,
			origins: vec![Origin::new(
				fingerprint.clone(),
				origin,
				capacity,
				strike_budget,
				now,
			)],
			hell_snapshot: None,
		}));
		callers.insert(origin.identity_value.clone(), caller.clone());

		Resolved { caller, origin_index: 0, fingerprint, new_caller: true, new_origin: true }
	}

	/// Find the request's origin under an existing caller, or append a new
	/// one. Trusted API callers stay single-origin: all their traffic is
	/// folded onto the first origin.
	fn check_add_origin(
		caller: &Arc<Mutex<Caller>>,
		origin: &RequestOrigin,
		fingerprint: &str,
		capacity: i32,
		strike_budget: u32,
		now: Timestamp,
	) -> (usize, bool) {
		let mut caller = caller.lock();

		if caller.identity == CallerIdentity::TrustApi && !caller.origins.is_empty() {
			return (0, false);
		}

		if let Some(index) =
			caller.origins.iter().position(|o| &*o.fingerprint == fingerprint)
		{
			return (index, false);
		}

		caller.origins.push(Origin::new(
			fingerprint.into(),
			origin,
			capacity,
			strike_budget,
			now,
		));
		(caller.origins.len() - 1, true)
	}

	pub fn caller_count(&self) -> usize {
		self.callers.read().len()
	}

	pub fn origin_count(&self) -> usize {
		self.callers.read().values().map(|c| c.lock().origins.len()).sum()
	}
}

impl Default for CallerRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::origin::{classify, ClassifyInput};
	use std::collections::HashMap;

	fn request_origin(ip: &str, ua: &str) -> RequestOrigin {
		classify(
			ClassifyInput {
				client_ip: Some(ip),
				path: "/home",
				ua_raw: ua,
				..ClassifyInput::default()
			},
			&HashMap::new(),
		)
	}

	#[test]
	fn test_first_sight_creates_caller_and_origin() {
		let registry = CallerRegistry::new();
		let origin = request_origin("192.0.2.1", "Mozilla/5.0");
		let resolved = registry.get_or_create(&origin, "Mozilla/5.0", 10, 5, Timestamp(1));

		assert!(resolved.new_caller);
		assert!(resolved.new_origin);
		assert_eq!(resolved.origin_index, 0);
		assert_eq!(registry.caller_count(), 1);
		assert_eq!(registry.origin_count(), 1);
	}

	#[test]
	fn test_same_fingerprint_reuses_origin() {
		let registry = CallerRegistry::new();
		let origin = request_origin("192.0.2.1", "Mozilla/5.0");
		registry.get_or_create(&origin, "Mozilla/5.0", 10, 5, Timestamp(1));
		let resolved = registry.get_or_create(&origin, "Mozilla/5.0", 10, 5, Timestamp(2));

		assert!(!resolved.new_caller);
		assert!(!resolved.new_origin);
		assert_eq!(resolved.origin_index, 0);
		assert_eq!(registry.origin_count(), 1);
	}

	#[test]
	fn test_new_user_agent_appends_origin() {
		let registry = CallerRegistry::new();
		let origin = request_origin("192.0.2.1", "Mozilla/5.0");
		registry.get_or_create(&origin, "Mozilla/5.0", 10, 5, Timestamp(1));
		let resolved = registry.get_or_create(&origin, "Mozilla/6.0", 10, 5, Timestamp(2));

		assert!(!resolved.new_caller);
		assert!(resolved.new_origin);
		assert_eq!(resolved.origin_index, 1);
		assert_eq!(registry.caller_count(), 1);
		assert_eq!(registry.origin_count(), 2);
	}

	#[test]
	fn test_trust_api_caller_stays_single_origin() {
		let mut keys = HashMap::new();
		keys.insert(Box::from("trusted-key"), crate::settings::ApiTrust::Trust);
		let origin = classify(
			ClassifyInput {
				api_key: Some("trusted-key"),
				client_ip: Some("192.0.2.1"),
				path: "/api/info",
				ua_raw: "client-a",
				..ClassifyInput::default()
			},
			&keys,
		);

		let registry = CallerRegistry::new();
		registry.get_or_create(&origin, "client-a", 10, 5, Timestamp(1));
		let resolved = registry.get_or_create(&origin, "client-b", 10, 5, Timestamp(2));

		assert!(!resolved.new_origin);
		assert_eq!(resolved.origin_index, 0);
		assert_eq!(registry.origin_count(), 1);
	}

	#[test]
	fn test_trust_mismatch_marks_caller_unauthorized() {
		let origin = classify(
			ClassifyInput {
				api_key: Some("stolen-key"),
				client_ip: Some("192.0.2.1"),
				path: "/api/info",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&HashMap::new(),
		);

		let registry = CallerRegistry::new();
		let resolved = registry.get_or_create(&origin, "", 10, 5, Timestamp(1));
		assert!(!resolved.caller.lock().authorized);
	}

	#[test]
	fn test_distinct_identity_values_get_distinct_callers() {
		let registry = CallerRegistry::new();
		registry.get_or_create(&request_origin("192.0.2.1", ""), "", 10, 5, Timestamp(1));
		registry.get_or_create(&request_origin("192.0.2.2", ""), "", 10, 5, Timestamp(1));
		assert_eq!(registry.caller_count(), 2);
	}

	#[test]
	fn test_concurrent_first_sight_creates_single_caller_and_origin() {
		let registry = Arc::new(CallerRegistry::new());
		let origin = request_origin("192.0.2.1", "Mozilla/5.0");

		let handles: Vec<_> = (0..8)
			.map(|_| {
				let registry = registry.clone();
				let origin = origin.clone();
				std::thread::spawn(move || {
					registry.get_or_create(&origin, "Mozilla/5.0", 10, 5, Timestamp(1))
				})
			})
			.collect();

		let mut new_callers = 0;
		let mut new_origins = 0;
		for handle in handles {
			let resolved = handle.join().unwrap();
			assert_eq!(resolved.origin_index, 0);
			new_callers += usize::from(resolved.new_caller);
			new_origins += usize::from(resolved.new_origin);
		}

		assert_eq!(new_callers, 1);
		assert_eq!(new_origins, 1);
		assert_eq!(registry.caller_count(), 1);
		assert_eq!(registry.origin_count(), 1);
	}
}

// vim: ts=4
