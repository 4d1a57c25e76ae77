//! Engine assembly.
//!
//! `Archange` bundles the configuration, the caller registry, the ban
//! state machine and the event hub behind one shared handle. Construction
//! is explicit and sequential: the ledger adapter is built by the caller,
//! the startup sweep runs before the first request is admitted, and
//! readiness is announced on the event hub.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use archange_types::adlogs::Adlogs;
use archange_types::hell_adapter::HellAdapter;

use crate::hell::Hell;
use crate::registry::CallerRegistry;
use crate::settings::EngineConfig;

/// Event message announcing that the engine is ready to admit traffic.
pub const EV_READY: &str = "archange engine ready";

// EngineStats //
//*************//
#[derive(Debug, Default)]
pub struct EngineStats {
	admitted: AtomicU64,
	denied: AtomicU64,
	bans_pushed: AtomicU64,
}

impl EngineStats {
	pub fn note_admitted(&self) {
		self.admitted.fetch_add(1, Ordering::Relaxed);
	}

	pub fn note_denied(&self) {
		self.denied.fetch_add(1, Ordering::Relaxed);
	}

	pub fn note_ban_pushed(&self) {
		self.bans_pushed.fetch_add(1, Ordering::Relaxed);
	}
}

/// Point-in-time counters, served by the info endpoint.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
	pub callers: usize,
	pub origins: usize,
	pub requests_admitted: u64,
	pub requests_denied: u64,
	pub bans_pushed: u64,
}

// Archange //
//**********//
pub struct Archange {
	pub config: EngineConfig,
	pub registry: CallerRegistry,
	pub hell: Hell,
	pub adlogs: Adlogs,
	pub stats: EngineStats,
}

/// Shared engine handle, cloned into every request.
pub type ArchangeState = Arc<Archange>;

impl Archange {
	/// Assemble the engine and run the one-time startup sweep. Emits
	/// `EV_READY` once the engine may admit traffic.
	pub async fn init(
		config: EngineConfig,
		adapter: Arc<dyn HellAdapter>,
		adlogs: Adlogs,
	) -> ArchangeState {
		let hell = Hell::new(adapter, adlogs.clone(), &config);
		hell.sweep_expired().await;

		let app = Arc::new(Self {
			config,
			registry: CallerRegistry::new(),
			hell,
			adlogs,
			stats: EngineStats::default(),
		});
		app.adlogs.info("archange", EV_READY);
		app
	}

	pub fn stats_snapshot(&self) -> StatsSnapshot {
		StatsSnapshot {
			callers: self.registry.caller_count(),
			origins: self.registry.origin_count(),
			requests_admitted: self.stats.admitted.load(Ordering::Relaxed),
			requests_denied: self.stats.denied.load(Ordering::Relaxed),
			bans_pushed: self.stats.bans_pushed.load(Ordering::Relaxed),
		}
	}
}


// vim: ts=4
