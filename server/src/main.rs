//! Archange reference server, the heaven layer.
//!
//! Wires the admission engine in front of a small axum application.
//! Startup is explicit and sequential: configuration, ban ledger, engine,
//! router, listener. The Adlogs event hub sequences the steps; a `Stop`
//! event during startup terminates the process without serving traffic.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use archange_core::app::EV_READY;
use archange_core::{Archange, EngineConfig};
use archange_hell_adapter_sqlite::HellAdapterSqlite;
use archange_types::adlogs::Adlogs;
use archange_types::prelude::*;

mod handlers;
mod routes;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();
	info!("Archange v{}", VERSION);

	let adlogs = Adlogs::new();
	if let Err(e) = run(adlogs.clone()).await {
		let category = match &e {
			Error::Config(_) => "config",
			_ => "server",
		};
		adlogs.stop(category, &format!("fatal startup error: {}", e));
		// the dispatcher terminates the process once the Stop event is flushed
		std::thread::sleep(Duration::from_secs(5));
	}
}

async fn run(adlogs: Adlogs) -> ArResult<()> {
	let config = EngineConfig::from_env()?;
	let port = config.http_port;

	let adapter = Arc::new(HellAdapterSqlite::new(&*config.database_path).await?);

	let ready = adlogs.subscribe_once(EV_READY);
	let app = Archange::init(config, adapter, adlogs.clone()).await;
	if ready.recv_async().await.is_err() {
		return Err(Error::Internal("event hub closed during startup".into()));
	}

	let router = routes::init(app);
	let addr = SocketAddr::from(([0, 0, 0, 0], port));
	let listener = tokio::net::TcpListener::bind(addr).await?;
	info!("Listening on HTTP {}", addr);
	adlogs.info("server", "heaven layer serving");

	axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
		.await?;

	Ok(())
}

// vim: ts=4
