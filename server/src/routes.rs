//! Router assembly for the reference server.
//!
//! Every route sits behind the admission middleware; there is no
//! unguarded surface.

use axum::routing::{get, post};
use axum::{middleware, Router};

use archange_core::middleware::admission;
use archange_core::ArchangeState;

use crate::handlers;

pub fn init(state: ArchangeState) -> Router {
	Router::new()
		.route("/", get(handlers::get_index))
		.route("/api/whoami", get(handlers::get_whoami))
		.route("/api/info", get(handlers::get_info))
		.route("/api/login", post(handlers::post_login))
		.layer(middleware::from_fn_with_state(state.clone(), admission))
		.with_state(state)
}


// vim: ts=4
