//! Demo route handlers behind the admission layer.
//!
//! Every handler runs after the admission middleware, so the request
//! extensions always carry the classified `RequestOrigin`.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt::Write;

use archange_core::app::StatsSnapshot;
use archange_core::middleware::user_footprint_cookie;
use archange_core::{ArchangeState, RequestOrigin};
use archange_types::prelude::*;

/// # GET /
pub async fn get_index(Extension(origin): Extension<RequestOrigin>) -> String {
	format!("Welcome {}", origin.client_ip)
}

/// # GET /api/whoami
pub async fn get_whoami(Extension(origin): Extension<RequestOrigin>) -> Json<RequestOrigin> {
	Json(origin)
}

/// # GET /api/info
pub async fn get_info(State(app): State<ArchangeState>) -> Json<StatsSnapshot> {
	Json(app.stats_snapshot())
}

#[derive(Debug, Deserialize)]
pub struct LoginReq {
	pub user: Box<str>,
}

/// # POST /api/login
///
/// Login stub. Derives a stable footprint for the user and hands it back
/// in the authenticated footprint cookie; a real application would verify
/// credentials first.
pub async fn post_login(
	State(app): State<ArchangeState>,
	Json(login): Json<LoginReq>,
) -> ArResult<Response> {
	if login.user.trim().is_empty() {
		return Err(Error::Unauthorized);
	}

	let footprint = user_footprint(&app.config.session_secret, &login.user);
	let cookie = user_footprint_cookie(&footprint)
		.ok_or_else(|| Error::Internal("footprint is not a valid cookie value".into()))?;

	info!("Issued login footprint for {}", login.user);
	let mut response =
		Json(serde_json::json!({ "state": true, "user": login.user })).into_response();
	response.headers_mut().append(header::SET_COOKIE, cookie);
	Ok(response)
}

/// Footprint for an authenticated user, keyed on the session secret so it
/// is stable across logins but not derivable from the username alone.
fn user_footprint(secret: &str, user: &str) -> Box<str> {
	let mut hasher = Sha256::new();
	hasher.update(secret.as_bytes());
	hasher.update(user.as_bytes());
	let digest = hasher.finalize();

	let mut hex = String::with_capacity(digest.len() * 2);
	for byte in digest {
		let _ = write!(hex, "{:02x}", byte);
	}
	hex.into()
}


// vim: ts=4
