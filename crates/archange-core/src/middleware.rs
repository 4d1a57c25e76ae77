//! Request admission middleware.
//!
//! The single interception point of the engine. Every inbound request is
//! classified, resolved against the registry, checked against cached ban
//! state, run through the token bucket, and answered with an explicit
//! allow or deny. No error escapes to the HTTP layer: ledger trouble
//! degrades to "not banned" and classification gaps degrade to sentinel
//! identities.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{LocalResult, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use archange_types::hell_adapter::{HellMode, HellRecord};
use archange_types::prelude::*;

use crate::app::ArchangeState;
use crate::origin::{classify, extract_client_ip, ClassifyInput, RequestOrigin, API_KEY_HEADER};
use crate::registry::{Caller, Resolved};

/// Cookie carrying the anonymous footprint issued by the engine.
pub const ANON_FOOTPRINT_COOKIE: &str = "archange_fp";
/// Cookie carrying the authenticated footprint set by the app's auth layer.
pub const USER_FOOTPRINT_COOKIE: &str = "archange_user_fp";

/// Event message emitted when a caller is first seen.
pub const EV_CALLER_CREATED: &str = "caller created";
/// Event message emitted when a new origin is added under a caller.
pub const EV_ORIGIN_CREATED: &str = "origin created";
/// Event message emitted when a caller claims an unregistered API key.
pub const EV_USURPATION: &str = "suspected key usurpation";

// admission //
//***********//
/// Admission interceptor, mounted with `middleware::from_fn_with_state`.
/// On allow the pipeline continues unmodified apart from the
/// `RequestOrigin` extension; on deny the request is answered here with
/// a 403 and never reaches the inner service.
pub async fn admission(
	State(app): State<ArchangeState>,
	mut req: Request<Body>,
	next: Next,
) -> Response {
	let now_ts = now();
	let ua_raw: Box<str> = req
		.headers()
		.get(header::USER_AGENT)
		.and_then(|h| h.to_str().ok())
		.unwrap_or("")
		.into();
	let client_ip = extract_client_ip(&req);

	let origin = classify(
		ClassifyInput {
			api_key: req
				.headers()
				.get(API_KEY_HEADER)
				.and_then(|h| h.to_str().ok())
				.map(str::trim)
				.filter(|k| !k.is_empty()),
			user_footprint: cookie_value(&req, USER_FOOTPRINT_COOKIE),
			anon_footprint: cookie_value(&req, ANON_FOOTPRINT_COOKIE),
			client_ip: client_ip.as_deref(),
			path: req.uri().path(),
			ua_raw: &ua_raw,
		},
		&app.config.api_keys,
	);
	// Address-only callers get a footprint so their next request carries
	// a more durable identity than the IP.
	let issue_footprint = origin.identity == crate::origin::CallerIdentity::Ip;

	let capacity = app.config.capacity(origin.identity);
	let resolved = app.registry.get_or_create(
		&origin,
		&ua_raw,
		capacity.unwrap_or(0),
		app.config.strike_budget,
		now_ts,
	);

	if resolved.new_caller {
		app.adlogs.info("registry", EV_CALLER_CREATED);
		debug!("New caller {} ({})", origin.identity_value, origin.identity);
	}
	if resolved.new_origin {
		app.adlogs.info("registry", EV_ORIGIN_CREATED);
	}

	if !resolved.caller.lock().authorized {
		if resolved.new_caller {
			app.adlogs.warning("registry", EV_USURPATION);
			warn!(
				"Caller {} claims an API key that is not registered, denying",
				origin.client_ip
			);
		}
		app.stats.note_denied();
		return with_footprint(Error::Unauthorized.into_response(), issue_footprint);
	}

	// Seed the ban snapshots for freshly created entries. Ledger I/O runs
	// outside the caller lock.
	if resolved.new_origin {
		let snapshot = app.hell.get_ban(&resolved.fingerprint).await;
		write_snapshot(&resolved.caller, Some(resolved.origin_index), snapshot);
	}
	if resolved.new_caller {
		let snapshot = app.hell.get_ban(&origin.identity_value).await;
		write_snapshot(&resolved.caller, None, snapshot);
	}

	// Ban check, origin level then caller level. Only BLOCKED denies;
	// DELAYED on its own merely primes the escalation fast path.
	for (slot, subject) in [
		(Some(resolved.origin_index), &resolved.fingerprint),
		(None, &origin.identity_value),
	] {
		if let Some(record) = effective_ban(&app, &resolved.caller, slot, subject, now_ts).await
		{
			if record.mode == HellMode::Blocked {
				app.stats.note_denied();
				return with_footprint(deny_response(&origin, &record), issue_footprint);
			}
		}
	}

	if let Some(capacity) = capacity {
		if let Some(escalation) = account_request(&app, &resolved, capacity, now_ts) {
			let record = app.hell.persist_escalation(escalation).await;
			write_snapshot(&resolved.caller, Some(resolved.origin_index), Some(record.clone()));
			app.stats.note_ban_pushed();
			app.stats.note_denied();
			return with_footprint(deny_response(&origin, &record), issue_footprint);
		}
	} else {
		// Trusted API traffic bypasses the limiter but is still accounted.
		let mut caller = resolved.caller.lock();
		if let Some(o) = caller.origins.get_mut(resolved.origin_index) {
			o.touch(now_ts);
		}
	}

	app.stats.note_admitted();
	req.extensions_mut().insert(origin);
	with_footprint(next.run(req).await, issue_footprint)
}

/// Run the bucket for one request. Returns the escalation to persist when
/// the frame is exhausted. The whole accounting sequence holds the caller
/// lock so concurrent requests cannot double-admit.
fn account_request(
	app: &ArchangeState,
	resolved: &Resolved,
	capacity: i32,
	now_ts: Timestamp,
) -> Option<crate::hell::Escalation> {
	let mut caller = resolved.caller.lock();
	let origin = caller.origins.get_mut(resolved.origin_index)?;

	origin.touch(now_ts);
	if origin.bucket.admit(capacity, app.config.frame_lifetime_ms, now_ts).is_admitted() {
		return None;
	}

	let snapshot = origin.hell_snapshot.clone();
	Some(app.hell.decide_escalation(
		snapshot.as_ref(),
		&mut origin.strikes,
		&resolved.fingerprint,
		now_ts,
	))
}

/// Active ban record for one snapshot slot, refreshing an expired cached
/// record from the ledger first.
async fn effective_ban(
	app: &ArchangeState,
	caller: &Arc<Mutex<Caller>>,
	origin_index: Option<usize>,
	subject: &str,
	now_ts: Timestamp,
) -> Option<HellRecord> {
	let snapshot = read_snapshot(caller, origin_index);

	let snapshot = match snapshot {
		Some(record) if record.is_expired(now_ts) => {
			let refreshed = app.hell.get_ban(subject).await;
			write_snapshot(caller, origin_index, refreshed.clone());
			refreshed
		}
		other => other,
	};

	snapshot.filter(|r| !r.is_expired(now_ts))
}

fn read_snapshot(caller: &Arc<Mutex<Caller>>, origin_index: Option<usize>) -> Option<HellRecord> {
	let caller = caller.lock();
	match origin_index {
		Some(index) => caller.origins.get(index).and_then(|o| o.hell_snapshot.clone()),
		None => caller.hell_snapshot.clone(),
	}
}

fn write_snapshot(
	caller: &Arc<Mutex<Caller>>,
	origin_index: Option<usize>,
	snapshot: Option<HellRecord>,
) {
	let mut caller = caller.lock();
	match origin_index {
		Some(index) => {
			if let Some(origin) = caller.origins.get_mut(index) {
				origin.hell_snapshot = snapshot;
			}
		}
		None => caller.hell_snapshot = snapshot,
	}
}

// Deny responses //
//****************//
fn deny_response(origin: &RequestOrigin, record: &HellRecord) -> Response {
	if origin.is_api_path {
		let body = json!({
			"archange": {
				"state": false,
				"hell": { "mode": record.mode.as_str(), "to": record.expires_at.0 },
			}
		});
		(StatusCode::FORBIDDEN, axum::Json(body)).into_response()
	} else {
		(StatusCode::FORBIDDEN, ban_message(record.expires_at)).into_response()
	}
}

fn ban_message(expires_at: Timestamp) -> String {
	if expires_at == Timestamp::NEVER {
		return "You have been banned from this app forever".into();
	}
	match Utc.timestamp_millis_opt(expires_at.0) {
		LocalResult::Single(when) => format!(
			"You have been banned from this app until {}",
			when.to_rfc3339_opts(SecondsFormat::Secs, true)
		),
		_ => "You have been banned from this app".into(),
	}
}

// Footprint cookies //
//*******************//
fn cookie_value<'a>(req: &'a Request<Body>, name: &str) -> Option<&'a str> {
	req.headers()
		.get(header::COOKIE)?
		.to_str()
		.ok()?
		.split(';')
		.find_map(|pair| {
			let (key, value) = pair.trim().split_once('=')?;
			(key == name && !value.is_empty()).then_some(value)
		})
}

fn with_footprint(mut response: Response, issue: bool) -> Response {
	if !issue {
		return response;
	}
	let cookie = format!(
		"{}={}; Path=/; HttpOnly; SameSite=Lax",
		ANON_FOOTPRINT_COOKIE,
		Uuid::new_v4()
	);
	if let Ok(value) = HeaderValue::from_str(&cookie) {
		response.headers_mut().append(header::SET_COOKIE, value);
	}
	response
}

/// Build the `Set-Cookie` value for an authenticated footprint. Exposed
/// for the application's auth layer.
pub fn user_footprint_cookie(footprint: &str) -> Option<HeaderValue> {
	HeaderValue::from_str(&format!(
		"{}={}; Path=/; HttpOnly; SameSite=Lax",
		USER_FOOTPRINT_COOKIE, footprint
	))
	.ok()
}


// vim: ts=4
