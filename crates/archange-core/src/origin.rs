//! Identity classifier.
//!
//! Derives a `RequestOrigin` descriptor from request metadata. The
//! classifier is pure and infallible: every input resolves to an identity,
//! using fallback sentinels where the request carries too little to go on.

use axum::extract::ConnectInfo;
use axum::http::Request;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::settings::ApiTrust;
use crate::ua::UserAgent;

/// Header carrying an API key.
pub const API_KEY_HEADER: &str = "x-archange-key";
/// Identity value used when no client address can be established.
pub const SOCKET_LOST: &str = "socket-lost";
/// Path prefix that classifies a request as an API request.
pub const API_PATH_PREFIX: &str = "/api";

// CallerIdentity //
//****************//
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallerIdentity {
	Ip,
	Unknown,
	AuthWeb,
	AuthApi,
	TrustApi,
}

impl CallerIdentity {
	pub fn as_str(&self) -> &'static str {
		match self {
			CallerIdentity::Ip => "ip",
			CallerIdentity::Unknown => "unknown",
			CallerIdentity::AuthWeb => "auth-web",
			CallerIdentity::AuthApi => "auth-api",
			CallerIdentity::TrustApi => "trust-api",
		}
	}
}

impl std::fmt::Display for CallerIdentity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

// RequestOrigin //
//***************//
/// Per-request identity descriptor, derived by `classify`. Attached to the
/// request extensions on admission so downstream handlers can inspect it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOrigin {
	pub identity: CallerIdentity,
	pub identity_value: Box<str>,
	pub client_ip: Box<str>,
	pub is_api_path: bool,
	pub user_agent: UserAgent,
	/// The request claimed an API key that is absent from the registry.
	#[serde(skip)]
	pub trust_mismatch: bool,
}

/// Raw request metadata the classifier works from. The HTTP layer resolves
/// headers and session slots into this shape.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassifyInput<'a> {
	pub api_key: Option<&'a str>,
	/// Authenticated session footprint, set by the application's auth layer.
	pub user_footprint: Option<&'a str>,
	/// Anonymous footprint issued on an earlier visit.
	pub anon_footprint: Option<&'a str>,
	/// Client address resolved from forwarding headers or the socket.
	pub client_ip: Option<&'a str>,
	pub path: &'a str,
	pub ua_raw: &'a str,
}

/// Classify a request to an identity, in priority order: API key over
/// authenticated footprint over anonymous footprint over raw IP.
pub fn classify(
	input: ClassifyInput<'_>,
	api_keys: &HashMap<Box<str>, ApiTrust>,
) -> RequestOrigin {
	let is_api_path = input.path.starts_with(API_PATH_PREFIX);
	let client_ip: Box<str> = input.client_ip.unwrap_or(SOCKET_LOST).into();
	let user_agent = UserAgent::parse(input.ua_raw);

	let (identity, identity_value, trust_mismatch) = if let Some(key) = input.api_key {
		match api_keys.get(key) {
			Some(ApiTrust::Trust) => (CallerIdentity::TrustApi, Box::from(key), false),
			Some(ApiTrust::Api) => (CallerIdentity::AuthApi, Box::from(key), false),
			None => (CallerIdentity::AuthApi, Box::from(key), true),
		}
	} else if let Some(footprint) = input.user_footprint.filter(|_| !is_api_path) {
		(CallerIdentity::AuthWeb, Box::from(footprint), false)
	} else if let Some(footprint) = input.anon_footprint {
		(CallerIdentity::Unknown, Box::from(footprint), false)
	} else {
		(CallerIdentity::Ip, client_ip.clone(), false)
	};

	RequestOrigin { identity, identity_value, client_ip, is_api_path, user_agent, trust_mismatch }
}

/// Resolve the client address for a request: first entry of
/// `x-forwarded-for`, then `x-real-ip`, then the peer socket address.
pub fn extract_client_ip<B>(req: &Request<B>) -> Option<Box<str>> {
	extract_from_xff(req)
		.or_else(|| extract_from_x_real_ip(req))
		.or_else(|| {
			req.extensions()
				.get::<ConnectInfo<SocketAddr>>()
				.map(|ci| ci.0.ip().to_string().into())
		})
}

fn extract_from_xff<B>(req: &Request<B>) -> Option<Box<str>> {
	req.headers()
		.get("x-forwarded-for")
		.and_then(|h| h.to_str().ok())
		.and_then(|s| {
			// X-Forwarded-For can contain multiple IPs: "client, proxy1, proxy2"
			// Take the first (leftmost) IP as the original client
			s.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()).map(Into::into)
		})
}

fn extract_from_x_real_ip<B>(req: &Request<B>) -> Option<Box<str>> {
	req.headers()
		.get("x-real-ip")
		.and_then(|h| h.to_str().ok())
		.map(str::trim)
		.filter(|ip| !ip.is_empty())
		.map(Into::into)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn registry() -> HashMap<Box<str>, ApiTrust> {
		let mut keys = HashMap::new();
		keys.insert(Box::from("trusted-key"), ApiTrust::Trust);
		keys.insert(Box::from("plain-key"), ApiTrust::Api);
		keys
	}

	#[test]
	fn test_api_key_wins_over_footprints() {
		let origin = classify(
			ClassifyInput {
				api_key: Some("plain-key"),
				user_footprint: Some("user-fp"),
				anon_footprint: Some("anon-fp"),
				client_ip: Some("192.0.2.1"),
				path: "/api/info",
				ua_raw: "",
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::AuthApi);
		assert_eq!(&*origin.identity_value, "plain-key");
		assert!(!origin.trust_mismatch);
	}

	#[test]
	fn test_trusted_key_classifies_trust_api() {
		let origin = classify(
			ClassifyInput {
				api_key: Some("trusted-key"),
				client_ip: Some("192.0.2.1"),
				path: "/api/info",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::TrustApi);
	}

	#[test]
	fn test_unknown_key_flags_trust_mismatch() {
		let origin = classify(
			ClassifyInput {
				api_key: Some("stolen-key"),
				client_ip: Some("192.0.2.1"),
				path: "/api/info",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::AuthApi);
		assert!(origin.trust_mismatch);
	}

	#[test]
	fn test_user_footprint_on_web_path() {
		let origin = classify(
			ClassifyInput {
				user_footprint: Some("user-fp"),
				anon_footprint: Some("anon-fp"),
				client_ip: Some("192.0.2.1"),
				path: "/home",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::AuthWeb);
		assert_eq!(&*origin.identity_value, "user-fp");
		assert!(!origin.is_api_path);
	}

	#[test]
	fn test_user_footprint_ignored_on_api_path() {
		let origin = classify(
			ClassifyInput {
				user_footprint: Some("user-fp"),
				anon_footprint: Some("anon-fp"),
				client_ip: Some("192.0.2.1"),
				path: "/api/info",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::Unknown);
		assert_eq!(&*origin.identity_value, "anon-fp");
	}

	#[test]
	fn test_anon_footprint() {
		let origin = classify(
			ClassifyInput {
				anon_footprint: Some("anon-fp"),
				client_ip: Some("192.0.2.1"),
				path: "/home",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::Unknown);
	}

	#[test]
	fn test_ip_fallback() {
		let origin = classify(
			ClassifyInput {
				client_ip: Some("192.0.2.1"),
				path: "/home",
				ua_raw: "",
				..ClassifyInput::default()
			},
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::Ip);
		assert_eq!(&*origin.identity_value, "192.0.2.1");
	}

	#[test]
	fn test_socket_lost_sentinel() {
		let origin = classify(
			ClassifyInput { path: "/home", ua_raw: "", ..ClassifyInput::default() },
			&registry(),
		);
		assert_eq!(origin.identity, CallerIdentity::Ip);
		assert_eq!(&*origin.identity_value, SOCKET_LOST);
		assert_eq!(&*origin.client_ip, SOCKET_LOST);
	}

	#[test]
	fn test_xff_first_entry_wins() {
		let req = Request::builder()
			.uri("/")
			.header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
			.header("x-real-ip", "10.0.0.2")
			.body(())
			.unwrap();
		assert_eq!(extract_client_ip(&req).as_deref(), Some("203.0.113.9"));
	}

	#[test]
	fn test_x_real_ip_fallback() {
		let req = Request::builder()
			.uri("/")
			.header("x-real-ip", "10.0.0.2")
			.body(())
			.unwrap();
		assert_eq!(extract_client_ip(&req).as_deref(), Some("10.0.0.2"));
	}

	#[test]
	fn test_no_address_at_all() {
		let req = Request::builder().uri("/").body(()).unwrap();
		assert_eq!(extract_client_ip(&req), None);
	}
}

// vim: ts=4
