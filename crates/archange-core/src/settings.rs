//! Engine configuration.
//!
//! Loaded from environment variables once at startup and validated
//! fail-fast: a missing or malformed required variable is a configuration
//! error and the process must not serve traffic.

use std::collections::HashMap;

use crate::origin::CallerIdentity;
use crate::prelude::*;

/// Trust flag attached to a registered API key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiTrust {
	/// Known key, regular API quota applies.
	Api,
	/// Fully trusted key, bypasses the limiter.
	Trust,
}

/// Token capacities per identity type within one frame.
#[derive(Clone, Copy, Debug)]
pub struct BucketCapacities {
	pub ip: i32,
	pub unknown: i32,
	pub auth_web: i32,
	pub auth_api: i32,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
	pub http_port: u16,
	pub session_secret: Box<str>,
	pub database_path: Box<str>,
	pub capacities: BucketCapacities,
	/// Token bucket frame length in milliseconds.
	pub frame_lifetime_ms: i64,
	/// Lifetime of a DELAYED hell record.
	pub delayed_lifetime_ms: i64,
	/// Delay-level violations tolerated per rolling strike window.
	pub strike_budget: u32,
	/// Rolling window for the strike budget.
	pub strike_window_ms: i64,
	/// BLOCKED lifetime for an exhaustion while already DELAYED.
	pub blocked_repeat_ms: i64,
	/// BLOCKED lifetime once the strike budget is exhausted.
	pub blocked_full_ms: i64,
	/// Registered API keys and their trust flags.
	pub api_keys: HashMap<Box<str>, ApiTrust>,
}

impl EngineConfig {
	pub fn from_env() -> ArResult<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Load configuration from a custom variable lookup. Embedders and
	/// tests use this to avoid touching the process environment.
	pub fn from_lookup<F>(lookup: F) -> ArResult<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let http_port = required(&lookup, "HTTP_PORT")?
			.parse::<u16>()
			.map_err(|_| Error::Config("HTTP_PORT is not a valid port number".into()))?;
		let session_secret: Box<str> = required(&lookup, "HTTP_SESSION_SECRET")?.into();
		let database_path: Box<str> = required(&lookup, "DATABASE_PATH")?.into();

		if session_secret.is_empty() {
			return Err(Error::Config("HTTP_SESSION_SECRET must not be empty".into()));
		}

		let capacities = BucketCapacities {
			ip: optional_num(&lookup, "BUCKET_LIMIT_IP", 10)?,
			unknown: optional_num(&lookup, "BUCKET_LIMIT_UNKNOWN", 20)?,
			auth_web: optional_num(&lookup, "BUCKET_LIMIT_AUTH_WEB", 30)?,
			auth_api: optional_num(&lookup, "BUCKET_LIMIT_AUTH_API", 30)?,
		};

		let frame_lifetime_ms =
			optional_num::<i64, _>(&lookup, "FRAME_LIFETIME", 10)? * 1000;
		let delayed_lifetime_ms =
			optional_num::<i64, _>(&lookup, "HELL_DELAYED_MINUTES", 5)? * 60 * 1000;
		let strike_budget = optional_num(&lookup, "HELL_STRIKE_BUDGET", 5)?;
		let strike_window_ms =
			optional_num::<i64, _>(&lookup, "HELL_STRIKE_WINDOW_MINUTES", 60)? * 60 * 1000;
		let blocked_repeat_ms =
			optional_num::<i64, _>(&lookup, "HELL_BLOCKED_REPEAT_HOURS", 1)? * 60 * 60 * 1000;
		let blocked_full_ms =
			optional_num::<i64, _>(&lookup, "HELL_BLOCKED_HOURS", 24)? * 60 * 60 * 1000;

		let api_keys = match lookup("API_KEYS") {
			Some(raw) => parse_api_keys(&raw)?,
			None => HashMap::new(),
		};

		Ok(Self {
			http_port,
			session_secret,
			database_path,
			capacities,
			frame_lifetime_ms,
			delayed_lifetime_ms,
			strike_budget,
			strike_window_ms,
			blocked_repeat_ms,
			blocked_full_ms,
			api_keys,
		})
	}

	/// Token capacity for an identity type. `None` means the limiter is
	/// bypassed entirely.
	pub fn capacity(&self, identity: CallerIdentity) -> Option<i32> {
		match identity {
			CallerIdentity::Ip => Some(self.capacities.ip),
			CallerIdentity::Unknown => Some(self.capacities.unknown),
			CallerIdentity::AuthWeb => Some(self.capacities.auth_web),
			CallerIdentity::AuthApi => Some(self.capacities.auth_api),
			CallerIdentity::TrustApi => None,
		}
	}
}

fn required<F>(lookup: &F, name: &str) -> ArResult<String>
where
	F: Fn(&str) -> Option<String>,
{
	lookup(name)
		.ok_or_else(|| Error::Config(format!("missing required environment variable {}", name).into()))
}

fn optional_num<T, F>(lookup: &F, name: &str, default: T) -> ArResult<T>
where
	T: std::str::FromStr,
	F: Fn(&str) -> Option<String>,
{
	match lookup(name) {
		Some(raw) => raw
			.trim()
			.parse()
			.map_err(|_| Error::Config(format!("{} is not a valid number: {}", name, raw).into())),
		None => Ok(default),
	}
}

/// Parse the `API_KEYS` registry: comma separated `key:trust` entries where
/// `trust` is `api` or `trust`.
fn parse_api_keys(raw: &str) -> ArResult<HashMap<Box<str>, ApiTrust>> {
	let mut keys = HashMap::new();
	for entry in raw.split(',') {
		let entry = entry.trim();
		if entry.is_empty() {
			continue;
		}
		let (key, trust) = entry.split_once(':').ok_or_else(|| {
			Error::Config(format!("API_KEYS entry has no trust flag: {}", entry).into())
		})?;
		if key.is_empty() {
			return Err(Error::Config("API_KEYS entry has an empty key".into()));
		}
		let trust = match trust {
			"api" => ApiTrust::Api,
			"trust" => ApiTrust::Trust,
			other => {
				return Err(Error::Config(
					format!("API_KEYS entry has unknown trust flag: {}", other).into(),
				))
			}
		};
		keys.insert(key.into(), trust);
	}
	Ok(keys)
}


// vim: ts=4
