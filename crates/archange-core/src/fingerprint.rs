//! Origin fingerprinting.
//!
//! An origin is one distinguishable device/browser combination under a
//! caller, keyed by a hash over the raw user-agent string, the caller's
//! identity value, and the client IP.

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Compute the fingerprint hash for an origin, as lowercase hex.
pub fn fingerprint_hash(ua_raw: &str, identity_value: &str, client_ip: &str) -> Box<str> {
	let mut hasher = Sha256::new();
	hasher.update(ua_raw.as_bytes());
	hasher.update(identity_value.as_bytes());
	hasher.update(client_ip.as_bytes());
	let digest = hasher.finalize();

	let mut hex = String::with_capacity(digest.len() * 2);
	for byte in digest {
		let _ = write!(hex, "{:02x}", byte);
	}
	hex.into()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_fingerprint_is_deterministic() {
		let a = fingerprint_hash("Mozilla/5.0", "192.0.2.1", "192.0.2.1");
		let b = fingerprint_hash("Mozilla/5.0", "192.0.2.1", "192.0.2.1");
		assert_eq!(a, b);
		assert_eq!(a.len(), 64);
		assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn test_fingerprint_is_sensitive_to_each_field() {
		let base = fingerprint_hash("Mozilla/5.0", "fp-token", "192.0.2.1");
		assert_ne!(base, fingerprint_hash("Mozilla/6.0", "fp-token", "192.0.2.1"));
		assert_ne!(base, fingerprint_hash("Mozilla/5.0", "fp-token2", "192.0.2.1"));
		assert_ne!(base, fingerprint_hash("Mozilla/5.0", "fp-token", "192.0.2.2"));
	}
}

// vim: ts=4
