//! Fixed-window token bucket.
//!
//! Each origin carries one bucket. A frame is a fixed window starting at
//! the first request that touches it; tokens only decrease within a frame.
//! When a request arrives after the frame has lapsed the bucket refills,
//! and that request is admitted no matter how far the previous frame had
//! been overdrawn.

use archange_types::prelude::*;

/// Admission verdict for a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
	/// Within budget, or first request of a fresh frame.
	Admitted,
	/// Frame budget exhausted.
	Exhausted,
}

impl Admission {
	pub fn is_admitted(self) -> bool {
		matches!(self, Admission::Admitted)
	}
}

// TokenBucket //
//*************//
#[derive(Clone, Copy, Debug)]
pub struct TokenBucket {
	/// Tokens left in the current frame. Goes negative while the caller
	/// keeps hammering an exhausted frame.
	tokens_remaining: i32,
	window_started_at: Timestamp,
}

impl TokenBucket {
	/// A fresh bucket, full, with its frame anchored at `now`.
	pub fn new(capacity: i32, now: Timestamp) -> Self {
		Self { tokens_remaining: capacity, window_started_at: now }
	}

	/// Account one request against the bucket and decide admission.
	///
	/// The token is spent before the frame check, so a frame rollover
	/// lands on `capacity - 1` for the request that caused it.
	pub fn admit(&mut self, capacity: i32, frame_lifetime_ms: i64, now: Timestamp) -> Admission {
		self.tokens_remaining -= 1;

		let elapsed = now.since(self.window_started_at);
		if elapsed > frame_lifetime_ms {
			// Lapsed frame: refill and admit regardless of how deep the
			// previous frame went.
			self.tokens_remaining = capacity - 1;
			self.window_started_at = now;
			return Admission::Admitted;
		}

		if self.tokens_remaining >= 0 {
			Admission::Admitted
		} else {
			Admission::Exhausted
		}
	}

	pub fn tokens_remaining(&self) -> i32 {
		self.tokens_remaining
	}

	pub fn window_started_at(&self) -> Timestamp {
		self.window_started_at
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const FRAME_MS: i64 = 10_000;

	#[test]
	fn test_admits_until_capacity_spent() {
		let now = Timestamp(1_000_000);
		let mut bucket = TokenBucket::new(3, now);
		assert_eq!(bucket.admit(3, FRAME_MS, now), Admission::Admitted);
		assert_eq!(bucket.admit(3, FRAME_MS, now), Admission::Admitted);
		assert_eq!(bucket.admit(3, FRAME_MS, now), Admission::Admitted);
		assert_eq!(bucket.tokens_remaining(), 0);
	}

	#[test]
	fn test_denies_once_exhausted() {
		let now = Timestamp(1_000_000);
		let mut bucket = TokenBucket::new(1, now);
		assert_eq!(bucket.admit(1, FRAME_MS, now), Admission::Admitted);
		assert_eq!(bucket.admit(1, FRAME_MS, now), Admission::Exhausted);
		assert_eq!(bucket.admit(1, FRAME_MS, now), Admission::Exhausted);
		assert_eq!(bucket.tokens_remaining(), -2);
	}

	#[test]
	fn test_rollover_refills_and_admits() {
		let start = Timestamp(1_000_000);
		let mut bucket = TokenBucket::new(2, start);
		// Overdraw the first frame well past zero.
		for _ in 0..5 {
			bucket.admit(2, FRAME_MS, start);
		}
		assert!(bucket.tokens_remaining() < 0);

		let later = Timestamp(start.0 + FRAME_MS + 1);
		assert_eq!(bucket.admit(2, FRAME_MS, later), Admission::Admitted);
		assert_eq!(bucket.tokens_remaining(), 1);
		assert_eq!(bucket.window_started_at(), later);
	}

	#[test]
	fn test_request_at_exact_frame_boundary_stays_in_frame() {
		let start = Timestamp(1_000_000);
		let mut bucket = TokenBucket::new(1, start);
		assert_eq!(bucket.admit(1, FRAME_MS, start), Admission::Admitted);

		// elapsed == frame_lifetime_ms is still the old frame
		let boundary = Timestamp(start.0 + FRAME_MS);
		assert_eq!(bucket.admit(1, FRAME_MS, boundary), Admission::Exhausted);

		let past = Timestamp(start.0 + FRAME_MS + 1);
		assert_eq!(bucket.admit(1, FRAME_MS, past), Admission::Admitted);
	}
}

// vim: ts=4
