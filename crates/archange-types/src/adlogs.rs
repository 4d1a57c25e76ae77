//! Adlogs runtime event hub.
//!
//! Single process-wide channel for structured runtime events. Every event is
//! mirrored to `tracing` at the mapped level, and listeners can subscribe to
//! an exact message template (one-shot or persistent) to sequence startup or
//! observe engine activity. `Stop` severity is fatal: the dispatcher logs the
//! event and exits the process. The admission engine itself never emits
//! `Stop`; only configuration/bootstrap failures do.

use flume::{Receiver, Sender};
use serde::Serialize;
use std::thread;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	Info,
	Warning,
	Stop,
}

#[derive(Clone, Debug, Serialize)]
pub struct RuntimeEvent {
	pub severity: Severity,
	pub category: Box<str>,
	pub message: Box<str>,
	pub timestamp: Timestamp,
}

enum Msg {
	Event(RuntimeEvent),
	Subscribe(Subscription),
}

struct Subscription {
	message: Box<str>,
	once: bool,
	tx: Sender<RuntimeEvent>,
}

#[derive(Clone)]
pub struct Adlogs {
	tx: Sender<Msg>,
}

impl Adlogs {
	/// Create the hub and start its dispatcher thread. A `Stop` event
	/// terminates the process.
	pub fn new() -> Self {
		Self::start(true)
	}

	/// Hub variant that logs `Stop` events without terminating the process.
	/// Intended for tests and embedding.
	pub fn without_stop_exit() -> Self {
		Self::start(false)
	}

	fn start(exit_on_stop: bool) -> Self {
		let (tx, rx) = flume::unbounded();
		thread::spawn(move || dispatcher_loop(&rx, exit_on_stop));
		Self { tx }
	}

	pub fn emit(&self, severity: Severity, category: &str, message: &str) {
		let event = RuntimeEvent {
			severity,
			category: category.into(),
			message: message.into(),
			timestamp: now(),
		};
		if self.tx.send(Msg::Event(event)).is_err() {
			error!("Adlogs dispatcher is gone, dropping event: {}", message);
		}
	}

	pub fn info(&self, category: &str, message: &str) {
		self.emit(Severity::Info, category, message);
	}

	pub fn warning(&self, category: &str, message: &str) {
		self.emit(Severity::Warning, category, message);
	}

	pub fn stop(&self, category: &str, message: &str) {
		self.emit(Severity::Stop, category, message);
	}

	/// Subscribe to every event whose message equals `message`.
	pub fn subscribe(&self, message: &str) -> Receiver<RuntimeEvent> {
		self.add_subscription(message, false)
	}

	/// Subscribe to the next event whose message equals `message`.
	pub fn subscribe_once(&self, message: &str) -> Receiver<RuntimeEvent> {
		self.add_subscription(message, true)
	}

	fn add_subscription(&self, message: &str, once: bool) -> Receiver<RuntimeEvent> {
		let (tx, rx) = flume::unbounded();
		let sub = Subscription { message: message.into(), once, tx };
		if self.tx.send(Msg::Subscribe(sub)).is_err() {
			error!("Adlogs dispatcher is gone, subscription to '{}' is dead", message);
		}
		rx
	}
}

impl Default for Adlogs {
	fn default() -> Self {
		Self::new()
	}
}

fn dispatcher_loop(rx: &Receiver<Msg>, exit_on_stop: bool) {
	let mut subs: Vec<Subscription> = Vec::new();

	while let Ok(msg) = rx.recv() {
		match msg {
			Msg::Subscribe(sub) => subs.push(sub),
			Msg::Event(event) => {
				match event.severity {
					Severity::Info => info!("[{}] {}", event.category, event.message),
					Severity::Warning => warn!("[{}] {}", event.category, event.message),
					Severity::Stop => error!("[{}] {}", event.category, event.message),
				}

				subs.retain(|sub| {
					if sub.message == event.message {
						let delivered = sub.tx.send(event.clone()).is_ok();
						delivered && !sub.once
					} else {
						!sub.tx.is_disconnected()
					}
				});

				if event.severity == Severity::Stop && exit_on_stop {
					std::process::exit(1);
				}
			}
		}
	}
}


// vim: ts=4
