//! User agent parsing.
//!
//! Marker-based extraction of browser and OS name/version from the raw
//! user-agent string. Classification ambiguity is never fatal: unparsable
//! fields fall back to `"unknown"` sentinels.

use serde::Serialize;

pub const UNKNOWN: &str = "unknown";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgent {
	pub browser_name: Box<str>,
	pub browser_version: Box<str>,
	pub os_name: Box<str>,
	pub os_version: Box<str>,
}

impl UserAgent {
	pub fn parse(raw: &str) -> Self {
		let (browser_name, browser_version) = parse_browser(raw);
		let (os_name, os_version) = parse_os(raw);
		Self { browser_name, browser_version, os_name, os_version }
	}
}

impl Default for UserAgent {
	fn default() -> Self {
		Self {
			browser_name: UNKNOWN.into(),
			browser_version: UNKNOWN.into(),
			os_name: UNKNOWN.into(),
			os_version: UNKNOWN.into(),
		}
	}
}

// Order matters: Chrome UAs also carry "Safari/", Edge and Opera UAs also
// carry "Chrome/".
const BROWSER_MARKERS: &[(&str, &str)] = &[
	("Firefox/", "Firefox"),
	("Edg/", "Edge"),
	("OPR/", "Opera"),
	("Chrome/", "Chrome"),
	("Version/", "Safari"),
	("Safari/", "Safari"),
];

fn parse_browser(ua: &str) -> (Box<str>, Box<str>) {
	for (marker, name) in BROWSER_MARKERS {
		if let Some(version) = extract_version_after_marker(ua, marker) {
			return ((*name).into(), version.into());
		}
	}
	(UNKNOWN.into(), UNKNOWN.into())
}

const OS_MARKERS: &[(&str, &str)] = &[
	("Android ", "Android"),
	("iPhone OS ", "iOS"),
	("CPU OS ", "iOS"),
	("Windows NT ", "Windows"),
	("Mac OS X ", "macOS"),
];

fn parse_os(ua: &str) -> (Box<str>, Box<str>) {
	for (marker, name) in OS_MARKERS {
		if let Some(version) = extract_version_after_marker(ua, marker) {
			return ((*name).into(), version.into());
		}
	}
	if ua.contains("Linux") {
		return ("Linux".into(), UNKNOWN.into());
	}
	(UNKNOWN.into(), UNKNOWN.into())
}

fn extract_version_after_marker(ua: &str, marker: &str) -> Option<String> {
	let idx = ua.find(marker)?;
	let rest = &ua[idx + marker.len()..];
	let token: String = rest
		.chars()
		.take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
		.collect();
	if token.is_empty() || !token.starts_with(|c: char| c.is_ascii_digit()) {
		return None;
	}
	// Apple UAs separate version components with underscores
	Some(token.replace('_', "."))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_chrome_on_windows() {
		let ua = UserAgent::parse(
			"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
			(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
		);
		assert_eq!(&*ua.browser_name, "Chrome");
		assert_eq!(&*ua.browser_version, "120.0.0.0");
		assert_eq!(&*ua.os_name, "Windows");
		assert_eq!(&*ua.os_version, "10.0");
	}

	#[test]
	fn test_firefox_on_linux() {
		let ua = UserAgent::parse(
			"Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
		);
		assert_eq!(&*ua.browser_name, "Firefox");
		assert_eq!(&*ua.browser_version, "121.0");
		assert_eq!(&*ua.os_name, "Linux");
		assert_eq!(&*ua.os_version, UNKNOWN);
	}

	#[test]
	fn test_safari_on_iphone_uses_version_token() {
		let ua = UserAgent::parse(
			"Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 \
			(KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
		);
		assert_eq!(&*ua.browser_name, "Safari");
		assert_eq!(&*ua.browser_version, "17.1");
		assert_eq!(&*ua.os_name, "iOS");
		assert_eq!(&*ua.os_version, "17.1");
	}

	#[test]
	fn test_edge_wins_over_chrome_marker() {
		let ua = UserAgent::parse(
			"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
			(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91",
		);
		assert_eq!(&*ua.browser_name, "Edge");
		assert_eq!(&*ua.browser_version, "120.0.2210.91");
	}

	#[test]
	fn test_unparsable_falls_back_to_unknown() {
		let ua = UserAgent::parse("curl/8.5.0");
		assert_eq!(&*ua.browser_name, UNKNOWN);
		assert_eq!(&*ua.browser_version, UNKNOWN);
		assert_eq!(&*ua.os_name, UNKNOWN);
		assert_eq!(&*ua.os_version, UNKNOWN);
	}

	#[test]
	fn test_empty_input() {
		let ua = UserAgent::parse("");
		assert_eq!(&*ua.browser_name, UNKNOWN);
		assert_eq!(&*ua.os_name, UNKNOWN);
	}
}

// vim: ts=4
