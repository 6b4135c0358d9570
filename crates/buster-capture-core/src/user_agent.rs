//! User-agent parsing for captured clients.
//!
//! Token based and total: anything unrecognised comes back as `Unknown`
//! rather than an error, so a strange browser can still join a run.

use serde::{Deserialize, Serialize};

const UNKNOWN: &str = "Unknown";

// ─── Definitions ─────────────────────────────────────────────────

/// Browser detection definition.
#[derive(Debug, Clone, Copy)]
struct BrowserDef {
    browser: &'static str,
    /// Any of these tokens identifies the browser. Checked in order.
    markers: &'static [&'static str],
    /// When present in the UA, the version follows this token instead of
    /// the matched marker (e.g. Safari's `Version/5.0.4`).
    version_marker: Option<&'static str>,
}

/// Checked top to bottom: Edge and Opera advertise Chrome, and Chrome
/// advertises Safari, so the more specific entries come first.
const BROWSER_DEFS: &[BrowserDef] = &[
    BrowserDef {
        browser: "Node",
        markers: &["Node.js/", "node/"],
        version_marker: None,
    },
    BrowserDef {
        browser: "Edge",
        markers: &["Edg/", "Edge/", "EdgiOS/"],
        version_marker: None,
    },
    BrowserDef {
        browser: "Opera",
        markers: &["OPR/", "Opera/", "Opera "],
        version_marker: Some("Version/"),
    },
    BrowserDef {
        browser: "Chrome",
        markers: &["Chrome/", "CriOS/"],
        version_marker: None,
    },
    BrowserDef {
        browser: "Firefox",
        markers: &["Firefox/", "FxiOS/"],
        version_marker: None,
    },
    BrowserDef {
        browser: "Safari",
        markers: &["Safari/"],
        version_marker: Some("Version/"),
    },
    BrowserDef {
        browser: "Internet Explorer",
        markers: &["MSIE ", "Trident/"],
        version_marker: Some("rv:"),
    },
];

/// Platform tokens, most specific first (Android and ChromeOS say Linux too).
const PLATFORM_DEFS: &[(&str, &[&str])] = &[
    ("Windows", &["Windows"]),
    ("iOS", &["iPhone", "iPad", "iPod"]),
    ("Android", &["Android"]),
    ("Chrome OS", &["CrOS"]),
    ("OS X", &["Mac OS X", "Macintosh"]),
    ("Linux", &["Linux", "X11"]),
];

// ─── User Agent ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserAgent {
    pub browser: String,
    pub version: String,
    pub platform: String,
}

impl UserAgent {
    pub fn parse(raw: &str) -> Self {
        let (browser, version) = detect_browser(raw);
        Self {
            browser: browser.to_owned(),
            version: version.to_owned(),
            platform: detect_platform(raw).to_owned(),
        }
    }
}

fn detect_browser(raw: &str) -> (&'static str, &str) {
    for def in BROWSER_DEFS {
        let Some(marker_version) = def.markers.iter().find_map(|m| token_after(raw, m)) else {
            continue;
        };
        let version = def
            .version_marker
            .and_then(|m| token_after(raw, m))
            .unwrap_or(marker_version);
        let version = if version.is_empty() { UNKNOWN } else { version };
        return (def.browser, version);
    }
    (UNKNOWN, UNKNOWN)
}

fn detect_platform(raw: &str) -> &'static str {
    PLATFORM_DEFS
        .iter()
        .find(|(_, tokens)| tokens.iter().any(|t| raw.contains(t)))
        .map_or(UNKNOWN, |(platform, _)| platform)
}

/// The run of characters directly following `marker`, up to a separator.
/// `None` when the marker does not occur.
fn token_after<'a>(raw: &'a str, marker: &str) -> Option<&'a str> {
    let start = raw.find(marker)? + marker.len();
    let rest = &raw[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || matches!(c, ';' | ')' | ','))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

// ─── Tests ───────────────────────────────────────────────────────
