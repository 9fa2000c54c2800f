// SPDX-License-Identifier: Apache-2.0
//! Redirect target handling.
//!
//! The `next` target travels gate -> challenge page -> POST -> final redirect.
//! Everything here is pure string work so the rules can be tested without a
//! server: capture the original URL, carry it through one extra layer of
//! percent-encoding, rebuild it on the way back, and refuse anything that
//! leaves the site or loops back into the challenge.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::{form_urlencoded, Position, Url};

/// Path of the challenge endpoint; also the prefix of everything it owns
pub const CHALLENGE_PATH: &str = "/challenge";
/// Static assets of the challenge page
pub const STATIC_PREFIX: &str = "/challenge/static/";
/// Query parameter carrying the redirect target
pub const NEXT_PARAM: &str = "next";
/// Safe fallback target
pub const ROOT: &str = "/";

/// Escapes everything except RFC 3986 unreserved characters, so a full
/// path-and-query survives being embedded as a single query value.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Reserved characters are escaped except the ones that keep a URL readable.
/// `%` is left alone so an already-encoded target is not encoded twice.
const ATTRIBUTE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'@')
    .add(b'!')
    .add(b'$')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'^')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Characters that cannot appear in a `Location` header value as-is
const LOCATION: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'\\')
    .add(b'^')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// The origin a request was made against, as seen through forwarding headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
}

impl Origin {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    fn base(&self) -> Option<Url> {
        Url::parse(&format!("{}://{}/", self.scheme, self.host)).ok()
    }
}

/// Outcome of checking a candidate redirect target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validated {
    /// Same-origin target outside the challenge flow
    Safe(String),
    /// Points at another host, a non-web scheme, or is not a usable URL
    OffSite,
    /// Points back into the challenge flow
    Loop,
}

impl Validated {
    /// Collapse to a redirect location, replacing anything unusable with `/`
    pub fn or_root(self) -> String {
        match self {
            Validated::Safe(target) => target,
            Validated::OffSite | Validated::Loop => ROOT.to_string(),
        }
    }
}

/// Whether `path` belongs to the challenge subsystem
pub fn is_challenge_path(path: &str) -> bool {
    path.starts_with(CHALLENGE_PATH)
}

/// Capture the original destination of a request: raw path plus raw query.
///
/// Empty captures and captures inside the challenge flow become `/`.
pub fn capture_target(path: &str, query: &str) -> String {
    let captured = if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    };

    if captured.is_empty() || is_challenge_path(&captured) {
        ROOT.to_string()
    } else {
        captured
    }
}

/// Encode a target as a single query-parameter value
pub fn encode_component(target: &str) -> String {
    utf8_percent_encode(target, COMPONENT).to_string()
}

/// `/challenge?next=...` for the given target
pub fn challenge_location(target: &str) -> String {
    format!("{CHALLENGE_PATH}?{NEXT_PARAM}={}", encode_component(target))
}

/// Encode a target for display in an HTML attribute. The result still needs
/// HTML escaping for `&`.
pub fn encode_attribute(target: &str) -> String {
    utf8_percent_encode(target, ATTRIBUTE).to_string()
}

/// Rebuild the intended target from the challenge endpoint's query string.
///
/// `next` is decoded exactly once. Other top-level parameters are treated as
/// pieces of the target's own query that were split off by an unencoded `&`,
/// and are merged back in; parameters already present in the target win.
/// Returns `None` when no `next` parameter is present.
pub fn reconstruct_target(query: &str) -> Option<String> {
    let mut next: Option<String> = None;
    let mut extras: Vec<(String, String)> = Vec::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == NEXT_PARAM {
            if next.is_none() {
                next = Some(value.into_owned());
            }
        } else {
            extras.push((key.into_owned(), value.into_owned()));
        }
    }

    let next = next?;
    debug!(next = %next, extras = extras.len(), "Reconstructing redirect target");
    Some(merge_query(next, &extras))
}

fn merge_query(target: String, extras: &[(String, String)]) -> String {
    if extras.is_empty() {
        return target;
    }

    let (without_fragment, fragment) = match target.find('#') {
        Some(idx) => target.split_at(idx),
        None => (target.as_str(), ""),
    };
    let (path, existing) = without_fragment.split_once('?').unwrap_or((without_fragment, ""));

    let existing_keys: HashSet<String> = form_urlencoded::parse(existing.as_bytes())
        .map(|(key, _)| key.into_owned())
        .collect();

    let mut appended = form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in extras.iter().filter(|(key, _)| !existing_keys.contains(key)) {
        appended.append_pair(key, value);
        any = true;
    }
    if !any {
        return target;
    }
    let appended = appended.finish();

    let query = if existing.is_empty() {
        appended
    } else {
        format!("{existing}&{appended}")
    };
    format!("{path}?{query}{fragment}")
}

/// Check a candidate target against the request origin.
///
/// The candidate is resolved against the origin root the way a browser would
/// resolve a `Location` header, so scheme-relative (`//host`), backslash and
/// `scheme:host` forms are judged by where they actually lead. A safe result
/// is always the resolved path, query and fragment, starting with `/`.
pub fn validate_target(candidate: &str, origin: &Origin) -> Validated {
    if candidate.is_empty() {
        return Validated::Safe(ROOT.to_string());
    }
    if candidate.chars().any(char::is_control) {
        warn!(next = %candidate.escape_debug(), "Rejecting redirect target with control characters");
        return Validated::OffSite;
    }

    let resolved = match origin.base() {
        Some(base) => base.join(candidate).ok(),
        None => None,
    };

    let Some(resolved) = resolved else {
        // Without a usable origin only plain absolute paths are trusted
        if candidate.starts_with('/') && !candidate.starts_with("//") && !candidate.starts_with("/\\") {
            return if is_challenge_path(candidate) {
                Validated::Loop
            } else {
                Validated::Safe(utf8_percent_encode(candidate, LOCATION).to_string())
            };
        }
        warn!(next = %candidate, host = %origin.host, "Discarding unresolvable redirect target");
        return Validated::OffSite;
    };

    if !matches!(resolved.scheme(), "http" | "https") || !same_host(&resolved, &origin.host) {
        warn!(
            next = %candidate,
            resolved_host = %resolved.host_str().unwrap_or(""),
            host = %origin.host,
            "Discarding cross-origin redirect target"
        );
        return Validated::OffSite;
    }

    // Relative to the origin root, never to the challenge URL
    let local = &resolved[Position::BeforePath..];
    if is_challenge_path(local) {
        return Validated::Loop;
    }

    Validated::Safe(utf8_percent_encode(local, LOCATION).to_string())
}

fn same_host(resolved: &Url, host: &str) -> bool {
    let Some(resolved_host) = resolved.host_str() else {
        return false;
    };
    let authority = match resolved.port() {
        Some(port) => format!("{resolved_host}:{port}"),
        None => resolved_host.to_string(),
    };
    authority.eq_ignore_ascii_case(host)
        || default_port_stripped(host).is_some_and(|h| h.eq_ignore_ascii_case(&authority))
}

/// `example.org:443` and `example.org:80` compare equal to `example.org`
fn default_port_stripped(host: &str) -> Option<&str> {
    host.strip_suffix(":443").or_else(|| host.strip_suffix(":80"))
}

/// Target for rendering the challenge page: loops are an error, anything
/// off-site becomes `/`.
pub fn resolve_for_render(query: &str, origin: &Origin) -> Result<String, Validated> {
    let candidate = reconstruct_target(query).unwrap_or_else(|| ROOT.to_string());
    match validate_target(&candidate, origin) {
        Validated::Safe(target) => Ok(target),
        Validated::OffSite => Ok(ROOT.to_string()),
        Validated::Loop => Err(Validated::Loop),
    }
}

/// Target for the post-verification redirect: never fails, anything unsafe
/// becomes `/`. `fallback` is consulted when the query carries no `next`.
pub fn resolve_for_redirect(query: &str, fallback: Option<&str>, origin: &Origin) -> String {
    let candidate = reconstruct_target(query)
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| ROOT.to_string());
    validate_target(&candidate, origin).or_root()
}
