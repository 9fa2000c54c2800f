// SPDX-License-Identifier: Apache-2.0
//! Per-visitor verification state.
//!
//! The gate keeps no server-side state: a visitor's standing is whatever the
//! two cookies say. [`VisitorState`] makes that explicit and
//! [`VisitorState::transition`] is the only place the failure counter moves.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie};
use std::time::Duration;

use crate::config::CookieSettings;

/// Cookie holding the verification flag
pub const VERIFIED_COOKIE: &str = "turnstile_verified";
/// Cookie holding the failed attempt count
pub const FAILURES_COOKIE: &str = "turnstile_failures";
/// Value of a valid verification flag
pub const VERIFIED_SENTINEL: &str = "1";
/// Failed attempts after which the visitor is blocked
pub const MAX_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitorState {
    Verified,
    Unverified { failures: u32 },
    /// Terminal until the failure cookie expires
    Blocked { failures: u32 },
}

/// Something that happened to the visitor on the challenge endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Upstream accepted the token
    Passed,
    /// Upstream rejected the token
    Failed,
    /// The form carried no token at all
    TokenMissing,
}

/// Read the failure counter; anything unparseable counts as zero
pub fn parse_failures(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok()).unwrap_or(0)
}

/// Whether the verification cookie value is the success sentinel
pub fn is_verified(raw: Option<&str>) -> bool {
    raw == Some(VERIFIED_SENTINEL)
}

impl VisitorState {
    /// Derive the state from raw cookie values. The verification flag wins
    /// over the failure counter.
    pub fn from_cookies(verified: Option<&str>, failures: Option<&str>) -> Self {
        if is_verified(verified) {
            return VisitorState::Verified;
        }
        Self::from_failures(parse_failures(failures))
    }

    fn from_failures(failures: u32) -> Self {
        if failures >= MAX_FAILURES {
            VisitorState::Blocked { failures }
        } else {
            VisitorState::Unverified { failures }
        }
    }

    pub fn failures(&self) -> u32 {
        match self {
            VisitorState::Verified => 0,
            VisitorState::Unverified { failures } | VisitorState::Blocked { failures } => *failures,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, VisitorState::Blocked { .. })
    }

    pub fn transition(self, event: Event) -> Self {
        match (self, event) {
            (VisitorState::Blocked { .. }, _) => self,
            (_, Event::TokenMissing) => self,
            (_, Event::Passed) => VisitorState::Verified,
            // The counter was cleared on success, so it restarts at one
            (VisitorState::Verified, Event::Failed) => Self::from_failures(1),
            (VisitorState::Unverified { failures }, Event::Failed) => {
                Self::from_failures(failures.saturating_add(1))
            }
        }
    }

    /// Cookies to send for the move from `self` to `next`. Empty when nothing
    /// changes. The verification flag is only ever set; it lapses by expiry,
    /// so a verified visitor who fails keeps it and gains a counter.
    pub fn cookie_changes(self, next: VisitorState, settings: &CookieSettings) -> Vec<Cookie<'static>> {
        let mut cookies = Vec::new();
        if self == next {
            return cookies;
        }

        match next {
            VisitorState::Verified => {
                cookies.push(verified_cookie(settings));
                cookies.push(removal_cookie(FAILURES_COOKIE));
            }
            VisitorState::Unverified { failures } | VisitorState::Blocked { failures } => {
                if failures > 0 {
                    cookies.push(failures_cookie(failures, settings));
                }
            }
        }
        cookies
    }
}

fn max_age(ttl: Duration) -> CookieDuration {
    CookieDuration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

/// The verification flag: secure, http-only, scoped to the configured domain
pub fn verified_cookie(settings: &CookieSettings) -> Cookie<'static> {
    let mut builder = Cookie::build(VERIFIED_COOKIE, VERIFIED_SENTINEL)
        .path("/")
        .secure(settings.secure)
        .http_only(true)
        .same_site(settings.same_site)
        .max_age(max_age(settings.verified_ttl));
    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }
    builder.finish()
}

/// The failure counter, host-only with a short lifetime
pub fn failures_cookie(failures: u32, settings: &CookieSettings) -> Cookie<'static> {
    Cookie::build(FAILURES_COOKIE, failures.to_string())
        .path("/")
        .secure(settings.secure)
        .http_only(true)
        .same_site(settings.same_site)
        .max_age(max_age(settings.failure_ttl))
        .finish()
}

/// An expired host-only cookie that makes the client drop `name`
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build(name, "").path("/").finish();
    cookie.make_removal();
    cookie
}
