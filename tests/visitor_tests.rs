// SPDX-License-Identifier: Apache-2.0
use actix_web::cookie::{time::Duration, Cookie, SameSite};
use turnstile_gate::config::CookieSettings;
use turnstile_gate::visitor::{
    parse_failures, Event, VisitorState, FAILURES_COOKIE, MAX_FAILURES, VERIFIED_COOKIE,
};

fn settings() -> CookieSettings {
    CookieSettings {
        domain: Some(".example.org".to_string()),
        ..CookieSettings::default()
    }
}

fn find<'a>(cookies: &'a [Cookie<'static>], name: &str) -> &'a Cookie<'static> {
    cookies
        .iter()
        .find(|c| c.name() == name)
        .unwrap_or_else(|| panic!("missing cookie {name}"))
}

#[test]
fn test_parse_failures_tolerates_garbage() {
    assert_eq!(parse_failures(None), 0);
    assert_eq!(parse_failures(Some("2")), 2);
    assert_eq!(parse_failures(Some(" 2 ")), 2);
    assert_eq!(parse_failures(Some("")), 0);
    assert_eq!(parse_failures(Some("abc")), 0);
    assert_eq!(parse_failures(Some("-1")), 0);
    assert_eq!(parse_failures(Some("1.5")), 0);
    assert_eq!(parse_failures(Some("99999999999999")), 0);
}

#[test]
fn test_state_from_cookies() {
    assert_eq!(
        VisitorState::from_cookies(None, None),
        VisitorState::Unverified { failures: 0 }
    );
    assert_eq!(
        VisitorState::from_cookies(Some("1"), Some("5")),
        VisitorState::Verified
    );
    assert_eq!(
        VisitorState::from_cookies(Some("true"), Some("2")),
        VisitorState::Unverified { failures: 2 }
    );
    assert_eq!(
        VisitorState::from_cookies(None, Some("3")),
        VisitorState::Blocked { failures: 3 }
    );
    assert_eq!(
        VisitorState::from_cookies(None, Some("not-a-number")),
        VisitorState::Unverified { failures: 0 }
    );
}

#[test]
fn test_failures_accumulate_until_blocked() {
    let mut state = VisitorState::Unverified { failures: 0 };
    for expected in 1..MAX_FAILURES {
        state = state.transition(Event::Failed);
        assert_eq!(state, VisitorState::Unverified { failures: expected });
    }
    state = state.transition(Event::Failed);
    assert_eq!(state, VisitorState::Blocked { failures: MAX_FAILURES });
    assert!(state.is_blocked());
}

#[test]
fn test_blocked_is_terminal() {
    let blocked = VisitorState::Blocked { failures: 3 };
    assert_eq!(blocked.transition(Event::Passed), blocked);
    assert_eq!(blocked.transition(Event::Failed), blocked);
    assert_eq!(blocked.transition(Event::TokenMissing), blocked);
}

#[test]
fn test_missing_token_does_not_count() {
    let state = VisitorState::Unverified { failures: 2 };
    assert_eq!(state.transition(Event::TokenMissing), state);
    assert!(state.cookie_changes(state.transition(Event::TokenMissing), &settings()).is_empty());
}

#[test]
fn test_success_verifies() {
    assert_eq!(
        VisitorState::Unverified { failures: 2 }.transition(Event::Passed),
        VisitorState::Verified
    );
}

#[test]
fn test_failure_after_success_restarts_counter() {
    assert_eq!(
        VisitorState::Verified.transition(Event::Failed),
        VisitorState::Unverified { failures: 1 }
    );
}

#[test]
fn test_cookies_on_success() {
    let old = VisitorState::Unverified { failures: 1 };
    let cookies = old.cookie_changes(VisitorState::Verified, &settings());
    assert_eq!(cookies.len(), 2);

    let verified = find(&cookies, VERIFIED_COOKIE);
    assert_eq!(verified.value(), "1");
    assert_eq!(verified.max_age(), Some(Duration::hours(8)));
    assert_eq!(verified.secure(), Some(true));
    assert_eq!(verified.http_only(), Some(true));
    assert_eq!(verified.same_site(), Some(SameSite::Lax));
    assert_eq!(verified.domain().map(|d| d.trim_start_matches('.')), Some("example.org"));
    assert_eq!(verified.path(), Some("/"));

    let failures = find(&cookies, FAILURES_COOKIE);
    assert_eq!(failures.value(), "");
    assert_eq!(failures.max_age(), Some(Duration::ZERO));
    assert_eq!(failures.path(), Some("/"));
}

#[test]
fn test_cookies_on_failure() {
    let old = VisitorState::Unverified { failures: 0 };
    let new = old.transition(Event::Failed);
    let cookies = old.cookie_changes(new, &settings());
    assert_eq!(cookies.len(), 1);

    let failures = find(&cookies, FAILURES_COOKIE);
    assert_eq!(failures.value(), "1");
    assert_eq!(failures.max_age(), Some(Duration::seconds(600)));
    assert_eq!(failures.path(), Some("/"));
    assert_eq!(failures.domain(), None);
}

#[test]
fn test_cookies_when_reaching_block() {
    let old = VisitorState::Unverified { failures: 2 };
    let new = old.transition(Event::Failed);
    let cookies = old.cookie_changes(new, &settings());
    assert_eq!(find(&cookies, FAILURES_COOKIE).value(), "3");
}

#[test]
fn test_failure_after_success_keeps_verification_cookie() {
    let old = VisitorState::Verified;
    let new = old.transition(Event::Failed);
    let cookies = old.cookie_changes(new, &settings());
    assert_eq!(cookies.len(), 1);
    assert!(cookies.iter().all(|c| c.name() != VERIFIED_COOKIE));
    assert_eq!(find(&cookies, FAILURES_COOKIE).value(), "1");
}

#[test]
fn test_cookie_settings_are_honoured() {
    let settings = CookieSettings {
        domain: None,
        secure: false,
        same_site: SameSite::Strict,
        verified_ttl: std::time::Duration::from_secs(60),
        failure_ttl: std::time::Duration::from_secs(30),
    };
    let cookies = VisitorState::Unverified { failures: 0 }.cookie_changes(VisitorState::Verified, &settings);
    let verified = find(&cookies, VERIFIED_COOKIE);
    assert_eq!(verified.domain(), None);
    assert_eq!(verified.secure(), Some(false));
    assert_eq!(verified.same_site(), Some(SameSite::Strict));
    assert_eq!(verified.max_age(), Some(Duration::seconds(60)));

    let cookies = VisitorState::Unverified { failures: 0 }
        .cookie_changes(VisitorState::Unverified { failures: 1 }, &settings);
    assert_eq!(find(&cookies, FAILURES_COOKIE).max_age(), Some(Duration::seconds(30)));
}
