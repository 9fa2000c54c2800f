// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code, unused_macros)]

use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::HashSet;

use turnstile_gate::config::GateConfig;
use turnstile_gate::turnstile::{SiteVerifyResponse, Verifier, VerifyError};

pub const HOST: &str = "gate.example.org";
pub const COOKIE_DOMAIN: &str = ".example.org";
pub const GOOD_TOKEN: &str = "good-token";

pub fn test_config() -> GateConfig {
    let mut config = GateConfig::new("test-secret", "test-sitekey");
    config.cookies.domain = Some(COOKIE_DOMAIN.to_string());
    config
}

/// Accepts a fixed set of tokens, each exactly once, like the real service
pub struct FakeVerifier {
    valid: HashSet<String>,
    consumed: RefCell<HashSet<String>>,
    pub calls: RefCell<Vec<(String, Option<String>)>>,
}

impl FakeVerifier {
    pub fn accepting(tokens: &[&str]) -> Self {
        Self {
            valid: tokens.iter().map(|t| t.to_string()).collect(),
            consumed: RefCell::new(HashSet::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Verifier for FakeVerifier {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: Option<&'a str>,
    ) -> LocalBoxFuture<'a, Result<SiteVerifyResponse, VerifyError>> {
        self.calls
            .borrow_mut()
            .push((token.to_string(), remote_ip.map(str::to_string)));
        let fresh = self.valid.contains(token) && self.consumed.borrow_mut().insert(token.to_string());
        let response = if fresh {
            SiteVerifyResponse {
                success: true,
                hostname: Some(HOST.to_string()),
                ..Default::default()
            }
        } else if self.valid.contains(token) {
            SiteVerifyResponse {
                success: false,
                error_codes: vec!["timeout-or-duplicate".to_string()],
                ..Default::default()
            }
        } else {
            SiteVerifyResponse {
                success: false,
                error_codes: vec!["invalid-input-response".to_string()],
                ..Default::default()
            }
        };
        Box::pin(async move { Ok(response) })
    }
}

/// Simulates the verification service being unreachable
pub struct UnreachableVerifier;

impl Verifier for UnreachableVerifier {
    fn verify<'a>(
        &'a self,
        _token: &'a str,
        _remote_ip: Option<&'a str>,
    ) -> LocalBoxFuture<'a, Result<SiteVerifyResponse, VerifyError>> {
        Box::pin(async { Err(VerifyError::Transport("connection refused".to_string())) })
    }
}

/// Build the gate's full app around a verifier and config
macro_rules! gate_app {
    ($verifier:expr) => {
        gate_app!($verifier, common::test_config())
    };
    ($verifier:expr, $config:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(turnstile_gate::gate::GateMiddleware::new())
                .app_data(actix_web::web::Data::new($config))
                .app_data(actix_web::web::Data::from($verifier))
                .configure(turnstile_gate::handlers::routes("static".to_string())),
        )
        .await
    };
}
