use actix_files::Files;
use actix_web::{
    cookie::Cookie,
    http::{header, StatusCode},
    web, Error, HttpRequest, HttpResponse, Responder,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{debug, error, info, instrument, warn};

use crate::config::GateConfig;
use crate::pages;
use crate::proxy;
use crate::redirect::{resolve_for_redirect, resolve_for_render, Origin, CHALLENGE_PATH};
use crate::turnstile::Verifier;
use crate::visitor::{is_verified, Event, VisitorState, FAILURES_COOKIE, VERIFIED_COOKIE};

pub const AUTH_PATH: &str = "/challenge/auth";
pub const HEALTH_PATH: &str = "/challenge/health";
pub const STATIC_MOUNT: &str = "/challenge/static";

#[derive(Debug, Default, Deserialize)]
pub struct ChallengeForm {
    #[serde(rename = "cf-turnstile-response")]
    pub token: Option<String>,
    pub next: Option<String>,
}

/// Register the gate's routes. Passed requests fall through to the
/// default service, which forwards them when an upstream is configured.
pub fn routes(static_dir: String) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.service(
            web::resource(AUTH_PATH)
                .route(web::get().to(auth))
                .route(web::head().to(auth)),
        )
        .service(web::resource(HEALTH_PATH).route(web::get().to(health_check)))
        .service(
            web::resource(CHALLENGE_PATH)
                .route(web::get().to(challenge_get))
                .route(web::post().to(challenge_post)),
        )
        .service(Files::new(STATIC_MOUNT, static_dir))
        .default_service(web::to(passthrough));
    }
}

fn origin(req: &HttpRequest) -> Origin {
    let info = req.connection_info();
    Origin::new(info.scheme(), info.host())
}

/// Caller address without the port, as the verification API expects
fn client_ip(req: &HttpRequest) -> Option<String> {
    let info = req.connection_info();
    let addr = info.realip_remote_addr()?;
    Some(
        addr.parse::<SocketAddr>()
            .map(|sock| sock.ip().to_string())
            .unwrap_or_else(|_| addr.to_string()),
    )
}

fn visitor_state(req: &HttpRequest) -> VisitorState {
    let verified = req.cookie(VERIFIED_COOKIE);
    let failures = req.cookie(FAILURES_COOKIE);
    VisitorState::from_cookies(
        verified.as_ref().map(|c| c.value()),
        failures.as_ref().map(|c| c.value()),
    )
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json("turnstile-gate is running")
}

/// Auth predicate for the reverse proxy: 200 when verified, 401 otherwise
pub async fn auth(req: HttpRequest) -> HttpResponse {
    let cookie = req.cookie(VERIFIED_COOKIE);
    let value = cookie.as_ref().map(|c| c.value());
    debug!(cookie = ?value, "Auth check");
    if is_verified(value) {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::Unauthorized().finish()
    }
}

/// Render the widget for the requested target
#[instrument(skip(req, config), fields(query = %req.query_string()))]
pub async fn challenge_get(req: HttpRequest, config: web::Data<GateConfig>) -> HttpResponse {
    match resolve_for_render(req.query_string(), &origin(&req)) {
        Ok(target) => {
            debug!(next = %target, "Rendering challenge");
            pages::html(StatusCode::OK).body(pages::challenge_page(
                &config.brand,
                &config.turnstile.site_key,
                &target,
            ))
        }
        Err(_) => {
            warn!("Redirect target points into the challenge flow");
            pages::html(StatusCode::FORBIDDEN).body(pages::failed_page(
                &config.brand,
                &config.contact_url,
                pages::REASON_INVALID_TARGET,
                None,
            ))
        }
    }
}

/// Check the submitted token upstream, then redirect or re-challenge
#[instrument(skip(req, form, config, verifier), fields(query = %req.query_string()))]
pub async fn challenge_post(
    req: HttpRequest,
    form: Option<web::Form<ChallengeForm>>,
    config: web::Data<GateConfig>,
    verifier: web::Data<dyn Verifier>,
) -> HttpResponse {
    let form = form.map(web::Form::into_inner).unwrap_or_default();
    let target = resolve_for_redirect(req.query_string(), form.next.as_deref(), &origin(&req));
    let state = visitor_state(&req);

    let failed = |reason: &str, cookies: Vec<Cookie<'static>>| {
        let mut builder = pages::html(StatusCode::FORBIDDEN);
        for cookie in cookies {
            builder.cookie(cookie);
        }
        builder.body(pages::failed_page(
            &config.brand,
            &config.contact_url,
            reason,
            Some(target.as_str()),
        ))
    };

    if state.is_blocked() {
        warn!(failures = state.failures(), "Blocked visitor submitted a token");
        return pages::html(StatusCode::FORBIDDEN).body(pages::failed_page(
            &config.brand,
            &config.contact_url,
            pages::REASON_BLOCKED,
            None,
        ));
    }

    let Some(token) = form.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        warn!("Turnstile token missing from POST");
        let next_state = state.transition(Event::TokenMissing);
        return failed(
            pages::REASON_TOKEN_MISSING,
            state.cookie_changes(next_state, &config.cookies),
        );
    };

    let ip = client_ip(&req);
    let result = match verifier.verify(token, ip.as_deref()).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Error contacting verification service");
            return HttpResponse::InternalServerError()
                .content_type("text/plain; charset=utf-8")
                .body(pages::VERIFICATION_ERROR_BODY);
        }
    };

    if result.success {
        let next_state = state.transition(Event::Passed);
        info!(next = %target, "Verification succeeded, redirecting");
        let mut builder = HttpResponse::SeeOther();
        builder
            .insert_header((header::LOCATION, target.as_str()))
            .insert_header((header::CACHE_CONTROL, "no-store"));
        for cookie in state.cookie_changes(next_state, &config.cookies) {
            builder.cookie(cookie);
        }
        builder.finish()
    } else {
        let next_state = state.transition(Event::Failed);
        warn!(
            error_codes = ?result.error_codes,
            ip = ip.as_deref().unwrap_or("unknown"),
            failures = next_state.failures(),
            "Verification failed"
        );
        failed(
            pages::REASON_REJECTED,
            state.cookie_changes(next_state, &config.cookies),
        )
    }
}

/// Requests that passed the gate
pub async fn passthrough(
    req: HttpRequest,
    payload: web::Payload,
    config: web::Data<GateConfig>,
) -> Result<HttpResponse, Error> {
    match config.upstream.as_deref() {
        Some(upstream) => proxy::forward(req, payload, upstream).await,
        None => Ok(HttpResponse::NotFound()
            .content_type("text/plain; charset=utf-8")
            .body("Not Found")),
    }
}
