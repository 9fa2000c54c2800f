use actix_web::body::EitherBody;
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    web, Error, HttpMessage, HttpResponse,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{debug, info, instrument, warn};

use crate::config::GateConfig;
use crate::pages;
use crate::redirect::{capture_target, challenge_location, is_challenge_path, STATIC_PREFIX};
use crate::visitor::{VisitorState, FAILURES_COOKIE, VERIFIED_COOKIE};

/// Extensions that are served without a challenge
pub const STATIC_EXTENSIONS: &[&str] = &[".css", ".js", ".ico", ".png", ".jpg", ".jpeg", ".gif", ".svg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Challenge paths and static assets
    Bypass,
    /// Visitor holds a valid verification cookie
    Verified,
    /// Too many failures; answer 403 without redirecting
    Blocked { failures: u32 },
    /// Send the visitor to the challenge page
    Challenge { location: String },
}

/// Whether `path` is exempt from the gate
pub fn is_exempt(path: &str) -> bool {
    if path.starts_with(STATIC_PREFIX) || is_challenge_path(path) {
        return true;
    }
    let lower = path.to_ascii_lowercase();
    STATIC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Decide what happens to a request before routing
pub fn evaluate(path: &str, query: &str, verified: Option<&str>, failures: Option<&str>) -> GateDecision {
    if is_exempt(path) {
        return GateDecision::Bypass;
    }

    match VisitorState::from_cookies(verified, failures) {
        VisitorState::Verified => GateDecision::Verified,
        VisitorState::Blocked { failures } => GateDecision::Blocked { failures },
        VisitorState::Unverified { .. } => GateDecision::Challenge {
            location: challenge_location(&capture_target(path, query)),
        },
    }
}

/// Middleware applying [`evaluate`] to every request
#[derive(Default)]
pub struct GateMiddleware;

impl GateMiddleware {
    pub fn new() -> Self {
        GateMiddleware
    }
}

impl<S, B> Transform<S, ServiceRequest> for GateMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = GateMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(GateMiddlewareService {
            service: Rc::new(service),
        })
    }
}

pub struct GateMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for GateMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    #[instrument(name = "gate", skip(self, req), fields(path = %req.path(), method = %req.method()))]
    fn call(&self, req: ServiceRequest) -> Self::Future {
        let verified = req.cookie(VERIFIED_COOKIE);
        let failures = req.cookie(FAILURES_COOKIE);
        let decision = evaluate(
            req.path(),
            req.query_string(),
            verified.as_ref().map(|c| c.value()),
            failures.as_ref().map(|c| c.value()),
        );

        match decision {
            GateDecision::Bypass | GateDecision::Verified => {
                debug!("Passing request through");
                let fut = self.service.call(req);
                Box::pin(async move {
                    let res = fut.await?;
                    Ok(res.map_into_left_body())
                })
            }
            GateDecision::Blocked { failures } => {
                warn!(failures, "Visitor exceeded maximum verification attempts");
                let body = match req.app_data::<web::Data<GateConfig>>() {
                    Some(config) => pages::failed_page(&config.brand, &config.contact_url, pages::REASON_BLOCKED, None),
                    None => pages::REASON_BLOCKED.to_string(),
                };
                short_circuit(req, pages::html(StatusCode::FORBIDDEN).body(body))
            }
            GateDecision::Challenge { location } => {
                info!(location = %location, "Unverified visitor, redirecting to challenge");
                let response = HttpResponse::Found()
                    .insert_header((header::LOCATION, location))
                    .insert_header((header::CACHE_CONTROL, "no-store"))
                    .finish();
                short_circuit(req, response)
            }
        }
    }
}

/// Answer without reaching the wrapped service
fn short_circuit<B: 'static>(
    req: ServiceRequest,
    response: HttpResponse,
) -> LocalBoxFuture<'static, Result<ServiceResponse<EitherBody<B>>, Error>> {
    let (request, _) = req.into_parts();
    Box::pin(async move { Ok(ServiceResponse::new(request, response).map_into_right_body()) })
}
