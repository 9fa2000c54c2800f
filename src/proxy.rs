// SPDX-License-Identifier: Apache-2.0
use actix_web::{
    http::{header, Method, StatusCode},
    web, Error, HttpRequest, HttpResponse,
};
use futures::TryStreamExt;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::visitor::{FAILURES_COOKIE, VERIFIED_COOKIE};

/// Remove the gate's own cookies from a `Cookie` header value.
/// Returns `None` when nothing is left to forward.
pub fn strip_gate_cookies(cookie_header: &str) -> Option<String> {
    let filtered = cookie_header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let name = parts.next()?.trim();
            if name.is_empty() || name == VERIFIED_COOKIE || name == FAILURES_COOKIE {
                return None;
            }
            let value = parts.next().unwrap_or("");
            Some(format!("{}={}", name, value))
        })
        .collect::<Vec<_>>()
        .join("; ");
    if filtered.is_empty() { None } else { Some(filtered) }
}

/// Forward a request that passed the gate to the upstream service
#[instrument(skip(req, payload), fields(method = %req.method(), path = %req.uri().path(), client_ip = %req.connection_info().realip_remote_addr().unwrap_or("unknown")))]
pub async fn forward(req: HttpRequest, payload: web::Payload, upstream: &str) -> Result<HttpResponse, Error> {
    let query = req.uri().query().map_or_else(String::new, |q| format!("?{}", q));
    let forwarded_url = format!("{}{}{}", upstream, req.uri().path(), query);

    debug!(forwarded_url = %forwarded_url, "Forwarding verified request");

    let connector = awc::Connector::new()
        .timeout(Duration::from_secs(10))
        .conn_keep_alive(Duration::from_secs(15))
        .disconnect_timeout(Duration::from_secs(2));

    let client = awc::ClientBuilder::new()
        .timeout(Duration::from_secs(600))
        .connector(connector)
        .finish();

    let mut forwarded_req = client.request(req.method().clone(), forwarded_url).no_decompress();

    for (header_name, header_value) in req.headers().iter().filter(|(h, _)| {
        *h != header::HOST && *h != header::CONNECTION && *h != header::CONTENT_LENGTH && *h != header::COOKIE
    }) {
        forwarded_req = forwarded_req.append_header((header_name.clone(), header_value.clone()));
    }

    if let Some(cookies) = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(strip_gate_cookies)
    {
        forwarded_req = forwarded_req.insert_header((header::COOKIE, cookies));
    }

    // Upstream sees the public host so it generates absolute URLs correctly
    if let Some(host_val) = req.headers().get(header::HOST).cloned() {
        forwarded_req = forwarded_req.insert_header((header::HOST, host_val));
    } else {
        let host = req.connection_info().host().to_string();
        forwarded_req = forwarded_req.insert_header((header::HOST, host));
    }

    if !req.headers().contains_key("X-Forwarded-Proto") {
        let scheme = req.connection_info().scheme().to_string();
        forwarded_req = forwarded_req.insert_header(("X-Forwarded-Proto", scheme));
    }

    if let Some(client_ip) = req.connection_info().realip_remote_addr() {
        forwarded_req = forwarded_req.insert_header((header::FORWARDED, format!("for={}", client_ip)));
    }

    // GET/HEAD/OPTIONS/DELETE go without a body stream so upstreams don't wait for one
    let pending = match *req.method() {
        Method::POST | Method::PUT | Method::PATCH => forwarded_req.send_stream(payload),
        _ => forwarded_req.send(),
    };

    let forwarded_res = pending.await.map_err(|e| {
        error!(error = %e, "Forwarding error to upstream service");
        actix_web::error::ErrorBadGateway(e.to_string())
    })?;

    debug!(status = %forwarded_res.status(), "Received response from upstream service");

    let mut client_res =
        HttpResponse::build(StatusCode::from_u16(forwarded_res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));

    for (header_name, header_value) in forwarded_res.headers().iter().filter(|(h, _)| {
        *h != header::CONNECTION && *h != header::CONTENT_LENGTH && *h != header::TRANSFER_ENCODING
    }) {
        // Repeated headers such as Set-Cookie keep every value
        client_res.append_header((header_name.clone(), header_value.clone()));
    }

    let stream = forwarded_res.map_err(|e| {
        error!(error = %e, "Upstream body stream error");
        actix_web::error::ErrorBadGateway(e.to_string())
    });
    Ok(client_res.streaming(stream))
}
