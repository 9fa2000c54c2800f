use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::TurnstileSettings;

/// Form field the Turnstile widget writes its token into
pub const RESPONSE_FIELD: &str = "cf-turnstile-response";

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("could not reach verification endpoint: {0}")]
    Transport(String),
    #[error("verification endpoint returned HTTP {0}")]
    Status(u16),
    #[error("could not decode verification response: {0}")]
    Decode(String),
}

#[derive(Debug, Serialize)]
struct SiteVerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

/// Reply of the siteverify endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SiteVerifyResponse {
    pub success: bool,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
    #[serde(default)]
    pub challenge_ts: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub cdata: Option<String>,
}

/// Checks a widget token with the verification service.
///
/// One call per POST attempt; implementations must not retry, since the
/// service consumes a token on first use.
pub trait Verifier {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: Option<&'a str>,
    ) -> LocalBoxFuture<'a, Result<SiteVerifyResponse, VerifyError>>;
}

/// awc-backed client for Cloudflare's siteverify endpoint
pub struct TurnstileClient {
    client: awc::Client,
    secret: String,
    verify_url: String,
}

impl TurnstileClient {
    pub fn new(settings: &TurnstileSettings) -> Self {
        let client = awc::Client::builder().timeout(settings.timeout).finish();
        Self {
            client,
            secret: settings.secret.clone(),
            verify_url: settings.verify_url.clone(),
        }
    }

    #[instrument(name = "turnstile_verify", skip(self, token), fields(verify_url = %self.verify_url))]
    async fn siteverify(&self, token: &str, remote_ip: Option<&str>) -> Result<SiteVerifyResponse, VerifyError> {
        let form = SiteVerifyRequest {
            secret: &self.secret,
            response: token,
            remoteip: remote_ip,
        };

        let mut response = self
            .client
            .post(&self.verify_url)
            .send_form(&form)
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifyError::Status(response.status().as_u16()));
        }

        let result = response
            .json::<SiteVerifyResponse>()
            .await
            .map_err(|e| VerifyError::Decode(e.to_string()))?;
        debug!(success = result.success, error_codes = ?result.error_codes, "Siteverify replied");
        Ok(result)
    }
}

impl Verifier for TurnstileClient {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: Option<&'a str>,
    ) -> LocalBoxFuture<'a, Result<SiteVerifyResponse, VerifyError>> {
        Box::pin(self.siteverify(token, remote_ip))
    }
}
