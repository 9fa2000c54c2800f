use actix_web::{http::StatusCode, HttpResponse, HttpResponseBuilder};

use crate::config::Brand;
use crate::redirect::{challenge_location, encode_attribute};

const CHALLENGE_TEMPLATE: &str = include_str!("../templates/challenge.html");
const FAILED_TEMPLATE: &str = include_str!("../templates/failed.html");

pub const REASON_BLOCKED: &str = "Too many failed verification attempts.";
pub const REASON_REJECTED: &str = "We could not confirm that you are a human visitor.";
pub const REASON_TOKEN_MISSING: &str = "The verification token was missing from your submission.";
pub const REASON_INVALID_TARGET: &str = "Invalid redirect target.";
pub const VERIFICATION_ERROR_BODY: &str = "500 Verification failed";

/// Escape text for HTML element content and quoted attributes
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Substitute `{{name}}` placeholders in one pass. Values are inserted as
/// given, so callers escape them first. Unknown placeholders render empty.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        if let Some((_, value)) = values.iter().find(|(key, _)| *key == name) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// The widget page for a validated target
pub fn challenge_page(brand: &Brand, site_key: &str, target: &str) -> String {
    let title = escape_html(brand.title);
    let target_attr = escape_html(&encode_attribute(target));
    let form_action = escape_html(&challenge_location(target));
    let sitekey = escape_html(site_key);
    render(
        CHALLENGE_TEMPLATE,
        &[
            ("title", title.as_str()),
            ("target_attr", target_attr.as_str()),
            ("form_action", form_action.as_str()),
            ("sitekey", sitekey.as_str()),
        ],
    )
}

/// The failure page. With a target, a retry link back to the challenge is shown.
pub fn failed_page(brand: &Brand, contact_url: &str, reason: &str, retry_target: Option<&str>) -> String {
    let title = escape_html(brand.title);
    let reason = escape_html(reason);
    let contact_url = escape_html(contact_url);
    let retry = retry_target
        .map(|target| {
            format!(
                r#"<p><a class="retry" href="{}">Try again</a></p>"#,
                escape_html(&challenge_location(target))
            )
        })
        .unwrap_or_default();
    render(
        FAILED_TEMPLATE,
        &[
            ("title", title.as_str()),
            ("reason", reason.as_str()),
            ("retry", retry.as_str()),
            ("contact_url", contact_url.as_str()),
        ],
    )
}

/// Response builder preset for HTML pages that must not be cached
pub fn html(status: StatusCode) -> HttpResponseBuilder {
    let mut builder = HttpResponse::build(status);
    builder
        .content_type("text/html; charset=utf-8")
        .insert_header(("Cache-Control", "no-store"));
    builder
}
