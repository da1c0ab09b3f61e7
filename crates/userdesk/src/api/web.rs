//! Browser-facing plumbing: request mode, redirect-back target and the
//! one-request flash cookie.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderName,
        header::{COOKIE, HOST, REFERER, SET_COOKIE},
        request::Parts,
    },
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::cookie_value;

pub const FLASH_COOKIE: &str = "flash";

/// Browsers drop `Set-Cookie` values longer than this.
const MAX_COOKIE_BYTES: usize = 4096;
/// Longest old-input string carried back into a form.
const MAX_OLD_CHARS: usize = 191;

/// Field name -> messages, in field order.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Whether the caller wants JSON (`X-Requested-With: XMLHttpRequest`) or a
/// rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Ajax,
    Page,
}

impl RequestMode {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let ajax = headers
            .get("X-Requested-With")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));

        if ajax { Self::Ajax } else { Self::Page }
    }

    pub fn is_ajax(self) -> bool {
        self == Self::Ajax
    }
}

impl<S> FromRequestParts<S> for RequestMode
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// The page the request came from, taken from `Referer`. Only paths on
/// this site are kept; anything else counts as no referer.
#[derive(Debug, Clone, Default)]
pub struct PreviousUrl(pub Option<String>);

impl PreviousUrl {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: HeaderName| headers.get(name).and_then(|h| h.to_str().ok());
        let host = header(HOST);

        Self(
            header(REFERER)
                .and_then(|referer| local_path(referer, host))
                .map(str::to_string),
        )
    }

    /// The previous page, or `fallback` when the client sent no referer.
    pub fn or(&self, fallback: &str) -> String {
        self.0.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// `url` as a path on this site: either already a path, or an absolute
/// URL whose authority is `host`.
fn local_path<'a>(url: &'a str, host: Option<&str>) -> Option<&'a str> {
    let is_path = |p: &str| {
        p.starts_with('/') && !p.starts_with("//") && !p.starts_with("/\\")
    };

    if is_path(url) {
        return Some(url);
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let split = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, path) = rest.split_at(split);

    if !host.is_some_and(|h| h.eq_ignore_ascii_case(authority)) {
        debug!(referer = url, "Ignoring off-site referer");
        return None;
    }

    match path {
        "" => Some("/"),
        p if is_path(p) => Some(p),
        _ => None,
    }
}

impl<S> FromRequestParts<S> for PreviousUrl
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Data carried from one request to the next through the `flash` cookie.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flash {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrors,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub old: Map<String, Value>,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Field errors plus the submitted input to repopulate the form with.
    pub fn form_errors(errors: FieldErrors, old: Map<String, Value>) -> Self {
        Self {
            errors,
            old,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Old input strings are cut to [`MAX_OLD_CHARS`]; if the cookie is
    /// still too large the old input is dropped and only messages remain.
    fn set_cookie(&self) -> String {
        let cookie = |flash: &Flash| {
            format!("{}={}; Path=/; HttpOnly; SameSite=Lax", FLASH_COOKIE, flash.encode())
        };

        let mut flash = self.clone();
        for value in flash.old.values_mut() {
            if let Value::String(text) = value
                && text.chars().count() > MAX_OLD_CHARS
            {
                *text = text.chars().take(MAX_OLD_CHARS).collect();
            }
        }

        let header = cookie(&flash);
        if header.len() <= MAX_COOKIE_BYTES {
            return header;
        }

        debug!(bytes = header.len(), "Flash too large, dropping old input");
        flash.old.clear();
        cookie(&flash)
    }

    fn clear_cookie() -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", FLASH_COOKIE)
    }
}

/// Reads the incoming flash. Missing or garbled cookies yield an empty flash.
impl<S> FromRequestParts<S> for Flash
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let flash = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find_map(|header| cookie_value(header, FLASH_COOKIE))
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| {
                let decoded = Flash::decode(raw);
                if decoded.is_none() {
                    debug!("Ignoring undecodable flash cookie");
                }
                decoded
            });

        Ok(flash.unwrap_or_default())
    }
}

/// 303 redirect carrying a flash for the next request.
pub fn redirect_with_flash(to: &str, flash: Flash) -> Response {
    (
        AppendHeaders([(SET_COOKIE, flash.set_cookie())]),
        Redirect::to(to),
    )
        .into_response()
}

/// HTML response that consumes the incoming flash.
pub fn page(html: String, consumed: &Flash) -> Response {
    if consumed.is_empty() {
        Html(html).into_response()
    } else {
        (AppendHeaders([(SET_COOKIE, Flash::clear_cookie())]), Html(html)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode, header::LOCATION};

    #[test]
    fn test_request_mode_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestMode::from_headers(&headers), RequestMode::Page);

        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        assert!(RequestMode::from_headers(&headers).is_ajax());

        headers.insert("X-Requested-With", HeaderValue::from_static("fetch"));
        assert_eq!(RequestMode::from_headers(&headers), RequestMode::Page);
    }

    #[test]
    fn test_previous_url_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(PreviousUrl::from_headers(&headers).or("/users/create"), "/users/create");

        headers.insert(REFERER, HeaderValue::from_static("/users/x/edit?tab=roles"));
        assert_eq!(
            PreviousUrl::from_headers(&headers).or("/users/create"),
            "/users/x/edit?tab=roles"
        );
    }

    #[test]
    fn test_previous_url_rejects_other_sites() {
        let back = |referer: &'static str, host: Option<&'static str>| {
            let mut headers = HeaderMap::new();
            headers.insert(REFERER, HeaderValue::from_static(referer));
            if let Some(host) = host {
                headers.insert(HOST, HeaderValue::from_static(host));
            }
            PreviousUrl::from_headers(&headers).or("/users/create")
        };

        assert_eq!(back("https://evil.example/phish", Some("localhost:8080")), "/users/create");
        assert_eq!(back("//evil.example/phish", Some("localhost:8080")), "/users/create");
        assert_eq!(back("http://localhost/users", None), "/users/create");
        assert_eq!(back("javascript:alert(1)", Some("localhost:8080")), "/users/create");
        assert_eq!(
            back("http://localhost:8080/users/x/edit", Some("localhost:8080")),
            "/users/x/edit"
        );
        assert_eq!(back("http://localhost:8080", Some("localhost:8080")), "/");
    }

    #[test]
    fn test_flash_cookie_codec() {
        let mut old = Map::new();
        old.insert("name".to_string(), Value::from("Alice"));
        let mut errors = FieldErrors::new();
        errors.insert("email".to_string(), vec!["The email field is required.".to_string()]);

        let flash = Flash::form_errors(errors, old);
        let decoded = Flash::decode(&flash.encode()).unwrap();
        assert_eq!(decoded, flash);

        assert!(Flash::decode("%%%not-base64").is_none());
        assert!(Flash::default().is_empty());
        assert!(!Flash::success("ok").is_empty());
    }

    #[test]
    fn test_redirect_with_flash_sets_cookie() {
        let response = redirect_with_flash("/users", Flash::success("User saved successfully."));
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/users");

        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        let raw = cookie_value(cookie, FLASH_COOKIE).unwrap();
        assert_eq!(
            Flash::decode(raw).unwrap().success.as_deref(),
            Some("User saved successfully.")
        );
    }

    #[test]
    fn test_flash_cookie_stays_under_browser_limit() {
        let mut errors = FieldErrors::new();
        errors.insert(
            "name".to_string(),
            vec!["The name may not be greater than 191 characters.".to_string()],
        );
        let mut old = Map::new();
        old.insert("name".to_string(), Value::from("a".repeat(5000)));

        let cookie = Flash::form_errors(errors.clone(), old).set_cookie();
        assert!(cookie.len() <= MAX_COOKIE_BYTES);
        let flash = Flash::decode(cookie_value(&cookie, FLASH_COOKIE).unwrap()).unwrap();
        assert_eq!(flash.old["name"].as_str().unwrap().len(), MAX_OLD_CHARS);
        assert_eq!(flash.errors, errors);

        // Many capped fields together still overflow; messages survive.
        let old: Map<String, Value> = (0..40)
            .map(|i| (format!("field_{i}"), Value::from("b".repeat(500))))
            .collect();
        let cookie = Flash::form_errors(errors.clone(), old).set_cookie();
        assert!(cookie.len() <= MAX_COOKIE_BYTES);
        let flash = Flash::decode(cookie_value(&cookie, FLASH_COOKIE).unwrap()).unwrap();
        assert!(flash.old.is_empty());
        assert_eq!(flash.errors, errors);
    }

    #[test]
    fn test_page_clears_consumed_flash() {
        let response = page("<p>hi</p>".to_string(), &Flash::error("User not found"));
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));

        let response = page("<p>hi</p>".to_string(), &Flash::default());
        assert!(response.headers().get(SET_COOKIE).is_none());
    }
}
