//! Request authentication and the identity extractors.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{
        HeaderMap, Request,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use tracing::{debug, warn};

use super::{AuthConfig, AuthError, Claims};

const TOKEN_COOKIE: &str = "auth_token";
const DEV_USER_HEADER: &str = "x-dev-user";
const ISSUER: &str = "userdesk";

/// Value of `name` in a `Cookie` header.
pub(crate) fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

/// What the caller presented, in the order it is honoured.
#[derive(Debug, PartialEq, Eq)]
enum Credential<'a> {
    Bearer(&'a str),
    Cookie(&'a str),
    DevUser(&'a str),
}

impl<'a> Credential<'a> {
    fn from_headers(headers: &'a HeaderMap, dev_mode: bool) -> Result<Option<Self>, AuthError> {
        let header = move |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        if let Some(value) = header(AUTHORIZATION.as_str()) {
            return bearer(value).map(|token| Some(Credential::Bearer(token)));
        }

        if let Some(token) = header(COOKIE.as_str()).and_then(|c| cookie_value(c, TOKEN_COOKIE)) {
            return Ok(Some(Credential::Cookie(token)));
        }

        Ok(header(DEV_USER_HEADER)
            .filter(|_| dev_mode)
            .map(Credential::DevUser))
    }
}

/// `Bearer <token>`, scheme case-insensitive, nothing after the token.
fn bearer(value: &str) -> Result<&str, AuthError> {
    match value.split_whitespace().collect::<Vec<_>>().as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") => Ok(*token),
        _ => Err(AuthError::MalformedHeader),
    }
}

#[derive(Clone)]
struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Token signing and verification plus the auth settings handlers need.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    keys: Option<Keys>,
}

impl AuthState {
    /// `env:VAR_NAME` secrets are resolved here; an unresolvable secret
    /// leaves the state unable to sign or verify.
    pub fn new(config: AuthConfig) -> Self {
        let keys = config
            .resolve_jwt_secret()
            .ok()
            .flatten()
            .map(|secret| Keys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
            });

        Self {
            config: Arc::new(config),
            keys,
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    fn keys(&self) -> Result<&Keys, AuthError> {
        self.keys
            .as_ref()
            .ok_or_else(|| AuthError::Misconfigured("no JWT secret configured".to_string()))
    }

    /// Sign a token for a stored user carrying its role names.
    pub fn issue_token(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        roles: Vec<String>,
    ) -> Result<String, AuthError> {
        let keys = self.keys()?;
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: Some(ISSUER.to_string()),
            exp: (now + Duration::hours(self.config.token_ttl_hours)).timestamp(),
            iat: Some(now.timestamp()),
            email: Some(email.to_string()),
            name: Some(name.to_string()),
            roles,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| AuthError::Misconfigured(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        decode::<Claims>(token, &self.keys()?.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!("Rejected token: {e}");
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken(e.to_string()),
                }
            })
    }

    fn dev_claims(&self, user_id: &str) -> Result<Claims, AuthError> {
        let user = self
            .config
            .dev_users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AuthError::UnknownDevUser(user_id.to_string()))?;

        Ok(Claims {
            sub: user.id.clone(),
            iss: Some("dev".to_string()),
            exp: (Utc::now() + Duration::hours(self.config.token_ttl_hours)).timestamp(),
            iat: None,
            email: Some(user.email.clone()),
            name: Some(user.name.clone()),
            roles: user.roles.clone(),
        })
    }

    /// Resolve the caller from request headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        match Credential::from_headers(headers, self.is_dev_mode())? {
            Some(Credential::Bearer(token) | Credential::Cookie(token)) => {
                self.validate_token(token)
            }
            Some(Credential::DevUser(id)) => {
                debug!("Dev identity: {id}");
                self.dev_claims(id)
            }
            None => Err(AuthError::Unauthenticated),
        }
    }
}

/// The authenticated caller. Placed in request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.is_admin()
    }

    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Rejects unauthenticated requests; otherwise stores the [`CurrentUser`].
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = auth.authenticate(req.headers())?;
    req.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(req).await)
}

/// Extractor for admin-only handlers.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;

        if user.is_admin() {
            Ok(RequireAdmin(user))
        } else {
            Err(AuthError::Forbidden("admin role required".to_string()))
        }
    }
}
