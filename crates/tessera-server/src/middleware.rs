//! Bearer-token authentication.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::error::ServiceError;
use crate::outbound::OutboundHttp;
use crate::AppState;

/// Claim that carries the client id unless configured otherwise.
pub const DEFAULT_CLIENT_ID_CLAIM: &str = "client_id";

/// The authenticated caller, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

enum KeySource {
    /// Key set fetched from the identity provider on every verification.
    Remote {
        certs_url: String,
        http: reqwest::Client,
    },
    /// Fixed key set.
    Static(JwkSet),
    /// Signatures and expiry are not checked.
    Unverified,
}

/// Verifies RS256 bearer tokens and extracts the client id claim.
pub struct TokenVerifier {
    source: KeySource,
    claim_name: String,
}

impl TokenVerifier {
    /// Verifies against the key set published at `certs_url`.
    pub fn remote(
        certs_url: &str,
        claim_name: &str,
        outbound: &OutboundHttp,
    ) -> Result<Self, reqwest::Error> {
        let http = outbound
            .client_builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            source: KeySource::Remote {
                certs_url: certs_url.to_string(),
                http,
            },
            claim_name: claim_name.to_string(),
        })
    }

    /// Verifies against a fixed key set.
    pub fn with_jwks(jwks: JwkSet, claim_name: &str) -> Self {
        Self {
            source: KeySource::Static(jwks),
            claim_name: claim_name.to_string(),
        }
    }

    /// Reads the claim without checking the signature or expiry. Any party
    /// can mint tokens this mode accepts.
    pub fn unverified(claim_name: &str) -> Self {
        Self {
            source: KeySource::Unverified,
            claim_name: claim_name.to_string(),
        }
    }

    pub fn claim_name(&self) -> &str {
        &self.claim_name
    }

    /// Returns the client id carried by `token`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if the token is malformed, not validly signed, expired,
    ///   or lacks the client id claim.
    /// - `UpstreamUnavailable` if the key set cannot be fetched.
    pub async fn verify(&self, token: &str) -> Result<String, ServiceError> {
        let claims = match &self.source {
            KeySource::Unverified => {
                tracing::warn!(
                    "JWT validation is skipped, so the token could be signed by an untrusted party or be expired"
                );
                decode_unverified(token)?
            }
            KeySource::Static(jwks) => decode_verified(token, jwks)?,
            KeySource::Remote { certs_url, http } => {
                let jwks = fetch_jwks(http, certs_url).await?;
                decode_verified(token, &jwks)?
            }
        };

        claims
            .get(&self.claim_name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Forbidden(format!("JWT does not carry a `{}` claim", self.claim_name))
            })
    }
}

type Claims = HashMap<String, Value>;

fn malformed(e: jsonwebtoken::errors::Error) -> ServiceError {
    tracing::warn!(error = %e, "failed to verify JWT");
    ServiceError::Forbidden("JWT is malformed".to_string())
}

fn decode_unverified(token: &str) -> Result<Claims, ServiceError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(malformed)
}

fn decode_verified(token: &str, jwks: &JwkSet) -> Result<Claims, ServiceError> {
    let header = decode_header(token).map_err(malformed)?;
    let jwk = match header.kid.as_deref() {
        Some(kid) => jwks.find(kid),
        None => jwks.keys.first(),
    }
    .ok_or_else(|| ServiceError::Forbidden("JWT is malformed".to_string()))?;
    let key = DecodingKey::from_jwk(jwk).map_err(malformed)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_required_spec_claims(&["exp"]);
    validation.validate_aud = false;

    let claims = decode::<Claims>(token, &key, &validation)
        .map_err(malformed)?
        .claims;
    if !claims.contains_key("iat") {
        return Err(ServiceError::Forbidden("JWT is malformed".to_string()));
    }
    Ok(claims)
}

async fn fetch_jwks(http: &reqwest::Client, certs_url: &str) -> Result<JwkSet, ServiceError> {
    let unavailable = |e: reqwest::Error| {
        tracing::error!(url = certs_url, error = %e, "failed to read identity provider key set");
        ServiceError::UpstreamUnavailable("Auth provider is unavailable".to_string())
    };

    http.get(certs_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(unavailable)?
        .json::<JwkSet>()
        .await
        .map_err(unavailable)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ServiceError> {
    let not_authenticated = || ServiceError::Unauthorized("Not authenticated".to_string());
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(not_authenticated)?
        .to_str()
        .map_err(|_| not_authenticated())?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(not_authenticated)
}

/// Authenticates the request and stores the caller as [`ClientIdentity`].
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, ServiceError> {
    let token = bearer_token(req.headers())?.to_string();

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| ServiceError::Internal("application state missing".to_string()))?
        .clone();

    let client_id = state.tokens.verify(&token).await?;
    tracing::debug!(client_id = %client_id, "authenticated request");

    req.extensions_mut().insert(ClientIdentity(client_id));
    Ok(next.run(req).await)
}
