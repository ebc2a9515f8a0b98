//! AzireVPN REST API
//!
//! Four remote operations: list locations, generate a token, delete a token
//! and register a WireGuard public key with one location. Every response
//! shares a `{status, message}` envelope; anything other than
//! `status == "success"` is surfaced as [`ApiError::Remote`].

use crate::client::{HttpClient, HttpClientConfig, HttpError};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default API root
pub const DEFAULT_API_BASE: &str = "https://api.azirevpn.com/v1/";

/// Shown when the remote side fails without a usable message
pub const UNKNOWN_API_ERROR: &str = "An unknown API error has occurred. Please try again later.";

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (unreachable, TLS, timeout)
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The remote service reported a failure
    #[error("{0}")]
    Remote(String),

    /// The response body was not the expected JSON shape
    #[error("Malformed API response: {0}")]
    Malformed(String),
}

impl ApiError {
    fn remote(message: Option<String>) -> Self {
        match message {
            Some(m) if !m.is_empty() => ApiError::Remote(m),
            _ => ApiError::Remote(UNKNOWN_API_ERROR.to_string()),
        }
    }
}

/// One selectable VPN location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub city: String,
    pub country: String,
    pub country_code: String,
    /// Where public keys are registered for this location
    pub registration_endpoint: Url,
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}, {}", self.name, self.city, self.country)
    }
}

/// Peer parameters handed out by a successful key registration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Registration {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "DNS")]
    pub dns: String,
    #[serde(rename = "PublicKey")]
    pub public_key: String,
    #[serde(rename = "Endpoint")]
    pub endpoint: String,
}

/// Remote operations the session depends on
#[async_trait]
pub trait VpnApi: Send + Sync {
    /// Fetch the full location list
    async fn servers(&self) -> Result<Vec<Server>, ApiError>;

    /// Exchange username/password for a session token
    async fn login(&self, username: &str, password: &str) -> Result<String, ApiError>;

    /// Invalidate a session token
    async fn logout(&self, token: &str) -> Result<(), ApiError>;

    /// Register `pubkey` with `server` and receive the peer parameters
    async fn register(&self, server: &Server, token: &str, pubkey: &str) -> Result<Registration, ApiError>;
}

#[derive(Deserialize)]
struct Envelope {
    status: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct RegistrationEnvelope {
    status: Option<String>,
    message: Option<String>,
    data: Option<Registration>,
}

#[derive(Deserialize)]
struct Locations {
    locations: Vec<Location>,
}

#[derive(Deserialize)]
struct Location {
    name: String,
    city: String,
    country: String,
    iso: String,
    endpoints: LocationEndpoints,
}

#[derive(Deserialize)]
struct LocationEndpoints {
    wireguard: String,
}

/// Parse a `locations` response body
pub fn parse_servers(body: &[u8]) -> Result<Vec<Server>, ApiError> {
    let parsed: Locations = serde_json::from_slice(body)
        .map_err(|e| ApiError::Malformed(e.to_string()))?;

    parsed
        .locations
        .into_iter()
        .map(|l| {
            let registration_endpoint = Url::parse(&l.endpoints.wireguard)
                .map_err(|e| ApiError::Malformed(format!("{}: {}", l.name, e)))?;
            Ok(Server {
                name: l.name,
                city: l.city,
                country: l.country,
                country_code: l.iso,
                registration_endpoint,
            })
        })
        .collect()
}

/// Parse a `token/generate` response body into the session token
pub fn parse_token(body: &[u8]) -> Result<String, ApiError> {
    let envelope = parse_envelope(body)?;
    match envelope.message {
        Some(token) if envelope.status.as_deref() == Some("success") && !token.is_empty() => Ok(token),
        message => Err(ApiError::remote(message)),
    }
}

/// Parse a `token/delete` response body
pub fn parse_logout(body: &[u8]) -> Result<(), ApiError> {
    let envelope = parse_envelope(body)?;
    match envelope.message {
        Some(m) if envelope.status.as_deref() == Some("success") && !m.is_empty() => Ok(()),
        message => Err(ApiError::remote(message)),
    }
}

/// Parse a key registration response body
pub fn parse_registration(body: &[u8]) -> Result<Registration, ApiError> {
    let envelope: RegistrationEnvelope = serde_json::from_slice(body)
        .map_err(|_| ApiError::remote(None))?;

    if envelope.status.as_deref() != Some("success") {
        return Err(ApiError::remote(envelope.message));
    }
    envelope
        .data
        .ok_or_else(|| ApiError::Malformed("missing registration data".to_string()))
}

// A body that is not even an envelope still yields a diagnostic
fn parse_envelope(body: &[u8]) -> Result<Envelope, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::remote(None))
}

/// [`VpnApi`] over HTTPS
pub struct HttpVpnApi {
    base: Url,
    http: HttpClient,
}

impl HttpVpnApi {
    /// Create a client rooted at `base` (must end with `/`)
    pub fn new(base: Url, config: HttpClientConfig) -> Self {
        Self {
            base,
            http: HttpClient::new(config),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::Http(HttpError::InvalidUrl(e.to_string())))
    }
}

#[async_trait]
impl VpnApi for HttpVpnApi {
    async fn servers(&self) -> Result<Vec<Server>, ApiError> {
        let response = self.http.get(&self.endpoint("locations")?).await?;
        let servers = parse_servers(&response.body)?;
        debug!("Fetched {} locations", servers.len());
        Ok(servers)
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let response = self
            .http
            .post_form(
                &self.endpoint("token/generate")?,
                &[("username", username), ("password", password)],
            )
            .await?;
        parse_token(&response.body)
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post_form(&self.endpoint("token/delete")?, &[("token", token)])
            .await?;
        parse_logout(&response.body)
    }

    async fn register(&self, server: &Server, token: &str, pubkey: &str) -> Result<Registration, ApiError> {
        let response = self
            .http
            .post_form(
                &server.registration_endpoint,
                &[("token", token), ("pubkey", pubkey)],
            )
            .await?;
        parse_registration(&response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_servers() {
        let body = br#"{"status":"success","locations":[
            {"name":"se1","city":"Stockholm","country":"Sweden","iso":"se",
             "endpoints":{"wireguard":"https://api.azirevpn.com/v1/wireguard/connect/se1"}}
        ]}"#;
        let servers = parse_servers(body).unwrap();

        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].country_code, "se");
        assert_eq!(servers[0].to_string(), "se1 - Stockholm, Sweden");
        assert_eq!(servers[0].registration_endpoint.path(), "/v1/wireguard/connect/se1");
    }

    #[test]
    fn test_parse_servers_bad_endpoint() {
        let body = br#"{"locations":[{"name":"x","city":"c","country":"k","iso":"xx",
            "endpoints":{"wireguard":"not a url"}}]}"#;
        assert!(matches!(parse_servers(body), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token(br#"{"status":"success","message":"abc"}"#).unwrap(), "abc");

        let err = parse_token(br#"{"status":"error","message":"Invalid credentials"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_empty_token_is_error() {
        let err = parse_token(br#"{"status":"success","message":""}"#).unwrap_err();
        assert_eq!(err.to_string(), UNKNOWN_API_ERROR);
    }

    #[test]
    fn test_malformed_payload_still_diagnosed() {
        let err = parse_token(b"<html>502</html>").unwrap_err();
        assert_eq!(err.to_string(), UNKNOWN_API_ERROR);

        let err = parse_logout(br#"{"status":"error","message":null}"#).unwrap_err();
        assert_eq!(err.to_string(), UNKNOWN_API_ERROR);
    }

    #[test]
    fn test_parse_registration() {
        let body = br#"{"status":"success","message":"ok","data":{
            "Address":"10.0.0.2/32, fd00::2/128","DNS":"193.180.164.1",
            "PublicKey":"peerkey=","Endpoint":"se1.wg.azirevpn.net:51820"}}"#;
        let reg = parse_registration(body).unwrap();

        assert_eq!(reg.dns, "193.180.164.1");
        assert_eq!(reg.endpoint, "se1.wg.azirevpn.net:51820");

        let err = parse_registration(br#"{"status":"error","message":"Token expired"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Token expired");
    }
}
