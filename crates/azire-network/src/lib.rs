//! AzireVPN Network Layer
//!
//! HTTP transport and the typed REST API the client talks to:
//! - `client`: hyper/rustls HTTP/1.1 client
//! - `api`: location list, token generation/deletion, key registration

mod api;
mod client;

pub use api::{
    ApiError, HttpVpnApi, Registration, Server, VpnApi, DEFAULT_API_BASE, UNKNOWN_API_ERROR,
    parse_logout, parse_registration, parse_servers, parse_token,
};
pub use client::{HttpClient, HttpClientConfig, HttpError, Response};
pub use url::Url;
