//! `imds-token` fetches OAuth2 access tokens for the managed identity of an
//! Azure virtual machine from the instance metadata service (IMDS).
//!
//! ```no_run
//! match imds_token::fetch_token("https://management.azure.com/") {
//!     Ok(token) => println!("{}", token),
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```
//!
//! # Environment specific setup
//!
//! The virtual machine needs a system assigned managed identity, and that
//! identity must be granted access to the requested resource (for an
//! application registration: a role defined in the registration).
//!
//! The metadata service only answers requests sent from the virtual machine
//! itself, to the link-local address `169.254.169.254`. Requests are never
//! sent through a proxy, never follow redirects and have no timeout.

use reqwest::{
    blocking::{Client, Request},
    redirect, StatusCode,
};
use hyper::ext::ReasonPhrase;
use serde::Deserialize;
use serde_json::Value;
use std::{fmt, time::Duration};
pub type Result<T> = std::result::Result<T, FetchError>;

pub const METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub const TOKEN_PATH: &str = "/metadata/identity/oauth2/token";
pub const API_VERSION: &str = "2018-02-01";

#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    Request(String),
    HttpError(String),
    InvalidJson,
    MissingToken,
}
impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchError::Request(s) => write!(f, "token request failed: {}", s),
            FetchError::HttpError(reason) => write!(f, "http error: {}", reason),
            FetchError::InvalidJson => write!(f, "response did not parse as JSON"),
            FetchError::MissingToken => write!(f, "response is lacking access_token"),
        }
    }
}
impl std::error::Error for FetchError {}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Returns an access token for `resource` from the instance metadata service.
///
/// `resource` is passed to the service as is: the service decides whether it
/// is valid.
///
/// ```no_run
/// let token = imds_token::fetch_token("api://my-application")?;
/// # Ok::<(), imds_token::FetchError>(())
/// ```
pub fn fetch_token(resource: &str) -> Result<String> {
    TokenFetcher::new()?.fetch(resource)
}

pub struct TokenFetcher {
    client: Client,
    endpoint: String,
}

impl TokenFetcher {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(METADATA_ENDPOINT)
    }

    fn with_endpoint<S: Into<String>>(endpoint: S) -> Result<Self> {
        let client = match Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(None::<Duration>)
            .no_proxy()
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                return Err(FetchError::Request(format!(
                    "Failed to build HTTP client: {}",
                    e
                )))
            }
        };
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn fetch(&self, resource: &str) -> Result<String> {
        let request = match self.build_request(resource) {
            Ok(request) => request,
            Err(e) => return Err(FetchError::Request(e.to_string())),
        };

        log::debug!("Requesting token for resource {}", resource);
        let response = match self.client.execute(request) {
            Ok(response) => response,
            Err(e) => return Err(FetchError::Request(e.to_string())),
        };

        let status = response.status();
        log::debug!("Token endpoint responded {}", status);
        if status != StatusCode::OK {
            // hyper only records the phrase when it differs from the canonical one
            let reason = match response.extensions().get::<ReasonPhrase>() {
                Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
                None => match status.canonical_reason() {
                    Some(reason) => reason.to_string(),
                    None => status.as_str().to_string(),
                },
            };
            return Err(FetchError::HttpError(reason));
        }

        match response.bytes() {
            Ok(body) => parse_token_response(&body),
            Err(e) => Err(FetchError::Request(format!(
                "Failed to read token response: {}",
                e
            ))),
        }
    }

    fn build_request(&self, resource: &str) -> reqwest::Result<Request> {
        self.client
            .get(format!("{}{}", self.endpoint, TOKEN_PATH))
            .query(&[("api-version", API_VERSION), ("resource", resource)])
            .header("Metadata", "true")
            .build()
    }
}

fn parse_token_response(body: &[u8]) -> Result<String> {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return Err(FetchError::InvalidJson);
    };
    if !value.is_object() {
        log::debug!("Token response is not a JSON object");
        return Err(FetchError::MissingToken);
    }
    match serde_json::from_value::<TokenResponse>(value) {
        Ok(TokenResponse {
            access_token: Some(token),
        }) => Ok(token),
        Ok(_) => Err(FetchError::MissingToken),
        Err(e) => {
            // present but not a string
            log::trace!("Unexpected token response: {}", e);
            Err(FetchError::MissingToken)
        }
    }
}
