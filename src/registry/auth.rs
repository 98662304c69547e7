//! Authentication scheme discovery and token acquisition
//!
//! The registry root (`GET /v2/`) tells us how to authenticate: a 200 means
//! anonymous access, a 401 carries a `WWW-Authenticate` challenge naming either
//! `Basic` or `Bearer realm="...",service="..."`.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::credentials::Credentials;
use reqwest::{Client, RequestBuilder, StatusCode, header::WWW_AUTHENTICATE};
use serde::Deserialize;
use std::collections::HashMap;

/// How requests to the registry are authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// Root probe answered 200
    Anonymous,
    /// Basic credentials on every request
    Basic,
    /// Scope-bound bearer tokens issued by `realm`
    Bearer { realm: String, service: String },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Auth {
    client: Client,
    registry_address: String,
    credentials: Credentials,
}

impl Auth {
    pub fn new(client: Client, registry_address: &str, credentials: Credentials) -> Self {
        Self {
            client,
            registry_address: registry_address.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Probe the registry root anonymously and work out the auth scheme.
    ///
    /// Any answer other than 200 or a usable 401 challenge is an error.
    pub async fn discover_auth_scheme(&self, output: &Logger) -> Result<AuthScheme> {
        let url = format!("{}/v2/", self.registry_address);
        output.detail(&format!("Probing registry root {}", url));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry probe"))?;

        let status = response.status();
        output.detail(&format!("Registry probe response status: {}", status));

        match status {
            StatusCode::OK => Ok(AuthScheme::Anonymous),
            StatusCode::UNAUTHORIZED => {
                let header = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .ok_or_else(|| {
                        RegistryError::Auth(
                            "Registry returned 401 without WWW-Authenticate header".to_string(),
                        )
                    })?
                    .to_str()
                    .map_err(|e| RegistryError::Parse(format!("Invalid auth header: {}", e)))?
                    .to_string();

                output.detail(&format!("Parsing auth header: {}", header));
                Self::parse_auth_challenge(&header).ok_or_else(|| {
                    RegistryError::Auth(format!("Unsupported auth challenge: {}", header))
                })
            }
            _ => Err(HttpErrorHandler::from_response(response, "registry probe").await),
        }
    }

    /// Parse a `WWW-Authenticate` header into a scheme.
    ///
    /// Returns `None` for unknown schemes and for bearer challenges without a realm.
    pub fn parse_auth_challenge(header: &str) -> Option<AuthScheme> {
        let header = header.trim();
        let (scheme, params) = match header.split_once(char::is_whitespace) {
            Some((scheme, params)) => (scheme, params),
            None => (header, ""),
        };

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(AuthScheme::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params = parse_challenge_params(params);
        let realm = params.get("realm").filter(|r| !r.is_empty())?;
        let service = params.get("service").cloned().unwrap_or_default();

        Some(AuthScheme::Bearer {
            realm: realm.clone(),
            service,
        })
    }

    /// Ask the token realm for a token bound to `scope`
    pub async fn request_token(
        &self,
        realm: &str,
        service: &str,
        scope: &str,
        output: &Logger,
    ) -> Result<String> {
        let mut url = url::Url::parse(realm)?;
        {
            let mut query = url.query_pairs_mut();
            if !service.is_empty() {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        output.detail(&format!("Requesting token from: {}", url));

        let mut request = self.client.get(url);
        if !self.credentials.is_anonymous() {
            request = request.basic_auth(
                &self.credentials.username,
                Some(&self.credentials.password),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(HttpErrorHandler::handle_auth_error(status, &error_text));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Parse(format!("Failed to parse token response: {}", e)))?;

        let token = token_response
            .token
            .filter(|t| !t.is_empty())
            .or(token_response.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                RegistryError::Auth("Token response carries neither token nor access_token".to_string())
            })?;

        output.detail(&format!(
            "Token obtained for scope {} (length: {} chars)",
            scope,
            token.len()
        ));
        Ok(token)
    }

    /// Cheap authorized request used to check a cached token is still accepted
    pub async fn probe_token(&self, token: &str) -> bool {
        let url = format!("{}/v2/", self.registry_address);
        match self.client.get(&url).bearer_auth(token).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Attach credentials for `scheme` to a request
    pub fn authorize(&self, request: RequestBuilder, scheme: &AuthScheme, token: &str) -> RequestBuilder {
        match scheme {
            AuthScheme::Anonymous => request,
            AuthScheme::Basic => {
                request.basic_auth(&self.credentials.username, Some(&self.credentials.password))
            }
            AuthScheme::Bearer { .. } if token.is_empty() => request,
            AuthScheme::Bearer { .. } => request.bearer_auth(token),
        }
    }
}

/// Split `key="value", key2=value2` honouring quoted commas
fn parse_challenge_params(params: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    let mut flush = |key: &mut String, value: &mut String| {
        let k = key.trim().to_ascii_lowercase();
        if !k.is_empty() {
            result.insert(k, value.trim().to_string());
        }
        key.clear();
        value.clear();
    };

    for c in params.chars() {
        match c {
            '"' if in_value => in_quotes = !in_quotes,
            '=' if !in_value => in_value = true,
            ',' if !in_quotes => {
                flush(&mut key, &mut value);
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    flush(&mut key, &mut value);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let scheme = Auth::parse_auth_challenge(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com""#,
        );
        assert_eq!(
            scheme,
            Some(AuthScheme::Bearer {
                realm: "https://auth.example.com/token".to_string(),
                service: "registry.example.com".to_string(),
            })
        );
    }

    #[test]
    fn parses_params_in_any_order_with_spaces() {
        let scheme = Auth::parse_auth_challenge(
            r#"bearer service="svc", scope="repository:a/b:pull,push", realm="https://auth/token""#,
        );
        assert_eq!(
            scheme,
            Some(AuthScheme::Bearer {
                realm: "https://auth/token".to_string(),
                service: "svc".to_string(),
            })
        );
    }

    #[test]
    fn parses_basic_challenge() {
        assert_eq!(
            Auth::parse_auth_challenge(r#"Basic realm="Registry Realm""#),
            Some(AuthScheme::Basic)
        );
    }

    #[test]
    fn rejects_unknown_or_realmless_challenges() {
        assert_eq!(Auth::parse_auth_challenge("Digest realm=\"x\""), None);
        assert_eq!(Auth::parse_auth_challenge(r#"Bearer service="svc""#), None);
        assert_eq!(Auth::parse_auth_challenge(""), None);
    }

    #[test]
    fn quoted_commas_stay_in_value() {
        let params = parse_challenge_params(r#"realm="a,b",service=plain"#);
        assert_eq!(params.get("realm").map(String::as_str), Some("a,b"));
        assert_eq!(params.get("service").map(String::as_str), Some("plain"));
    }
}
