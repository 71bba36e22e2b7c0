//! GitHub Actions provider adapter.
//!
//! GitHub's OIDC endpoint issues tokens to workflow runs without a browser
//! flow: the runner holds a bearer token and may choose the audience. The
//! adapter places the CIC commitment in the `aud` claim by substituting
//! `audience=<cic-hash>` into the request URL, so verification reads the
//! commitment from `aud` instead of `nonce`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cic::Claims;
use crate::discover::PublicKeyFinder;
use crate::verifier::{ProviderVerifier, ProviderVerifierOpts};
use crate::{Error, Result};

use super::{create_gq_token, OpenIdProvider};

/// Issuer of GitHub Actions OIDC tokens.
pub const GITHUB_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Environment variable holding the runner's token request URL.
pub const TOKEN_URL_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";

/// Environment variable holding the runner's bearer token.
pub const TOKEN_AUTH_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";

#[derive(Deserialize)]
struct TokenEnvelope {
    value: String,
}

/// The GitHub Actions adapter.
pub struct GithubOp {
    token_request_url: String,
    auth_token: String,
    gq_sign: bool,
    client: reqwest::Client,
    finder: Arc<PublicKeyFinder>,
}

impl std::fmt::Debug for GithubOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubOp")
            .field("token_request_url", &self.token_request_url)
            .field("gq_sign", &self.gq_sign)
            .finish_non_exhaustive()
    }
}

impl GithubOp {
    /// Creates an adapter from an explicit request URL and bearer token.
    pub fn new(token_request_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        GithubOp {
            token_request_url: token_request_url.into(),
            auth_token: auth_token.into(),
            gq_sign: false,
            client: reqwest::Client::new(),
            finder: Arc::new(PublicKeyFinder::default()),
        }
    }

    /// Creates an adapter from the runner environment
    /// (`ACTIONS_ID_TOKEN_REQUEST_URL`, `ACTIONS_ID_TOKEN_REQUEST_TOKEN`).
    ///
    /// # Errors
    /// Returns [`Error::Internal`] when either variable is unset.
    pub fn from_environment() -> Result<Self> {
        let url = env_var(TOKEN_URL_ENV)?;
        let token = env_var(TOKEN_AUTH_ENV)?;
        Ok(Self::new(url, token))
    }

    /// Whether received tokens are upgraded to GQ256. GitHub ID Tokens
    /// embed the run's claims, so hiding the provider signature is the
    /// usual choice.
    pub fn gq_sign(mut self, gq_sign: bool) -> Self {
        self.gq_sign = gq_sign;
        self
    }

    fn build_token_url(&self, audience: &str) -> Result<reqwest::Url> {
        if audience.is_empty() {
            return Err(Error::Internal("audience is required".to_string()));
        }
        let mut url = reqwest::Url::parse(&self.token_request_url)
            .map_err(|err| Error::Internal(format!("token request URL: {err}")))?;
        let existing: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| name != "audience")
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (name, value) in &existing {
                pairs.append_pair(name, value);
            }
            pairs.append_pair("audience", audience);
        }
        Ok(url)
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::Internal(format!("{name} environment variable not set")))
}

#[async_trait]
impl OpenIdProvider for GithubOp {
    fn issuer(&self) -> &str {
        GITHUB_ISSUER
    }

    async fn request_tokens(&self, cic: &Claims) -> Result<Vec<u8>> {
        let url = self.build_token_url(&cic.hash()?)?;
        let envelope: TokenEnvelope = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| Error::Internal(format!("github token request: {err}")))?
            .json()
            .await
            .map_err(|err| Error::Internal(format!("github token response: {err}")))?;
        let id_token = envelope.value.into_bytes();
        if self.gq_sign {
            create_gq_token(&id_token, self).await
        } else {
            Ok(id_token)
        }
    }

    fn public_key_finder(&self) -> Arc<PublicKeyFinder> {
        Arc::clone(&self.finder)
    }

    fn verifier(&self) -> ProviderVerifier {
        // The commitment rides in `aud`, so it can never equal a client id.
        ProviderVerifier::new(
            GITHUB_ISSUER,
            "aud",
            ProviderVerifierOpts {
                skip_client_id_check: true,
                gq_only: self.gq_sign,
                discover_public_key: Some(Arc::clone(&self.finder)),
                ..ProviderVerifierOpts::default()
            },
        )
    }
}
