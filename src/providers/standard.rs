//! Standard OIDC providers that authenticate users through the browser
//! authorization-code flow (Google, Azure).
//!
//! The interactive flow itself (browser redirect, local callback listener,
//! code exchange) lives outside this crate; adapters receive it as a
//! [`TokenRequester`]. The adapter contributes the provider configuration,
//! commitment placement (the `nonce` claim), key discovery and the
//! GQ upgrade.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cic::Claims;
use crate::discover::PublicKeyFinder;
use crate::verifier::{ProviderVerifier, ProviderVerifierOpts};
use crate::Result;

use super::{create_gq_token, OpenIdProvider};

/// Azure tenant id for accounts outside any organization ("consumers").
pub const AZURE_CONSUMER_TENANT: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";

/// Exchanges a CIC commitment for an ID Token carrying it as the `nonce`
/// claim. Implementations run the authorization-code flow.
#[async_trait]
pub trait TokenRequester: Send + Sync {
    /// Performs the flow with `nonce = cic_hash` and returns the raw
    /// ID Token.
    async fn request_tokens(&self, cic_hash: &str) -> Result<Vec<u8>>;
}

/// Configuration of a standard browser-flow provider.
#[derive(Clone, Debug)]
pub struct StandardOpOptions {
    /// The OP's issuer URI.
    pub issuer: String,
    /// OIDC client id; the expected `aud` of issued tokens.
    pub client_id: String,
    /// Scopes for the authorization request.
    pub scopes: Vec<String>,
    /// Redirect URIs registered for the client; the flow listens on one of
    /// their ports.
    pub redirect_uris: Vec<String>,
    /// Upgrade received tokens to GQ256.
    pub gq_sign: bool,
    /// Clock-skew allowance applied when validating `iat`, seconds.
    pub issued_at_offset_secs: i64,
}

impl StandardOpOptions {
    /// Defaults for Google.
    pub fn google(client_id: impl Into<String>) -> Self {
        StandardOpOptions {
            issuer: "https://accounts.google.com".to_string(),
            client_id: client_id.into(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            redirect_uris: default_redirect_uris(),
            gq_sign: false,
            issued_at_offset_secs: 60,
        }
    }

    /// Defaults for an Azure tenant; pass [`AZURE_CONSUMER_TENANT`] for
    /// personal accounts.
    pub fn azure(tenant_id: &str, client_id: impl Into<String>) -> Self {
        StandardOpOptions {
            issuer: format!("https://login.microsoftonline.com/{tenant_id}/v2.0"),
            client_id: client_id.into(),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            redirect_uris: default_redirect_uris(),
            gq_sign: false,
            issued_at_offset_secs: 60,
        }
    }
}

fn default_redirect_uris() -> Vec<String> {
    vec![
        "http://localhost:3000/login-callback".to_string(),
        "http://localhost:10001/login-callback".to_string(),
        "http://localhost:11110/login-callback".to_string(),
    ]
}

/// A standard OIDC provider adapter.
pub struct StandardOp {
    options: StandardOpOptions,
    requester: Arc<dyn TokenRequester>,
    finder: Arc<PublicKeyFinder>,
}

impl std::fmt::Debug for StandardOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardOp")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl StandardOp {
    /// Creates an adapter over a flow implementation, with HTTP-backed key
    /// discovery.
    pub fn new(options: StandardOpOptions, requester: Arc<dyn TokenRequester>) -> Self {
        Self::with_finder(options, requester, Arc::new(PublicKeyFinder::default()))
    }

    /// As [`Self::new`] with an explicit key finder.
    pub fn with_finder(
        options: StandardOpOptions,
        requester: Arc<dyn TokenRequester>,
        finder: Arc<PublicKeyFinder>,
    ) -> Self {
        StandardOp {
            options,
            requester,
            finder,
        }
    }

    /// The provider configuration.
    pub fn options(&self) -> &StandardOpOptions {
        &self.options
    }
}

#[async_trait]
impl OpenIdProvider for StandardOp {
    fn issuer(&self) -> &str {
        &self.options.issuer
    }

    async fn request_tokens(&self, cic: &Claims) -> Result<Vec<u8>> {
        let cic_hash = cic.hash()?;
        let id_token = self.requester.request_tokens(&cic_hash).await?;
        if self.options.gq_sign {
            create_gq_token(&id_token, self).await
        } else {
            Ok(id_token)
        }
    }

    fn public_key_finder(&self) -> Arc<PublicKeyFinder> {
        Arc::clone(&self.finder)
    }

    fn verifier(&self) -> ProviderVerifier {
        ProviderVerifier::new(
            self.options.issuer.as_str(),
            "nonce",
            ProviderVerifierOpts {
                client_id: self.options.client_id.clone(),
                gq_only: self.options.gq_sign,
                discover_public_key: Some(Arc::clone(&self.finder)),
                ..ProviderVerifierOpts::default()
            },
        )
    }
}
