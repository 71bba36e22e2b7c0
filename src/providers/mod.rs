//! OpenID provider adapters.
//!
//! An adapter supplies the issuer, a token requestor bound to a CIC
//! commitment, key lookup (delegated to [`discover`](crate::discover)) and
//! a preconfigured verifier. Concrete adapters cover the standard
//! browser-flow providers (Google, Azure), GitHub Actions, and an
//! in-memory mock for tests.

pub mod github;
pub mod mock;
pub mod standard;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cic::Claims;
use crate::discover::{PublicKeyFinder, PublicKeyRecord};
use crate::gq;
use crate::jws;
use crate::verifier::ProviderVerifier;
use crate::{Error, Result};

/// Capability set of an OpenID provider adapter.
#[async_trait]
pub trait OpenIdProvider: Send + Sync {
    /// The issuer URI as it appears in issued ID Tokens.
    fn issuer(&self) -> &str;

    /// Requests an ID Token whose commitment binds `cic`.
    async fn request_tokens(&self, cic: &Claims) -> Result<Vec<u8>>;

    /// The key-discovery machinery for this provider.
    fn public_key_finder(&self) -> Arc<PublicKeyFinder>;

    /// A verifier configured the way this provider issues tokens.
    fn verifier(&self) -> ProviderVerifier;

    /// Resolves the key `token` was signed under.
    async fn public_key_by_token(&self, token: &[u8]) -> Result<PublicKeyRecord> {
        self.public_key_finder()
            .by_token(self.issuer(), token)
            .await
    }
}

/// Upgrades a provider-issued RS256 ID Token to a GQ256 token, hiding the
/// provider's signature.
///
/// # Errors
/// As [`gq::sign_jwt`], plus key-discovery failures.
pub async fn create_gq_token(id_token: &[u8], op: &dyn OpenIdProvider) -> Result<Vec<u8>> {
    let record = op.public_key_by_token(id_token).await?;
    gq::sign_jwt(&record.jwk.to_rsa()?, id_token, None)
}

/// Like [`create_gq_token`], additionally binding `commitment` into the GQ
/// protected header under `cic` (GQ-commitment mode).
///
/// # Errors
/// As [`create_gq_token`].
pub async fn create_gq_bound_token(
    id_token: &[u8],
    op: &dyn OpenIdProvider,
    commitment: &str,
) -> Result<Vec<u8>> {
    let record = op.public_key_by_token(id_token).await?;
    gq::sign_jwt(&record.jwk.to_rsa()?, id_token, Some(commitment))
}

/// Reads a string claim out of an ID Token payload.
///
/// # Errors
/// Returns [`Error::MalformedToken`] when the token does not parse or the
/// claim is absent or not a string.
pub fn extract_claim(id_token: &[u8], name: &str) -> Result<String> {
    let (_, payload_b64, _) = jws::split_compact(id_token)?;
    let raw = jws::decode_segment(payload_b64)?;
    let payload: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&raw).map_err(|_| Error::MalformedToken {
            reason: "ID Token payload is not a JSON object".to_string(),
        })?;
    payload
        .get(name)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedToken {
            reason: format!("claim {name:?} missing from payload"),
        })
}
