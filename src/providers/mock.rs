//! In-memory OpenID provider for tests: holds its own RSA signing key and
//! serves its JWKS through a static fetcher, so whole issuance and
//! verification cycles run without any network.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cic::Claims;
use crate::common::now_unix;
use crate::discover::{PublicKeyFinder, StaticJwksFetch};
use crate::jwk::{Jwk, JwkSet};
use crate::jws::{self, ProtectedHeader};
use crate::verifier::{ProviderVerifier, ProviderVerifierOpts};
use crate::{Error, Result, GQ_COMMITMENT_AUD_PREFIX};

use super::{create_gq_bound_token, create_gq_token, OpenIdProvider};

/// Configuration of the mock provider.
#[derive(Clone, Debug)]
pub struct MockOpOptions {
    /// Issuer written into issued tokens.
    pub issuer: String,
    /// Audience written into issued tokens (outside GQ-commitment mode).
    pub client_id: String,
    /// Payload claim carrying the commitment.
    pub commitment_claim: String,
    /// Upgrade issued tokens to GQ256.
    pub sign_gq: bool,
    /// Bind the commitment through the GQ protected header instead of a
    /// payload claim; implies a prefixed audience and a GQ signature.
    pub gq_commitment: bool,
    /// Lifetime of issued tokens, seconds.
    pub token_lifetime_secs: i64,
}

impl Default for MockOpOptions {
    fn default() -> Self {
        MockOpOptions {
            issuer: "https://accounts.example.com".to_string(),
            client_id: "test-client".to_string(),
            commitment_claim: "nonce".to_string(),
            sign_gq: false,
            gq_commitment: false,
            token_lifetime_secs: 3600,
        }
    }
}

/// A mock OP signing 2048-bit RS256 ID Tokens.
pub struct MockOp {
    options: MockOpOptions,
    signing_key: RsaPrivateKey,
    kid: String,
    finder: Arc<PublicKeyFinder>,
}

impl std::fmt::Debug for MockOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockOp")
            .field("options", &self.options)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl MockOp {
    /// Creates a mock OP with default options and a fresh signing key.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if RSA key generation fails.
    pub fn new() -> Result<Self> {
        Self::with_options(MockOpOptions::default())
    }

    /// Creates a mock OP with explicit options.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if RSA key generation fails.
    pub fn with_options(options: MockOpOptions) -> Result<Self> {
        let signing_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|err| Error::Internal(format!("mock OP key generation: {err}")))?;
        let mut kid_bytes = [0u8; 8];
        OsRng.fill_bytes(&mut kid_bytes);
        let kid = hex::encode(kid_bytes);

        let mut jwk = Jwk::from_rs256(&signing_key.to_public_key());
        jwk.kid = Some(kid.clone());
        let jwks = serde_json::to_vec(&JwkSet { keys: vec![jwk] })
            .map_err(|err| Error::Internal(format!("mock OP jwks: {err}")))?;
        let finder = Arc::new(PublicKeyFinder::new(Arc::new(StaticJwksFetch::new(jwks))));

        Ok(MockOp {
            options,
            signing_key,
            kid,
            finder,
        })
    }

    /// The mock OP's configuration.
    pub fn options(&self) -> &MockOpOptions {
        &self.options
    }

    /// The mock OP's public key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.signing_key.to_public_key()
    }

    /// The `kid` the mock OP signs under.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Standard payload claims for an issued token. Tests tweak the map
    /// before passing it to [`Self::issue_id_token`].
    pub fn default_claims(&self) -> ProtectedHeader {
        let now = now_unix();
        let mut claims = ProtectedHeader::new();
        claims.insert("iss".to_string(), Value::from(self.options.issuer.clone()));
        claims.insert(
            "aud".to_string(),
            Value::from(self.options.client_id.clone()),
        );
        claims.insert("sub".to_string(), Value::from("1234567890"));
        claims.insert("email".to_string(), Value::from("alice@example.com"));
        claims.insert("iat".to_string(), Value::from(now));
        claims.insert(
            "exp".to_string(),
            Value::from(now + self.options.token_lifetime_secs),
        );
        claims
    }

    /// Signs an RS256 ID Token over the given payload claims.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if signing fails.
    pub fn issue_id_token(&self, claims: &ProtectedHeader) -> Result<Vec<u8>> {
        let mut header = ProtectedHeader::new();
        header.insert("alg".to_string(), Value::from("RS256"));
        header.insert("typ".to_string(), Value::from("JWT"));
        header.insert("kid".to_string(), Value::from(self.kid.clone()));
        let header_b64 = jws::encode_protected(&header)?;
        let payload = serde_json::to_vec(claims)
            .map_err(|err| Error::Internal(format!("mock OP payload: {err}")))?;
        let payload_b64 = jws::encode_segment(&payload);
        let digest = Sha256::digest(jws::signing_input(&header_b64, &payload_b64));
        let signature = self
            .signing_key
            .sign(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|err| Error::Internal(format!("mock OP signing: {err}")))?;
        Ok(jws::join_compact(
            &header_b64,
            &payload_b64,
            &jws::encode_segment(&signature),
        ))
    }
}

#[async_trait]
impl OpenIdProvider for MockOp {
    fn issuer(&self) -> &str {
        &self.options.issuer
    }

    async fn request_tokens(&self, cic: &Claims) -> Result<Vec<u8>> {
        let cic_hash = cic.hash()?;
        if self.options.gq_commitment {
            // The commitment rides in the GQ header; the audience only
            // signals PK Token intent.
            let mut aud_entropy = [0u8; 16];
            OsRng.fill_bytes(&mut aud_entropy);
            let mut claims = self.default_claims();
            claims.insert(
                "aud".to_string(),
                Value::from(format!(
                    "{GQ_COMMITMENT_AUD_PREFIX}{}",
                    hex::encode(aud_entropy)
                )),
            );
            let id_token = self.issue_id_token(&claims)?;
            return create_gq_bound_token(&id_token, self, &cic_hash).await;
        }

        let mut claims = self.default_claims();
        claims.insert(
            self.options.commitment_claim.clone(),
            Value::from(cic_hash),
        );
        let id_token = self.issue_id_token(&claims)?;
        if self.options.sign_gq {
            create_gq_token(&id_token, self).await
        } else {
            Ok(id_token)
        }
    }

    fn public_key_finder(&self) -> Arc<PublicKeyFinder> {
        Arc::clone(&self.finder)
    }

    fn verifier(&self) -> ProviderVerifier {
        if self.options.gq_commitment {
            ProviderVerifier::new(
                self.options.issuer.as_str(),
                "",
                ProviderVerifierOpts {
                    skip_client_id_check: true,
                    gq_only: true,
                    gq_commitment: true,
                    discover_public_key: Some(Arc::clone(&self.finder)),
                    ..ProviderVerifierOpts::default()
                },
            )
        } else {
            ProviderVerifier::new(
                self.options.issuer.as_str(),
                self.options.commitment_claim.as_str(),
                ProviderVerifierOpts {
                    client_id: self.options.client_id.clone(),
                    gq_only: self.options.sign_gq,
                    discover_public_key: Some(Arc::clone(&self.finder)),
                    ..ProviderVerifierOpts::default()
                },
            )
        }
    }
}
