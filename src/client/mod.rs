//! Client-side issuance: turning an OIDC authentication into a PK Token.

use std::sync::Arc;

use crate::cic::Claims;
use crate::jws::{self, signer::JwsSigner, ProtectedHeader};
use crate::pktoken::PkToken;
use crate::providers::OpenIdProvider;
use crate::Result;

/// Drives the issuance flow against one provider adapter with one user
/// signing key.
pub struct OpkClient {
    op: Arc<dyn OpenIdProvider>,
    signer: JwsSigner,
}

impl std::fmt::Debug for OpkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpkClient")
            .field("issuer", &self.op.issuer())
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl OpkClient {
    /// Creates a client.
    pub fn new(op: Arc<dyn OpenIdProvider>, signer: JwsSigner) -> Self {
        OpkClient { op, signer }
    }

    /// The user signing key.
    pub fn signer(&self) -> &JwsSigner {
        &self.signer
    }

    /// Runs issuance: builds fresh client instance claims over the user
    /// key, requests an ID Token committed to them, signs the CIC token
    /// over the ID Token's payload, assembles the PK Token, and verifies
    /// the result with the provider's own verifier before returning it.
    ///
    /// # Errors
    /// Any failure along that chain; a PK Token is only returned if it
    /// verifies.
    pub async fn oidc_auth(&self, extra_claims: ProtectedHeader) -> Result<PkToken> {
        let cic = Claims::new(&self.signer.public_jwk(), extra_claims)?;
        let id_token = self.op.request_tokens(&cic).await?;

        let (_, payload_b64, _) = jws::split_compact(&id_token)?;
        let cic_token = cic.sign(&self.signer, payload_b64)?;

        let pkt = PkToken::new(&id_token, &cic_token)?;
        self.op.verifier().verify(&pkt).await?;
        Ok(pkt)
    }
}
