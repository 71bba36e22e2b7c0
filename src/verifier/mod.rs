//! Provider-agnostic PK Token verification.
//!
//! [`ProviderVerifier::verify`] composes the audience rule, provider
//! signature (RS256 or GQ256), commitment binding, issuer, CIC signature,
//! optional cosignature and expiration checks into a single verdict. The
//! checks short-circuit in a fixed order; in particular the commitment is
//! never evaluated before the provider signature has verified.

use std::sync::Arc;

use subtle::ConstantTimeEq as _;

use crate::common::{now_unix, EXPIRATION_SKEW_SECS};
use crate::discover::PublicKeyFinder;
use crate::jwk::Jwk;
use crate::jws::{self, signer::verify_with_jwk};
use crate::pktoken::PkToken;
use crate::{Algorithm, Error, Result, GQ_COMMITMENT_AUD_PREFIX};

/// Options controlling [`ProviderVerifier::verify`].
#[derive(Debug, Default, Clone)]
pub struct ProviderVerifierOpts {
    /// Required value of the `aud` claim. A list audience passes when it
    /// contains this value.
    pub client_id: String,
    /// Accept any audience.
    pub skip_client_id_check: bool,
    /// Accept expired ID Tokens, for archival verification.
    pub skip_expiration_check: bool,
    /// Reject PK Tokens whose provider signature is not GQ256.
    pub gq_only: bool,
    /// The commitment is carried in the GQ protected header `cic` member
    /// rather than in an ID Token claim.
    pub gq_commitment: bool,
    /// Override for the key finder, useful in tests.
    pub discover_public_key: Option<Arc<PublicKeyFinder>>,
    /// When set, a valid cosignature under this key is mandatory.
    pub cosigner_public_key: Option<Jwk>,
}

/// Verifies PK Tokens issued by one OpenID provider.
#[derive(Debug)]
pub struct ProviderVerifier {
    issuer: String,
    commitment_claim: String,
    options: ProviderVerifierOpts,
    finder: Arc<PublicKeyFinder>,
}

impl ProviderVerifier {
    /// Creates a verifier.
    ///
    /// `issuer` is the provider issuer as it appears in ID Tokens, e.g.
    /// `https://accounts.google.com`. `commitment_claim` names the payload
    /// claim holding the commitment (typically `nonce`); it must be empty
    /// in GQ-commitment mode.
    pub fn new(
        issuer: impl Into<String>,
        commitment_claim: impl Into<String>,
        options: ProviderVerifierOpts,
    ) -> Self {
        let finder = options
            .discover_public_key
            .clone()
            .unwrap_or_else(|| Arc::new(PublicKeyFinder::default()));
        ProviderVerifier {
            issuer: issuer.into(),
            commitment_claim: commitment_claim.into(),
            options,
            finder,
        }
    }

    /// The issuer this verifier accepts.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verifies `pkt`. The first failing check is the reported error.
    ///
    /// # Errors
    /// See [`Error`]; every verification step maps to one of its kinds.
    pub async fn verify(&self, pkt: &PkToken) -> Result<()> {
        self.check_configuration()?;
        self.check_audience(pkt)?;
        self.check_provider_signature(pkt).await?;
        self.check_commitment(pkt)?;
        self.check_issuer(pkt)?;
        self.check_cic_signature(pkt)?;
        self.check_cosignature(pkt)?;
        self.check_expiration(pkt)?;
        Ok(())
    }

    // Catch misconfiguration early with meaningful errors rather than
    // failing deep inside a signature check.
    fn check_configuration(&self) -> Result<()> {
        if self.options.gq_commitment {
            if !self.options.gq_only {
                return Err(Error::Internal(
                    "gq_commitment requires gq_only".to_string(),
                ));
            }
            if !self.commitment_claim.is_empty() {
                return Err(Error::Internal(format!(
                    "gq_commitment requires an empty commitment claim, got {:?}",
                    self.commitment_claim
                )));
            }
            if !self.options.skip_client_id_check {
                // The audience of a GQ-commitment token is prefixed, so it
                // can never equal a client id.
                return Err(Error::Internal(
                    "gq_commitment requires skip_client_id_check".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_audience(&self, pkt: &PkToken) -> Result<()> {
        if !self.options.skip_client_id_check {
            let audience = pkt.audience()?;
            if !audience.contains(&self.options.client_id) {
                return Err(Error::AudienceMismatch {
                    client_id: self.options.client_id.clone(),
                    aud: audience.to_string(),
                });
            }
        }
        if self.options.gq_commitment {
            let audience = pkt.audience()?;
            let single = audience.as_single().ok_or_else(|| Error::MalformedToken {
                reason: "GQ-commitment tokens must carry a single audience".to_string(),
            })?;
            if !single.starts_with(GQ_COMMITMENT_AUD_PREFIX) {
                return Err(Error::AudienceMismatch {
                    client_id: format!("{GQ_COMMITMENT_AUD_PREFIX}*"),
                    aud: single.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn check_provider_signature(&self, pkt: &PkToken) -> Result<()> {
        let alg = pkt.provider_algorithm()?;
        if self.options.gq_only && alg != Algorithm::Gq256 {
            return Err(Error::UnsupportedAlgorithm {
                alg: format!("{alg} provider signature rejected, GQ256 required"),
            });
        }
        let op_token = pkt.compact_op();
        match alg {
            Algorithm::Gq256 => {
                let record = self.finder.by_token(&self.issuer, &op_token).await?;
                crate::gq::verify_jwt(&record.jwk.to_rsa()?, &op_token)
            }
            Algorithm::Rs256 => {
                let record = self.finder.by_token(&self.issuer, &op_token).await?;
                let signature = jws::decode_segment(pkt.op().signature_b64())?;
                verify_with_jwk(
                    &record.jwk,
                    &jws::signing_input(pkt.op().protected_b64(), pkt.payload_b64()),
                    &signature,
                    "op",
                )
            }
            other => Err(Error::UnsupportedAlgorithm {
                alg: format!("{other} is not a provider signature algorithm"),
            }),
        }
    }

    fn check_commitment(&self, pkt: &PkToken) -> Result<()> {
        let expected = pkt.cic_values()?.hash()?;
        let got = if self.options.gq_commitment {
            pkt.op()
                .protected_header()?
                .get("cic")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            pkt.payload_claims()?
                .get(&self.commitment_claim)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        if bool::from(got.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(Error::CommitmentMismatch { got, expected })
        }
    }

    fn check_issuer(&self, pkt: &PkToken) -> Result<()> {
        let issuer = pkt.issuer()?;
        if issuer != self.issuer {
            return Err(Error::IssuerMismatch {
                got: issuer,
                expected: self.issuer.clone(),
            });
        }
        Ok(())
    }

    fn check_cic_signature(&self, pkt: &PkToken) -> Result<()> {
        let upk = pkt.cic_values()?.public_key()?;
        let signature = jws::decode_segment(pkt.cic().signature_b64())?;
        verify_with_jwk(
            &upk,
            &jws::signing_input(pkt.cic().protected_b64(), pkt.payload_b64()),
            &signature,
            "cic",
        )
    }

    fn check_cosignature(&self, pkt: &PkToken) -> Result<()> {
        let Some(cosigner_key) = &self.options.cosigner_public_key else {
            return Ok(());
        };
        pkt.check_cos_signature(cosigner_key)?;
        let claims = pkt.cos_claims()?.ok_or_else(|| Error::MalformedToken {
            reason: "no cosignature attached".to_string(),
        })?;
        if claims.exp <= now_unix() {
            return Err(Error::Expired {
                reason: format!("cosignature expired at {}", claims.exp),
            });
        }
        Ok(())
    }

    fn check_expiration(&self, pkt: &PkToken) -> Result<()> {
        if self.options.skip_expiration_check {
            return Ok(());
        }
        let claims = pkt.payload_claims()?;
        let now = now_unix();
        if let Some(exp) = claims.get("exp").and_then(serde_json::Value::as_i64) {
            if exp <= now - EXPIRATION_SKEW_SECS {
                return Err(Error::Expired {
                    reason: format!("exp {exp} is in the past (now {now})"),
                });
            }
        }
        if let Some(iat) = claims.get("iat").and_then(serde_json::Value::as_i64) {
            if iat >= now + EXPIRATION_SKEW_SECS {
                return Err(Error::Expired {
                    reason: format!("iat {iat} is in the future (now {now})"),
                });
            }
        }
        Ok(())
    }
}
