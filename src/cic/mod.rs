//! Client instance claims: the binding between a user-held public key and
//! an ID Token.
//!
//! A CIC is a detached JWS. Its protected header holds the signer algorithm
//! (`alg`), the user's public key as a JWK (`upk`), a random salt (`rz`) and
//! any extra claims; its payload is the ID Token's payload segment. The
//! SHA-256 of the protected-header JSON, Base64URL-encoded, is the
//! *commitment* that issuance places into the ID Token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::jwk::Jwk;
use crate::jws::{self, signer::JwsSigner, ProtectedHeader};
use crate::{Algorithm, Error, Result};

/// Header members every CIC carries, in hash order.
const RESERVED: [&str; 3] = ["alg", "upk", "rz"];

/// Client instance claims.
///
/// The protected header is kept as an insertion-ordered map
/// (`alg, upk, rz, <extras>`), so [`Claims::hash`] is deterministic and
/// reproduces the exact bytes a remote party hashed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    protected: ProtectedHeader,
}

impl Claims {
    /// Creates claims for `upk` with a fresh random 32-byte `rz` salt.
    /// The salt makes every client session's commitment unique.
    ///
    /// # Errors
    /// Rejects a `upk` carrying private material, extra claims that collide
    /// with the reserved members, and keys without a supported algorithm.
    pub fn new(upk: &Jwk, extra_claims: ProtectedHeader) -> Result<Self> {
        let alg = upk.algorithm()?;
        let upk_value = upk.to_value()?;
        ensure_public_only(&upk_value)?;

        let mut rz = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut rz);

        let mut protected = ProtectedHeader::new();
        protected.insert("alg".to_string(), Value::from(alg.as_str()));
        protected.insert("upk".to_string(), upk_value);
        protected.insert("rz".to_string(), Value::from(hex::encode(rz)));
        for (name, value) in extra_claims {
            if RESERVED.contains(&name.as_str()) || name == "typ" {
                return Err(Error::Internal(format!(
                    "extra claim {name:?} collides with a reserved CIC member"
                )));
            }
            protected.insert(name, value);
        }
        Ok(Claims { protected })
    }

    /// Reconstructs claims from a CIC protected header as found in a PK
    /// Token. The `typ` member added at signing time is not part of the
    /// claims and is dropped.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] when a reserved member is missing
    /// or `upk` carries private material.
    pub fn from_protected(header: &ProtectedHeader) -> Result<Self> {
        for name in RESERVED {
            if !header.contains_key(name) {
                return Err(Error::MalformedToken {
                    reason: format!("CIC header missing {name:?}"),
                });
            }
        }
        let upk = header.get("upk").and_then(Value::as_object).ok_or_else(|| {
            Error::MalformedToken {
                reason: "CIC upk is not a JSON object".to_string(),
            }
        })?;
        ensure_public_only(&Value::Object(upk.clone()))?;

        let protected = header
            .iter()
            .filter(|(name, _)| name.as_str() != "typ")
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Claims { protected })
    }

    /// The commitment: Base64URL SHA-256 of the protected-header JSON with
    /// members in insertion order. Deterministic for a given CIC.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if serialization fails.
    pub fn hash(&self) -> Result<String> {
        let serialized = serde_json::to_vec(&self.protected)
            .map_err(|err| Error::Internal(format!("CIC serialization: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(serialized)))
    }

    /// The user's public key.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if `upk` does not parse as a JWK.
    pub fn public_key(&self) -> Result<Jwk> {
        Jwk::from_value(self.protected.get("upk").ok_or_else(|| {
            Error::MalformedToken {
                reason: "CIC header missing upk".to_string(),
            }
        })?)
    }

    /// The algorithm declared for the CIC signature.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] or [`Error::UnsupportedAlgorithm`].
    pub fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_str(jws::header_str(&self.protected, "alg")?)
    }

    /// The protected header these claims hash over.
    pub fn protected(&self) -> &ProtectedHeader {
        &self.protected
    }

    /// Produces the CIC token: a compact JWS over `payload_b64` (the ID
    /// Token's payload segment, taken verbatim) signed with the private
    /// half of `upk`. The signed header is the claims followed by
    /// `typ: "CIC"`.
    ///
    /// # Errors
    /// Rejects a signer whose public key is not the `upk` of these claims.
    pub fn sign(&self, signer: &JwsSigner, payload_b64: &str) -> Result<Vec<u8>> {
        if signer.public_jwk().thumbprint()? != self.public_key()?.thumbprint()? {
            return Err(Error::Internal(
                "signer does not hold the private half of upk".to_string(),
            ));
        }
        let mut header = self.protected.clone();
        header.insert("typ".to_string(), Value::from("CIC"));
        let header_b64 = jws::encode_protected(&header)?;
        let signature = signer.sign(&jws::signing_input(&header_b64, payload_b64))?;
        Ok(jws::join_compact(
            &header_b64,
            payload_b64,
            &jws::encode_segment(&signature),
        ))
    }
}

fn ensure_public_only(upk: &Value) -> Result<()> {
    for private_member in ["d", "p", "q", "dp", "dq", "qi", "k"] {
        if upk.get(private_member).is_some() {
            return Err(Error::MalformedToken {
                reason: format!("upk must be a public key, found {private_member:?}"),
            });
        }
    }
    Ok(())
}
