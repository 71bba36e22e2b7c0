//! The PK Token envelope: provider, client-instance and optional cosigner
//! signatures over one shared ID Token payload.
//!
//! Each part is a JWS with an empty (detached) payload segment; the payload
//! is written once. Protected headers are stored in their received
//! Base64URL form and only decoded on access, so the bytes a signature
//! authenticates survive every serialization round-trip untouched.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::cic;
use crate::gq;
use crate::jwk::Jwk;
use crate::jws::{self, signer::JwsSigner, ProtectedHeader};
use crate::{Algorithm, Error, Result};

/// One `header.signature` pair of the envelope, both segments Base64URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignaturePart {
    protected: String,
    signature: String,
}

impl SignaturePart {
    /// The protected header segment as received.
    pub fn protected_b64(&self) -> &str {
        &self.protected
    }

    /// The signature segment as received.
    pub fn signature_b64(&self) -> &str {
        &self.signature
    }

    /// Decodes and parses the protected header.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the segment does not parse.
    pub fn protected_header(&self) -> Result<ProtectedHeader> {
        jws::parse_protected(&self.protected)
    }
}

/// How the provider part is signed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProviderSignatureType {
    /// The provider's original RS256 signature.
    Oidc,
    /// A GQ256 proof of knowledge of the provider's signature.
    Gq,
}

/// Claims of the cosigner's protected header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignerClaims {
    /// Cosigner issuer URI.
    pub iss: String,
    /// Cosigner key id.
    pub kid: String,
    /// Cosignature algorithm.
    pub alg: String,
    /// Auth session id minted during `init_auth`.
    pub auth_id: String,
    /// When the second factor completed, unix seconds.
    pub auth_time: i64,
    /// When the cosignature was issued, unix seconds.
    pub iat: i64,
    /// When the cosignature expires, unix seconds.
    pub exp: i64,
    /// Redirect URI used during cosigner authentication.
    pub ruri: String,
    /// Nonce supplied by the user.
    pub nonce: String,
}

/// An `aud` claim: a single value or a list, per RFC 7519.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    /// The single-audience form.
    Single(String),
    /// The list form.
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether `client_id` satisfies this audience: string equality for the
    /// single form, membership for the list form. A join of list members is
    /// never accepted as a single string.
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == client_id,
            Audience::Multiple(list) => list.iter().any(|aud| aud == client_id),
        }
    }

    /// The single-form value, if this is one.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Audience::Single(aud) => Some(aud.as_str()),
            Audience::Multiple(_) => None,
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Single(aud) => write!(f, "{aud}"),
            Audience::Multiple(list) => write!(f, "{}", list.join(",")),
        }
    }
}

/// The PK Token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkToken {
    payload: String,
    op: SignaturePart,
    cic: SignaturePart,
    cos: Option<SignaturePart>,
    cos_verified: bool,
}

#[derive(Serialize, Deserialize)]
struct PkTokenJson {
    payload: String,
    op_protected: String,
    op_signature: String,
    cic_protected: String,
    cic_signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cos_protected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cos_signature: Option<String>,
}

impl PkToken {
    /// Assembles a PK Token from a provider-issued ID Token and the CIC
    /// token signed over its payload.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if either token does not split or
    /// their payload segments differ.
    pub fn new(id_token: &[u8], cic_token: &[u8]) -> Result<Self> {
        let (op_header, op_payload, op_sig) = jws::split_compact(id_token)?;
        let (cic_header, cic_payload, cic_sig) = jws::split_compact(cic_token)?;
        if op_payload != cic_payload {
            return Err(Error::MalformedToken {
                reason: "ID Token and CIC token payloads differ".to_string(),
            });
        }
        Ok(PkToken {
            payload: op_payload.to_string(),
            op: SignaturePart {
                protected: op_header.to_string(),
                signature: op_sig.to_string(),
            },
            cic: SignaturePart {
                protected: cic_header.to_string(),
                signature: cic_sig.to_string(),
            },
            cos: None,
            cos_verified: false,
        })
    }

    /// Parses the JSON serialization.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] on schema violations, including a
    /// cosigner header without a signature or vice versa.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| Error::MalformedToken {
            reason: format!("PK Token JSON: {err}"),
        })
    }

    /// Serializes to the canonical JSON form.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| Error::Internal(format!("PK Token JSON: {err}")))
    }

    /// The shared payload segment, Base64URL.
    pub fn payload_b64(&self) -> &str {
        &self.payload
    }

    /// The decoded payload claims.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the payload is not a JSON object.
    pub fn payload_claims(&self) -> Result<ProtectedHeader> {
        let raw = jws::decode_segment(&self.payload)?;
        match serde_json::from_slice(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(Error::MalformedToken {
                reason: "ID Token payload is not a JSON object".to_string(),
            }),
        }
    }

    /// The provider part.
    pub fn op(&self) -> &SignaturePart {
        &self.op
    }

    /// The client-instance part.
    pub fn cic(&self) -> &SignaturePart {
        &self.cic
    }

    /// The cosigner part, if attached.
    pub fn cos(&self) -> Option<&SignaturePart> {
        self.cos.as_ref()
    }

    /// The provider part as a compact JWS (the possibly GQ-transformed
    /// ID Token).
    pub fn compact_op(&self) -> Vec<u8> {
        jws::join_compact(&self.op.protected, &self.payload, &self.op.signature)
    }

    /// The client-instance part as a compact JWS.
    pub fn compact_cic(&self) -> Vec<u8> {
        jws::join_compact(&self.cic.protected, &self.payload, &self.cic.signature)
    }

    /// The cosigner part as a compact JWS, if attached.
    pub fn compact_cos(&self) -> Option<Vec<u8>> {
        self.cos
            .as_ref()
            .map(|cos| jws::join_compact(&cos.protected, &self.payload, &cos.signature))
    }

    /// The `iss` claim.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the claim is absent.
    pub fn issuer(&self) -> Result<String> {
        Ok(jws::header_str(&self.payload_claims()?, "iss")?.to_string())
    }

    /// The `aud` claim in either of its RFC 7519 forms.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the claim is absent or has an
    /// unexpected shape.
    pub fn audience(&self) -> Result<Audience> {
        match self.payload_claims()?.get("aud") {
            Some(Value::String(aud)) => Ok(Audience::Single(aud.clone())),
            Some(Value::Array(list)) => list
                .iter()
                .map(|aud| {
                    aud.as_str().map(str::to_string).ok_or(Error::MalformedToken {
                        reason: "aud list contains a non-string".to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Audience::Multiple),
            _ => Err(Error::MalformedToken {
                reason: "missing audience claim".to_string(),
            }),
        }
    }

    /// The provider part's `alg`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] or [`Error::UnsupportedAlgorithm`].
    pub fn provider_algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_str(jws::header_str(&self.op.protected_header()?, "alg")?)
    }

    /// Whether the provider part carries the original OIDC signature or a
    /// GQ proof.
    ///
    /// # Errors
    /// As [`Self::provider_algorithm`].
    pub fn provider_signature_type(&self) -> Result<ProviderSignatureType> {
        Ok(match self.provider_algorithm()? {
            Algorithm::Gq256 => ProviderSignatureType::Gq,
            _ => ProviderSignatureType::Oidc,
        })
    }

    /// The client instance claims parsed out of the CIC part.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the CIC header is not a valid
    /// set of claims.
    pub fn cic_values(&self) -> Result<cic::Claims> {
        cic::Claims::from_protected(&self.cic.protected_header()?)
    }

    /// The cosigner claims, if a cosignature is attached.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the cosigner header does not
    /// carry the expected claims.
    pub fn cos_claims(&self) -> Result<Option<CosignerClaims>> {
        let Some(cos) = &self.cos else {
            return Ok(None);
        };
        let raw = jws::decode_segment(&cos.protected)?;
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| Error::MalformedToken {
                reason: format!("cosigner claims: {err}"),
            })
    }

    /// Attaches a cosignature, given as a compact JWS over the shared
    /// payload with `typ: "COS"`.
    ///
    /// Idempotent: attaching the identical cosignature again is a no-op. A
    /// different cosignature replaces the current one only while the
    /// current one is unverified; replacing a verified cosignature fails.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] for payload or `typ` mismatches,
    /// [`Error::Internal`] when refusing to replace a verified cosignature.
    pub fn add_cosignature(&mut self, cos_token: &[u8]) -> Result<()> {
        let (header_b64, payload_b64, sig_b64) = jws::split_compact(cos_token)?;
        if payload_b64 != self.payload {
            return Err(Error::MalformedToken {
                reason: "cosignature payload differs from PK Token payload".to_string(),
            });
        }
        let header = jws::parse_protected(header_b64)?;
        if jws::header_str(&header, "typ")? != "COS" {
            return Err(Error::MalformedToken {
                reason: "cosignature must carry typ COS".to_string(),
            });
        }
        let incoming = SignaturePart {
            protected: header_b64.to_string(),
            signature: sig_b64.to_string(),
        };
        match &self.cos {
            Some(current) if *current == incoming => Ok(()),
            Some(_) if self.cos_verified => Err(Error::Internal(
                "refusing to replace a verified cosignature".to_string(),
            )),
            _ => {
                self.cos = Some(incoming);
                self.cos_verified = false;
                Ok(())
            }
        }
    }

    /// Verifies the attached cosignature against `jwk` and remembers the
    /// outcome, locking the cosignature against replacement.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if no cosignature is attached,
    /// [`Error::SignatureInvalid`] on verification failure.
    pub fn verify_cosigner_signature(&mut self, jwk: &Jwk) -> Result<()> {
        self.check_cos_signature(jwk)?;
        self.cos_verified = true;
        Ok(())
    }

    /// Cosignature verification without state updates, used by the
    /// verification pipeline.
    pub(crate) fn check_cos_signature(&self, jwk: &Jwk) -> Result<()> {
        let cos = self.cos.as_ref().ok_or_else(|| Error::MalformedToken {
            reason: "no cosignature attached".to_string(),
        })?;
        let signature = jws::decode_segment(&cos.signature)?;
        jws::signer::verify_with_jwk(
            jwk,
            &jws::signing_input(&cos.protected, &self.payload),
            &signature,
            "cos",
        )
    }

    /// Signs an arbitrary message under the user key bound into this PK
    /// Token, producing a compact JWS with `typ: "osm"`. The cosigner
    /// protocol exchanges such messages.
    ///
    /// # Errors
    /// Rejects a signer that does not hold the private half of `upk`.
    pub fn new_signed_message(&self, signer: &JwsSigner, message: &[u8]) -> Result<Vec<u8>> {
        let upk = self.cic_values()?.public_key()?;
        if signer.public_jwk().thumbprint()? != upk.thumbprint()? {
            return Err(Error::Internal(
                "signer does not hold the private half of upk".to_string(),
            ));
        }
        let mut header = ProtectedHeader::new();
        header.insert(
            "alg".to_string(),
            Value::from(signer.algorithm().as_str()),
        );
        header.insert("typ".to_string(), Value::from("osm"));
        let header_b64 = jws::encode_protected(&header)?;
        let payload_b64 = jws::encode_segment(message);
        let signature = signer.sign(&jws::signing_input(&header_b64, &payload_b64))?;
        Ok(jws::join_compact(
            &header_b64,
            &payload_b64,
            &jws::encode_segment(&signature),
        ))
    }

    /// Verifies a message produced by [`Self::new_signed_message`] against
    /// this PK Token's `upk` and returns the decoded payload.
    ///
    /// # Errors
    /// Returns [`Error::SignatureInvalid`] on verification failure,
    /// [`Error::MalformedToken`] for structural problems.
    pub fn verify_signed_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let (header_b64, payload_b64, sig_b64) = jws::split_compact(message)?;
        let header = jws::parse_protected(header_b64)?;
        if jws::header_str(&header, "typ")? != "osm" {
            return Err(Error::MalformedToken {
                reason: "signed message must carry typ osm".to_string(),
            });
        }
        let upk = self.cic_values()?.public_key()?;
        let signature = jws::decode_segment(sig_b64)?;
        jws::signer::verify_with_jwk(
            &upk,
            &jws::signing_input(header_b64, payload_b64),
            &signature,
            "osm",
        )?;
        jws::decode_segment(payload_b64)
    }
}

impl Serialize for PkToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        PkTokenJson {
            payload: self.payload.clone(),
            op_protected: self.op.protected.clone(),
            op_signature: self.op.signature.clone(),
            cic_protected: self.cic.protected.clone(),
            cic_signature: self.cic.signature.clone(),
            cos_protected: self.cos.as_ref().map(|cos| cos.protected.clone()),
            cos_signature: self.cos.as_ref().map(|cos| cos.signature.clone()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PkToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = PkTokenJson::deserialize(deserializer)?;
        let cos = match (json.cos_protected, json.cos_signature) {
            (Some(protected), Some(signature)) => Some(SignaturePart { protected, signature }),
            (None, None) => None,
            _ => {
                return Err(D::Error::custom(
                    "cos_protected and cos_signature must appear together",
                ))
            }
        };
        Ok(PkToken {
            payload: json.payload,
            op: SignaturePart {
                protected: json.op_protected,
                signature: json.op_signature,
            },
            cic: SignaturePart {
                protected: json.cic_protected,
                signature: json.cic_signature,
            },
            cos,
            cos_verified: false,
        })
    }
}

/// Upgrades the provider part of an assembled PK Token to a GQ256 proof.
/// The ID Token must currently carry an RS256 signature verifying under
/// `provider_key`.
///
/// # Errors
/// As [`gq::sign_jwt`].
pub fn upgrade_to_gq(pkt: &PkToken, provider_key: &rsa::RsaPublicKey) -> Result<PkToken> {
    let gq_token = gq::sign_jwt(provider_key, &pkt.compact_op(), None)?;
    let mut upgraded = PkToken::new(&gq_token, &pkt.compact_cic())?;
    if let Some(cos_token) = pkt.compact_cos() {
        upgraded.add_cosignature(&cos_token)?;
    }
    Ok(upgraded)
}
