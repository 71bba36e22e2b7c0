//! JSON Web Key model, RFC 7638 thumbprints, and conversions to the
//! RustCrypto key types used for actual verification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::VerifyingKey;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{Algorithm, Error, Result};

/// A public JSON Web Key. Only the members this crate consumes are modeled;
/// unknown members of provider-served keys are ignored on parse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, `RSA` or `EC`.
    pub kty: String,
    /// Intended algorithm, e.g. `RS256`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key id assigned by the issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key use, e.g. `sig`.
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate, Base64URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate, Base64URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// RSA modulus, Base64URL big-endian.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, Base64URL big-endian.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// A JWK Set as served from a `jwks_uri`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwkSet {
    /// The keys in the set.
    pub keys: Vec<Jwk>,
}

impl Jwk {
    /// Builds a public JWK from a P-256 verifying key, with `alg: ES256`.
    pub fn from_es256(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        Jwk {
            kty: "EC".to_string(),
            alg: Some(Algorithm::Es256.as_str().to_string()),
            kid: None,
            key_use: None,
            crv: Some("P-256".to_string()),
            x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
            y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
            n: None,
            e: None,
        }
    }

    /// Builds a public JWK from an RSA public key, with `alg: RS256`.
    pub fn from_rs256(key: &RsaPublicKey) -> Self {
        use rsa::traits::PublicKeyParts;
        Jwk {
            kty: "RSA".to_string(),
            alg: Some(Algorithm::Rs256.as_str().to_string()),
            kid: None,
            key_use: None,
            crv: None,
            x: None,
            y: None,
            n: Some(URL_SAFE_NO_PAD.encode(key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(key.e().to_bytes_be())),
        }
    }

    /// The algorithm this key verifies: the `alg` member when present,
    /// otherwise inferred from the key type.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedAlgorithm`] when neither path yields a
    /// supported algorithm.
    pub fn algorithm(&self) -> Result<Algorithm> {
        if let Some(alg) = &self.alg {
            return Algorithm::from_str(alg);
        }
        match (self.kty.as_str(), self.crv.as_deref()) {
            ("RSA", _) => Ok(Algorithm::Rs256),
            ("EC", Some("P-256")) => Ok(Algorithm::Es256),
            _ => Err(Error::UnsupportedAlgorithm {
                alg: format!("kty={}", self.kty),
            }),
        }
    }

    /// Converts to an RSA public key.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the JWK is not a usable RSA key.
    pub fn to_rsa(&self) -> Result<RsaPublicKey> {
        let n = self.n.as_deref().ok_or_else(|| malformed("jwk missing n"))?;
        let e = self.e.as_deref().ok_or_else(|| malformed("jwk missing e"))?;
        let n = BigUint::from_bytes_be(&decode_param(n)?);
        let e = BigUint::from_bytes_be(&decode_param(e)?);
        RsaPublicKey::new(n, e).map_err(|err| malformed(&format!("invalid RSA key: {err}")))
    }

    /// Converts to a P-256 verifying key.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the JWK is not a usable P-256 key.
    pub fn to_es256(&self) -> Result<VerifyingKey> {
        if self.crv.as_deref() != Some("P-256") {
            return Err(malformed("jwk curve is not P-256"));
        }
        let x = decode_param(self.x.as_deref().ok_or_else(|| malformed("jwk missing x"))?)?;
        let y = decode_param(self.y.as_deref().ok_or_else(|| malformed("jwk missing y"))?)?;
        if x.len() != 32 || y.len() != 32 {
            return Err(malformed("jwk P-256 coordinates must be 32 bytes"));
        }
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&x),
            p256::FieldBytes::from_slice(&y),
            false,
        );
        VerifyingKey::from_encoded_point(&point).map_err(|_| malformed("invalid P-256 point"))
    }

    /// The RFC 7638 thumbprint: SHA-256 over the canonical JSON of the
    /// required members in lexicographic order, Base64URL-encoded.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] for key types without a defined
    /// canonical form.
    pub fn thumbprint(&self) -> Result<String> {
        let mut canonical = Map::new();
        match self.kty.as_str() {
            "EC" => {
                canonical.insert("crv".into(), json_str(self.crv.as_deref(), "crv")?);
                canonical.insert("kty".into(), Value::from("EC"));
                canonical.insert("x".into(), json_str(self.x.as_deref(), "x")?);
                canonical.insert("y".into(), json_str(self.y.as_deref(), "y")?);
            }
            "RSA" => {
                canonical.insert("e".into(), json_str(self.e.as_deref(), "e")?);
                canonical.insert("kty".into(), Value::from("RSA"));
                canonical.insert("n".into(), json_str(self.n.as_deref(), "n")?);
            }
            other => {
                return Err(malformed(&format!("no thumbprint form for kty {other:?}")));
            }
        }
        let serialized = serde_json::to_vec(&canonical)
            .map_err(|err| Error::Internal(format!("thumbprint serialization: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(serialized)))
    }

    /// Serializes to a JSON value, e.g. for embedding as a `upk` header.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|err| Error::Internal(format!("jwk to value: {err}")))
    }

    /// Parses a JWK out of a JSON value.
    ///
    /// # Errors
    /// Returns [`Error::MalformedToken`] if the value is not a JWK object.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|_| malformed("value is not a JWK"))
    }
}

fn decode_param(b64: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|_| malformed("jwk parameter is not base64url"))
}

fn json_str(value: Option<&str>, name: &str) -> Result<Value> {
    value
        .map(Value::from)
        .ok_or_else(|| malformed(&format!("jwk missing {name}")))
}

fn malformed(reason: &str) -> Error {
    Error::MalformedToken {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7638 §3.1 example key and thumbprint.
    #[test]
    fn rsa_thumbprint_matches_rfc7638_vector() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            kid: Some("2011-04-29".to_string()),
            key_use: None,
            crv: None,
            x: None,
            y: None,
            n: Some(
                "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw"
                    .to_string(),
            ),
            e: Some("AQAB".to_string()),
        };
        assert_eq!(
            jwk.thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn es256_key_roundtrips_through_jwk() {
        let signing = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let verifying = VerifyingKey::from(&signing);
        let jwk = Jwk::from_es256(&verifying);
        assert_eq!(jwk.algorithm().unwrap(), Algorithm::Es256);
        assert_eq!(jwk.to_es256().unwrap(), verifying);
    }

    #[test]
    fn jwk_value_roundtrip_never_contains_private_material() {
        let signing = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let jwk = Jwk::from_es256(&VerifyingKey::from(&signing));
        let value = jwk.to_value().unwrap();
        assert!(value.get("d").is_none());
        assert_eq!(Jwk::from_value(&value).unwrap(), jwk);
    }
}
