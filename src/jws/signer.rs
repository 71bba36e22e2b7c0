//! Signing keys for the client and cosigner sides, and signature
//! verification against a JWK.

use p256::ecdsa::signature::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};

use crate::jwk::Jwk;
use crate::{Algorithm, Error, Result};

/// A private signing key owned by this process. The user key signs CIC
/// tokens and cosigner-protocol messages; the cosigner key signs
/// cosignatures. Key material is zeroized on drop by the underlying
/// RustCrypto types.
pub enum JwsSigner {
    /// ES256 over P-256.
    Es256(p256::ecdsa::SigningKey),
    /// RS256 over an RSA private key.
    Rs256(Box<rsa::RsaPrivateKey>),
}

impl std::fmt::Debug for JwsSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwsSigner")
            .field("alg", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl JwsSigner {
    /// Generates a fresh ES256 signer.
    pub fn generate_es256() -> Self {
        JwsSigner::Es256(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    /// The JOSE algorithm of this key.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            JwsSigner::Es256(_) => Algorithm::Es256,
            JwsSigner::Rs256(_) => Algorithm::Rs256,
        }
    }

    /// The public half as a JWK with the `alg` member set.
    pub fn public_jwk(&self) -> Jwk {
        match self {
            JwsSigner::Es256(key) => Jwk::from_es256(key.verifying_key()),
            JwsSigner::Rs256(key) => Jwk::from_rs256(&key.to_public_key()),
        }
    }

    /// Signs a JWS signing input, returning the raw signature bytes for the
    /// signature segment.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if the underlying signer fails.
    pub fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>> {
        match self {
            JwsSigner::Es256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .try_sign(signing_input)
                    .map_err(|err| Error::Internal(format!("ES256 signing: {err}")))?;
                Ok(signature.to_bytes().to_vec())
            }
            JwsSigner::Rs256(key) => {
                let digest = Sha256::digest(signing_input);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|err| Error::Internal(format!("RS256 signing: {err}")))
            }
        }
    }
}

/// Verifies a JWS signature against a public JWK, dispatching on the
/// algorithm the JWK declares.
///
/// # Errors
/// Returns [`Error::SignatureInvalid`] (tagged with `part`) on verification
/// failure, [`Error::UnsupportedAlgorithm`] for algorithms a JWK cannot
/// directly verify.
pub fn verify_with_jwk(
    jwk: &Jwk,
    signing_input: &[u8],
    signature: &[u8],
    part: &'static str,
) -> Result<()> {
    match jwk.algorithm()? {
        Algorithm::Es256 => {
            let key = jwk.to_es256()?;
            let signature = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| Error::SignatureInvalid { part })?;
            key.verify(signing_input, &signature)
                .map_err(|_| Error::SignatureInvalid { part })
        }
        Algorithm::Rs256 => {
            let key = jwk.to_rsa()?;
            let digest = Sha256::digest(signing_input);
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                .map_err(|_| Error::SignatureInvalid { part })
        }
        Algorithm::Gq256 => Err(Error::UnsupportedAlgorithm {
            alg: "GQ256 cannot be verified against a JWK".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn es256_sign_verify_cycle() {
        let signer = JwsSigner::generate_es256();
        let jwk = signer.public_jwk();
        let input = b"eyJhbGciOiJFUzI1NiJ9.eyJzdWIiOiJ0ZXN0In0";
        let signature = signer.sign(input).unwrap();
        assert!(verify_with_jwk(&jwk, input, &signature, "test").is_ok());

        let mut tampered = signature;
        tampered[0] ^= 1;
        assert!(matches!(
            verify_with_jwk(&jwk, input, &tampered, "test"),
            Err(Error::SignatureInvalid { .. })
        ));
    }
}
