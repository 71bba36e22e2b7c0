//! Verification of GQ256 tokens against the provider's RSA public key.

use num_bigint_dig::BigUint;
use rsa::RsaPublicKey;

use crate::jws;
use crate::{Algorithm, Error, Result};

use super::{
    challenge, challenge_bit, encoded_message, rsa_modulus, to_fixed_bytes, GQ256,
    SECURITY_PARAMETER,
};

/// Verifies a GQ256 token produced by [`sign_jwt`](super::sign_jwt).
///
/// Reconstructs the original RS256 signing input from the `jwt` header
/// member, recomputes the challenge, and checks every round equation
/// `S_j^e = R_j * mu^{c_j} mod N`.
///
/// # Errors
/// [`Error::SignatureInvalid`] if any round equation fails;
/// [`Error::MalformedToken`] on length or range violations;
/// [`Error::UnsupportedAlgorithm`] if either header carries an unexpected
/// algorithm.
pub fn verify_jwt(public_key: &RsaPublicKey, token: &[u8]) -> Result<()> {
    let (header_b64, payload_b64, sig_b64) = jws::split_compact(token)?;
    let header = jws::parse_protected(header_b64)?;
    let alg = jws::header_str(&header, "alg")?;
    if alg != GQ256 {
        return Err(Error::UnsupportedAlgorithm {
            alg: format!("expected GQ256 token, got {alg}"),
        });
    }
    let orig_header_b64 = jws::header_str(&header, "jwt")?;
    let orig_header = jws::parse_protected(orig_header_b64)?;
    if Algorithm::from_str(jws::header_str(&orig_header, "alg")?)? != Algorithm::Rs256 {
        return Err(Error::UnsupportedAlgorithm {
            alg: "original headers must declare RS256".to_string(),
        });
    }

    let (n, e, k) = rsa_modulus(public_key)?;
    let t = SECURITY_PARAMETER;
    let signature = jws::decode_segment(sig_b64)?;
    if signature.len() != 2 * t * k {
        return Err(Error::MalformedToken {
            reason: format!(
                "GQ256 signature must be {} bytes for this modulus, found {}",
                2 * t * k,
                signature.len()
            ),
        });
    }
    let (r_concat, s_concat) = signature.split_at(t * k);
    let r_vals = parse_elements(r_concat, k, &n)?;
    let s_vals = parse_elements(s_concat, k, &n)?;

    let mu_bytes = encoded_message(&jws::signing_input(orig_header_b64, payload_b64), k)?;
    let mu = BigUint::from_bytes_be(&mu_bytes);
    let nonce = jws::signing_input(header_b64, payload_b64);
    let digest = challenge(&to_fixed_bytes(&n, k), &mu_bytes, r_concat, &nonce);

    for j in 0..t {
        let lhs = s_vals[j].modpow(&e, &n);
        let rhs = if challenge_bit(&digest, j) {
            (&r_vals[j] * &mu) % &n
        } else {
            r_vals[j].clone()
        };
        if lhs != rhs {
            return Err(Error::SignatureInvalid { part: "op" });
        }
    }
    Ok(())
}

/// Returns the Base64URL-encoded original JWT headers preserved in a GQ
/// token's `jwt` member.
///
/// # Errors
/// [`Error::MalformedToken`] if the token is not a GQ256 token.
pub fn original_jwt_headers(token: &[u8]) -> Result<String> {
    let (header_b64, _, _) = jws::split_compact(token)?;
    let header = jws::parse_protected(header_b64)?;
    if jws::header_str(&header, "alg")? != GQ256 {
        return Err(Error::MalformedToken {
            reason: "token does not carry a GQ256 signature".to_string(),
        });
    }
    Ok(jws::header_str(&header, "jwt")?.to_string())
}

fn parse_elements(concat: &[u8], k: usize, n: &BigUint) -> Result<Vec<BigUint>> {
    concat
        .chunks_exact(k)
        .map(|chunk| {
            let value = BigUint::from_bytes_be(chunk);
            if &value >= n {
                return Err(Error::MalformedToken {
                    reason: "GQ element is not a residue mod N".to_string(),
                });
            }
            Ok(value)
        })
        .collect()
}
