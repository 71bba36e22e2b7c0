//! The GQ transform: turning an RS256-signed JWT into a GQ256 token.

use num_bigint_dig::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::jws::{self, ProtectedHeader};
use crate::{Algorithm, Error, Result};

use super::{
    challenge, challenge_bit, encoded_message, is_coprime, rsa_modulus, to_fixed_bytes, GQ256,
    SECURITY_PARAMETER,
};

/// Replaces the RS256 signature of `jwt` with a GQ256 proof of knowledge
/// under the issuing provider's public key.
///
/// The returned compact JWS keeps the original payload segment, carries the
/// original protected header under the `jwt` member of its new header, and
/// optionally binds `commitment` into the proof under the `cic` member
/// (GQ-commitment mode). Two transforms of the same token differ: the round
/// witnesses are drawn fresh from `Z_N*`.
///
/// # Errors
/// Fails with [`Error::UnsupportedAlgorithm`] if the token is not RS256 and
/// [`Error::MalformedToken`] if the signature does not match the modulus
/// size.
pub fn sign_jwt(
    public_key: &RsaPublicKey,
    jwt: &[u8],
    commitment: Option<&str>,
) -> Result<Vec<u8>> {
    let (orig_header_b64, payload_b64, sig_b64) = jws::split_compact(jwt)?;
    let orig_header = jws::parse_protected(orig_header_b64)?;
    let alg = Algorithm::from_str(jws::header_str(&orig_header, "alg")?)?;
    if alg != Algorithm::Rs256 {
        return Err(Error::UnsupportedAlgorithm {
            alg: format!("GQ transform requires an RS256 token, got {alg}"),
        });
    }

    let (n, e, k) = rsa_modulus(public_key)?;
    let sigma_bytes = Zeroizing::new(jws::decode_segment(sig_b64)?);
    if sigma_bytes.len() != k {
        return Err(Error::MalformedToken {
            reason: format!(
                "RSA signature must be {k} bytes, found {}",
                sigma_bytes.len()
            ),
        });
    }
    let sigma = Zeroizing::new(BigUint::from_bytes_be(&sigma_bytes));
    if *sigma >= n {
        return Err(Error::MalformedToken {
            reason: "RSA signature is not a residue mod N".to_string(),
        });
    }

    let mut new_header = ProtectedHeader::new();
    new_header.insert("alg".to_string(), Value::from(GQ256));
    new_header.insert("typ".to_string(), Value::from("JWT"));
    new_header.insert("jwt".to_string(), Value::from(orig_header_b64));
    if let Some(commitment) = commitment {
        new_header.insert("cic".to_string(), Value::from(commitment));
    }
    let new_header_b64 = jws::encode_protected(&new_header)?;

    let mu_bytes = encoded_message(&jws::signing_input(orig_header_b64, payload_b64), k)?;
    // The GQ signing input doubles as the challenge nonce, binding the new
    // header (including `jwt` and `cic`) into the proof.
    let nonce = jws::signing_input(&new_header_b64, payload_b64);

    let t = SECURITY_PARAMETER;
    let mut rng = OsRng;
    let one = BigUint::from(1u8);
    let mut witnesses: Zeroizing<Vec<BigUint>> = Zeroizing::new(Vec::with_capacity(t));
    let mut r_concat = Vec::with_capacity(t * k);
    for _ in 0..t {
        let r_j = loop {
            let candidate = rng.gen_biguint_range(&one, &n);
            if is_coprime(&candidate, &n) {
                break candidate;
            }
        };
        let commitment_j = r_j.modpow(&e, &n);
        r_concat.extend_from_slice(&to_fixed_bytes(&commitment_j, k));
        witnesses.push(r_j);
    }

    let digest = challenge(&to_fixed_bytes(&n, k), &mu_bytes, &r_concat, &nonce);

    let mut signature = r_concat;
    signature.reserve(t * k);
    for (j, r_j) in witnesses.iter().enumerate() {
        let s_j = if challenge_bit(&digest, j) {
            (r_j * &*sigma) % &n
        } else {
            r_j.clone()
        };
        signature.extend_from_slice(&to_fixed_bytes(&s_j, k));
    }

    let sig_b64 = jws::encode_segment(&signature);
    Ok(jws::join_compact(&new_header_b64, payload_b64, &sig_b64))
}
