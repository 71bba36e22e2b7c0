//! Guillou-Quisquater (GQ256) signatures of knowledge over RSA-signed JWTs.
//!
//! Given an ID Token carrying an RS256 signature `sigma`, [`sign_jwt`]
//! replaces that signature with a proof of knowledge of `sigma`: the
//! provider's signature itself is never disclosed, yet the token remains
//! verifiable against the provider's public key via [`verify_jwt`]. The
//! original protected header is preserved inside the new header under the
//! `jwt` member so verifiers can reconstruct the original signing input.
//!
//! The proof runs `t = 256` parallel rounds with binary challenges derived
//! by Fiat-Shamir from the modulus, the PKCS#1 v1.5 encoded message, the
//! round commitments, and the GQ signing input. Each round contributes one
//! modulus-sized element to `R` and one to `S`; the JWS signature segment is
//! `Base64URL(R || S)`.

mod sign;
mod verify;

pub use sign::sign_jwt;
pub use verify::{original_jwt_headers, verify_jwt};

use num_bigint_dig::BigUint;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// The `alg` header value of a GQ-transformed token.
pub const GQ256: &str = "GQ256";

/// Statistical security parameter: the number of binary challenge rounds.
pub const SECURITY_PARAMETER: usize = 256;

/// DER prefix of the SHA-256 DigestInfo used by EMSA-PKCS1-v1_5.
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

/// Extracts `(N, e, k)` from an RSA public key, where `k` is the modulus
/// length in bytes. Moduli of 2048, 3072 and 4096 bits are accepted.
pub(crate) fn rsa_modulus(public_key: &RsaPublicKey) -> Result<(BigUint, BigUint, usize)> {
    let n = public_key.n().clone();
    let e = public_key.e().clone();
    let bits = n.bits();
    if !(2048..=4096).contains(&bits) {
        return Err(Error::UnsupportedAlgorithm {
            alg: format!("GQ256 requires a 2048..4096-bit RSA modulus, got {bits}"),
        });
    }
    let k = (bits + 7) / 8;
    Ok((n, e, k))
}

/// EMSA-PKCS1-v1_5 encoding of `message` under SHA-256 for a `k`-byte
/// modulus: the integer `mu(m)` that RSA verification exponentiates to.
pub(crate) fn encoded_message(message: &[u8], k: usize) -> Result<Vec<u8>> {
    let digest = Sha256::digest(message);
    let t_len = SHA256_DIGEST_INFO.len() + digest.len();
    if k < t_len + 11 {
        return Err(Error::Internal(format!(
            "modulus too small for PKCS#1 v1.5 encoding ({k} bytes)"
        )));
    }
    let mut em = vec![0xff; k];
    em[0] = 0x00;
    em[1] = 0x01;
    em[k - t_len - 1] = 0x00;
    em[k - t_len..k - digest.len()].copy_from_slice(&SHA256_DIGEST_INFO);
    em[k - digest.len()..].copy_from_slice(&digest);
    Ok(em)
}

/// Fiat-Shamir challenge: `SHA-256(N || mu || R_0..R_{t-1} || nonce)`,
/// read as a string of `t = 256` bits.
pub(crate) fn challenge(n: &[u8], mu: &[u8], r_concat: &[u8], nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(n);
    hasher.update(mu);
    hasher.update(r_concat);
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Bit `j` of the challenge, most-significant bit of each byte first.
pub(crate) fn challenge_bit(digest: &[u8; 32], j: usize) -> bool {
    (digest[j / 8] >> (7 - (j % 8))) & 1 == 1
}

/// Big-endian encoding of `x` left-padded to exactly `k` bytes. Requires
/// `x < 2^(8k)`, which holds for all residues mod a `k`-byte modulus.
pub(crate) fn to_fixed_bytes(x: &BigUint, k: usize) -> Vec<u8> {
    let bytes = x.to_bytes_be();
    let mut out = vec![0u8; k];
    out[k - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Euclidean coprimality test against the modulus; non-invertible samples
/// are rejected during signing.
pub(crate) fn is_coprime(a: &BigUint, n: &BigUint) -> bool {
    let one = BigUint::from(1u8);
    let zero = BigUint::from(0u8);
    let mut x = a.clone();
    let mut y = n.clone();
    while y != zero {
        let r = &x % &y;
        x = y;
        y = r;
    }
    x == one
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_message_has_pkcs1_v15_shape() {
        let em = encoded_message(b"some signing input", 256).unwrap();
        assert_eq!(em.len(), 256);
        assert_eq!(em[0], 0x00);
        assert_eq!(em[1], 0x01);
        assert_eq!(em[256 - 51 - 1], 0x00);
        assert!(em[2..256 - 52].iter().all(|&b| b == 0xff));
        assert_eq!(&em[256 - 51..256 - 32], &SHA256_DIGEST_INFO);
    }

    #[test]
    fn challenge_bits_cover_all_rounds() {
        let digest = challenge(b"n", b"mu", b"r", b"nonce");
        let ones = (0..SECURITY_PARAMETER)
            .filter(|&j| challenge_bit(&digest, j))
            .count();
        let zeros = SECURITY_PARAMETER - ones;
        // SHA-256 output; both bit values appear.
        assert!(ones > 0 && zeros > 0);
        assert_eq!(challenge_bit(&digest, 0), digest[0] & 0x80 != 0);
    }

    #[test]
    fn fixed_bytes_left_pads() {
        let x = BigUint::from(0x0102u16);
        assert_eq!(to_fixed_bytes(&x, 4), vec![0, 0, 1, 2]);
    }

    #[test]
    fn coprimality() {
        let n = BigUint::from(15u8);
        assert!(is_coprime(&BigUint::from(4u8), &n));
        assert!(!is_coprime(&BigUint::from(6u8), &n));
    }
}
