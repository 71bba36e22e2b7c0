//! # OpenPubkey
//!
//! A Rust implementation of the OpenPubkey protocol: augmenting OpenID
//! Connect by binding a user-held public key to an OIDC identity.
//!
//! The central artifact is the [PK Token](pktoken::PkToken), an envelope
//! carrying a provider-issued ID Token together with a client-held signature
//! over a commitment to the user's public key, and optionally a cosigner's
//! second-factor signature. The library implements:
//!
//!  - the PK Token envelope and its compact/JSON serializations
//!  - Guillou-Quisquater (GQ256) signatures of knowledge over RSA-signed
//!    JWTs, so the provider's signature can be hidden without breaking
//!    verification
//!  - provider-agnostic verification: audience, commitment binding, OIDC
//!    key discovery and composition of all three signatures
//!  - a cosigner service core that attaches the third signature after an
//!    out-of-band authentication step

#![warn(missing_docs)]
#![deny(unreachable_pub)]
#![deny(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cic;
pub mod client;
pub mod common;
pub mod cosigner;
pub mod discover;
pub mod gq;
pub mod jwk;
pub mod jws;
pub mod pktoken;
pub mod providers;
pub mod verifier;

pub use common::errors::{CosignerStateError, DiscoveryError, Error, Result};

/// Audience prefix that signals an ID Token was requested for use as a
/// PK Token with the commitment bound through the GQ signature. Verifiers
/// reject GQ-commitment tokens whose audience lacks this prefix, which
/// stops captured ID Tokens from being upgraded into PK Tokens.
pub const GQ_COMMITMENT_AUD_PREFIX: &str = "OPENPUBKEY-PKTOKEN:";

/// Signature algorithms understood by this crate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    Rs256,
    /// ECDSA over P-256 with SHA-256.
    Es256,
    /// Guillou-Quisquater signature of knowledge over an RS256 signature.
    Gq256,
}

impl Algorithm {
    /// The JOSE `alg` header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Rs256 => "RS256",
            Algorithm::Es256 => "ES256",
            Algorithm::Gq256 => "GQ256",
        }
    }

    /// Parses a JOSE `alg` header value.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedAlgorithm`] for any algorithm this crate
    /// does not implement.
    pub fn from_str(alg: &str) -> Result<Self> {
        match alg {
            "RS256" => Ok(Algorithm::Rs256),
            "ES256" => Ok(Algorithm::Es256),
            "GQ256" => Ok(Algorithm::Gq256),
            other => Err(Error::UnsupportedAlgorithm {
                alg: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
