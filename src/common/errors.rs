//! Common error types.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the OpenPubkey core.
///
/// Fatal signature and commitment failures bubble to the caller unchanged.
/// Key-discovery failures are distinguished so callers can decide whether a
/// retry makes sense, see [`Error::is_retryable`].
#[derive(Error, Debug)]
pub enum Error {
    /// A token or one of its segments could not be parsed.
    #[error("malformed token: {reason}")]
    MalformedToken {
        /// What failed to parse.
        reason: String,
    },

    /// An `alg` value this crate does not implement, or one that is not
    /// allowed in the current position (e.g. a non-GQ provider signature
    /// under `gq_only`).
    #[error("unsupported algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The offending algorithm name.
        alg: String,
    },

    /// A signature failed cryptographic verification.
    #[error("invalid {part} signature")]
    SignatureInvalid {
        /// Which of the PK Token parts (or derived messages) failed.
        part: &'static str,
    },

    /// The commitment carried by the ID Token does not equal the CIC hash.
    #[error("commitment claim doesn't match, got {got:?}, expected {expected:?}")]
    CommitmentMismatch {
        /// Commitment value found in the token.
        got: String,
        /// Commitment recomputed from the CIC.
        expected: String,
    },

    /// The audience claim does not satisfy the configured client ID.
    #[error("audience does not contain client id {client_id:?}, aud = {aud}")]
    AudienceMismatch {
        /// Client ID the verifier requires.
        client_id: String,
        /// Audience found in the token, rendered as JSON.
        aud: String,
    },

    /// The token's issuer differs from the verifier's issuer.
    #[error("issuer of PK Token ({got}) doesn't match expected issuer ({expected})")]
    IssuerMismatch {
        /// Issuer found in the token.
        got: String,
        /// Issuer the verifier is configured for.
        expected: String,
    },

    /// The token is expired, or issued too far in the future.
    #[error("token expired: {reason}")]
    Expired {
        /// Which temporal check failed.
        reason: String,
    },

    /// The provider's public key could not be obtained.
    #[error("provider key unavailable")]
    ProviderKeyUnavailable {
        /// Underlying discovery failure.
        #[source]
        source: DiscoveryError,
    },

    /// The cosigner rejected an operation because of session state.
    #[error("cosigner: {0}")]
    CosignerState(#[from] CosignerStateError),

    /// An invariant was violated or a dependency failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may retry the failed operation. Only transport
    /// failures during key discovery qualify; every other error is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderKeyUnavailable {
                source: DiscoveryError::Network { .. }
            }
        )
    }
}

/// Failures while locating a provider public key.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The discovery document or JWKS could not be fetched.
    #[error("network failure fetching keys for {issuer}")]
    Network {
        /// Issuer whose keys were requested.
        issuer: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The discovery document or JWKS did not parse.
    #[error("invalid key material from {issuer}: {reason}")]
    InvalidJwks {
        /// Issuer whose keys were requested.
        issuer: String,
        /// What failed to parse.
        reason: String,
    },

    /// The JWKS held no key matching the requested selector.
    #[error("no key matching {selector} found for {issuer}")]
    NoMatchingKey {
        /// Issuer whose keys were searched.
        issuer: String,
        /// The `kid`, thumbprint or token description used for the lookup.
        selector: String,
    },
}

/// Cosigner session-state failures.
///
/// Cryptographic failures during redemption are logged server-side and
/// deliberately flattened into [`CosignerStateError::InvalidRequest`] so the
/// endpoint cannot be used as a verification oracle.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CosignerStateError {
    /// The authcode is unknown, expired, or already used.
    #[error("invalid authcode")]
    InvalidAuthcode,

    /// The auth session id is unknown or expired.
    #[error("unknown auth session")]
    UnknownAuthId,

    /// The `InitMFAAuth` timestamp is outside the accepted window.
    #[error("auth message timestamp ({time_signed}) outside accepted window, now is {now}")]
    TimestampOutOfWindow {
        /// Timestamp the client signed.
        time_signed: i64,
        /// Cosigner's clock at the time of the check.
        now: i64,
    },

    /// A signature on the redeemed message was already issued.
    #[error("cosignature already issued for this session")]
    AlreadyIssued,

    /// Opaque rejection covering cryptographic failures.
    #[error("invalid request")]
    InvalidRequest,
}
