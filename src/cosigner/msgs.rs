//! Messages exchanged with the cosigner. Every message travels as the
//! payload of a JWS signed under the PK Token's user key.

use serde::{Deserialize, Serialize};

/// Opens a cosigner auth session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitMfaAuth {
    /// Where the cosigner redirects once the second factor completes.
    pub redirect_uri: String,
    /// When the client signed this message, unix seconds. The cosigner
    /// rejects messages more than two minutes old or in the future.
    pub time_signed: i64,
    /// Client-chosen nonce, echoed in the cosigner claims.
    pub nonce: String,
}
