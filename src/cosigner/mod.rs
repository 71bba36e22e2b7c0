//! Cosigner core: a stateful second-factor signer that attaches a third
//! signature to a verified PK Token.
//!
//! Sessions move `init_auth -> new_authcode -> redeem`; a session that is
//! not redeemed within the auth window expires. Auth ids are minted with
//! HMAC-SHA3-256 over a monotonic counter and the clock, so they are
//! unpredictable to outside observers. Authcodes are single-use.

pub mod msgs;
pub mod web;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha3::Sha3_256;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::common::now_unix;
use crate::jwk::Jwk;
use crate::jws::{self, signer::JwsSigner};
use crate::pktoken::{CosignerClaims, PkToken};
use crate::verifier::ProviderVerifier;
use crate::{CosignerStateError, Error, Result};

use msgs::InitMfaAuth;

/// How long an auth session stays redeemable, and how far an
/// `InitMFAAuth` timestamp may deviate from the cosigner's clock.
pub const AUTH_WINDOW_SECS: i64 = 2 * 60;

/// Lifetime of an issued cosignature.
const COSIGNATURE_LIFETIME_SECS: i64 = 60 * 60;

type HmacSha3 = Hmac<Sha3_256>;

/// Per-session state held between `init_auth` and `redeem`.
#[derive(Clone, Debug)]
struct AuthState {
    pkt: PkToken,
    redirect_uri: String,
    nonce: String,
    sig_issued: bool,
    created_at: DateTime<Utc>,
}

impl AuthState {
    fn new(pkt: PkToken, redirect_uri: String, nonce: String) -> Self {
        AuthState {
            pkt,
            redirect_uri,
            nonce,
            sig_issued: false,
            created_at: Utc::now(),
        }
    }

    fn expired(&self) -> bool {
        (Utc::now() - self.created_at).num_seconds() > AUTH_WINDOW_SECS
    }
}

#[derive(Default)]
struct Sessions {
    auth_states: HashMap<String, AuthState>,
    auth_codes: HashMap<String, String>,
}

/// The cosigner service. One instance owns the cosigning key and the
/// session maps; handlers share it behind an [`Arc`].
pub struct AuthCosigner {
    signer: JwsSigner,
    issuer: String,
    key_id: String,
    verifier: ProviderVerifier,
    hmac_key: Zeroizing<[u8; 64]>,
    auth_id_iter: AtomicU64,
    sessions: Mutex<Sessions>,
}

impl std::fmt::Debug for AuthCosigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCosigner")
            .field("issuer", &self.issuer)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl AuthCosigner {
    /// Creates a cosigner that signs with `signer` and accepts PK Tokens
    /// that `verifier` accepts. The auth-id HMAC key is drawn fresh.
    pub fn new(
        signer: JwsSigner,
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        verifier: ProviderVerifier,
    ) -> Self {
        let mut hmac_key = Zeroizing::new([0u8; 64]);
        rand::rngs::OsRng.fill_bytes(&mut *hmac_key);
        AuthCosigner {
            signer,
            issuer: issuer.into(),
            key_id: key_id.into(),
            verifier,
            hmac_key,
            auth_id_iter: AtomicU64::new(0),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// The cosigner's issuer URI, as written into cosigner claims.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The public half of the cosigning key, for verifiers.
    pub fn public_jwk(&self) -> Jwk {
        self.signer.public_jwk()
    }

    /// Opens an auth session. `signed_msg` is a JWS over an
    /// [`InitMfaAuth`] message, signed under `pkt`'s user key.
    ///
    /// # Errors
    /// Fails if `pkt` does not verify, the message signature is invalid, or
    /// `time_signed` deviates more than [`AUTH_WINDOW_SECS`] from now in
    /// either direction.
    pub async fn init_auth(&self, pkt: &PkToken, signed_msg: &[u8]) -> Result<String> {
        self.verifier.verify(pkt).await?;
        let msg = pkt.verify_signed_message(signed_msg).map_err(|err| {
            log::warn!("init_auth message rejected: {err}");
            Error::CosignerState(CosignerStateError::InvalidRequest)
        })?;
        let init: InitMfaAuth =
            serde_json::from_slice(&msg).map_err(|err| Error::MalformedToken {
                reason: format!("InitMFAAuth message: {err}"),
            })?;
        let now = now_unix();
        if (now - init.time_signed).abs() > AUTH_WINDOW_SECS {
            return Err(CosignerStateError::TimestampOutOfWindow {
                time_signed: init.time_signed,
                now,
            }
            .into());
        }

        let auth_id = self.create_auth_id();
        let state = AuthState::new(pkt.clone(), init.redirect_uri, init.nonce);
        self.sessions
            .lock()
            .await
            .auth_states
            .insert(auth_id.clone(), state);
        Ok(auth_id)
    }

    /// Issues a one-time authcode for an open session, to be handed to the
    /// client through the redirect leg.
    ///
    /// # Errors
    /// Fails for unknown or expired sessions and for sessions already
    /// holding a cosignature.
    pub async fn new_authcode(&self, auth_id: &str) -> Result<String> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .auth_states
            .get(auth_id)
            .ok_or(CosignerStateError::UnknownAuthId)?;
        if state.expired() {
            return Err(CosignerStateError::UnknownAuthId.into());
        }
        if state.sig_issued {
            return Err(CosignerStateError::AlreadyIssued.into());
        }
        let mut code = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut code);
        let authcode = hex::encode(code);
        sessions
            .auth_codes
            .insert(authcode.clone(), auth_id.to_string());
        Ok(authcode)
    }

    /// The redirect URI registered for a session.
    ///
    /// # Errors
    /// Fails for unknown sessions.
    pub async fn redirect_uri(&self, auth_id: &str) -> Result<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .auth_states
            .get(auth_id)
            .map(|state| state.redirect_uri.clone())
            .ok_or_else(|| CosignerStateError::UnknownAuthId.into())
    }

    /// Redeems an authcode: `signed_authcode` is a JWS whose payload is the
    /// authcode, signed under the session PK Token's user key. On success
    /// the authcode is consumed and the cosigned PK Token returned.
    ///
    /// # Errors
    /// Unknown, expired or reused authcodes fail with
    /// [`CosignerStateError::InvalidAuthcode`]; signature failures are
    /// logged and surfaced as [`CosignerStateError::InvalidRequest`].
    pub async fn redeem(&self, signed_authcode: &[u8]) -> Result<PkToken> {
        let (_, payload_b64, _) = jws::split_compact(signed_authcode)?;
        let authcode = String::from_utf8(jws::decode_segment(payload_b64)?).map_err(|_| {
            Error::MalformedToken {
                reason: "authcode payload is not UTF-8".to_string(),
            }
        })?;

        let mut sessions = self.sessions.lock().await;
        // Single use: the code is gone whether or not redemption succeeds.
        let auth_id = sessions
            .auth_codes
            .remove(&authcode)
            .ok_or(CosignerStateError::InvalidAuthcode)?;
        let state = sessions
            .auth_states
            .get_mut(&auth_id)
            .ok_or(CosignerStateError::UnknownAuthId)?;
        if state.expired() {
            return Err(CosignerStateError::UnknownAuthId.into());
        }
        if state.sig_issued {
            return Err(CosignerStateError::AlreadyIssued.into());
        }
        state.pkt.verify_signed_message(signed_authcode).map_err(|err| {
            log::warn!("authcode signature rejected for session {auth_id}: {err}");
            Error::CosignerState(CosignerStateError::InvalidRequest)
        })?;

        let cosigned = self.issue_signature(&auth_id, state)?;
        Ok(cosigned)
    }

    /// `hex(HMAC-SHA3-256(secret, counter || unix_time))`: unique per call
    /// and unpredictable without the HMAC key.
    fn create_auth_id(&self) -> String {
        let counter = self.auth_id_iter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut input = [0u8; 16];
        input[..8].copy_from_slice(&counter.to_le_bytes());
        input[8..].copy_from_slice(&(now_unix() as u64).to_le_bytes());
        let mut mac = HmacSha3::new_from_slice(&*self.hmac_key)
            .expect("HMAC accepts any key length");
        mac.update(&input);
        hex::encode(mac.finalize().into_bytes())
    }

    fn issue_signature(&self, auth_id: &str, state: &mut AuthState) -> Result<PkToken> {
        let now = now_unix();
        let claims = CosignerClaims {
            iss: self.issuer.clone(),
            kid: self.key_id.clone(),
            alg: self.signer.algorithm().as_str().to_string(),
            auth_id: auth_id.to_string(),
            auth_time: now,
            iat: now,
            exp: now + COSIGNATURE_LIFETIME_SECS,
            ruri: state.redirect_uri.clone(),
            nonce: state.nonce.clone(),
        };
        let mut header = match serde_json::to_value(&claims) {
            Ok(Value::Object(map)) => map,
            _ => return Err(Error::Internal("cosigner claims serialization".to_string())),
        };
        header.insert("typ".to_string(), Value::from("COS"));
        let header_b64 = jws::encode_protected(&header)?;
        let payload_b64 = state.pkt.payload_b64().to_string();
        let signature = self
            .signer
            .sign(&jws::signing_input(&header_b64, &payload_b64))?;
        let cos_token =
            jws::join_compact(&header_b64, &payload_b64, &jws::encode_segment(&signature));

        let mut cosigned = state.pkt.clone();
        cosigned.add_cosignature(&cos_token)?;
        state.sig_issued = true;
        Ok(cosigned)
    }

    /// Drops expired sessions and their outstanding authcodes. Returns how
    /// many sessions were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.auth_states.len();
        sessions.auth_states.retain(|_, state| !state.expired());
        let live: std::collections::HashSet<String> =
            sessions.auth_states.keys().cloned().collect();
        sessions.auth_codes.retain(|_, auth_id| live.contains(auth_id));
        before - sessions.auth_states.len()
    }
}

/// Spawns a background task sweeping expired cosigner sessions at `period`.
pub fn spawn_sweeper(
    cosigner: Arc<AuthCosigner>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = cosigner.sweep_expired().await;
            if removed > 0 {
                log::debug!("swept {removed} expired cosigner sessions");
            }
        }
    })
}
