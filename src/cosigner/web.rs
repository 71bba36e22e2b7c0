//! HTTP wire for the cosigner: `POST /mfa-auth-init`,
//! `GET /mfa-auth-redirect` and `POST /sign`.
//!
//! Handlers are thin adapters over [`AuthCosigner`]; request and response
//! bodies are JSON envelopes around compact JWSs. The out-of-band second
//! factor itself happens outside this crate, between init and redirect.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::pktoken::PkToken;
use crate::Error;

use super::AuthCosigner;

/// Body of `POST /mfa-auth-init`.
#[derive(Debug, Deserialize)]
pub struct InitAuthRequest {
    /// The PK Token to cosign.
    pub pkt: PkToken,
    /// Compact JWS over an `InitMFAAuth` message, signed by the user key.
    pub sig: String,
}

/// Body of the `POST /mfa-auth-init` response.
#[derive(Debug, Serialize)]
pub struct InitAuthResponse {
    /// Session id for the redirect leg.
    pub auth_id: String,
}

/// Query of `GET /mfa-auth-redirect`.
#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    /// Session id returned by `/mfa-auth-init`.
    pub auth_id: String,
}

/// Body of `POST /sign`.
#[derive(Debug, Deserialize)]
pub struct SignRequest {
    /// Compact JWS whose payload is the authcode, signed by the user key.
    pub sig: String,
}

/// Body of the `POST /sign` response.
#[derive(Debug, Serialize)]
pub struct SignResponse {
    /// The cosigned PK Token.
    pub pkt: PkToken,
}

/// Builds the cosigner router.
pub fn router(cosigner: Arc<AuthCosigner>) -> Router {
    Router::new()
        .route("/mfa-auth-init", post(init_auth))
        .route("/mfa-auth-redirect", get(auth_redirect))
        .route("/sign", post(sign))
        .with_state(cosigner)
}

async fn init_auth(
    State(cosigner): State<Arc<AuthCosigner>>,
    Json(request): Json<InitAuthRequest>,
) -> Response {
    match cosigner.init_auth(&request.pkt, request.sig.as_bytes()).await {
        Ok(auth_id) => Json(InitAuthResponse { auth_id }).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn auth_redirect(
    State(cosigner): State<Arc<AuthCosigner>>,
    Query(params): Query<RedirectParams>,
) -> Response {
    let redirect_uri = match cosigner.redirect_uri(&params.auth_id).await {
        Ok(uri) => uri,
        Err(err) => return error_response(&err),
    };
    match cosigner.new_authcode(&params.auth_id).await {
        Ok(authcode) => {
            let separator = if redirect_uri.contains('?') { '&' } else { '?' };
            Redirect::to(&format!("{redirect_uri}{separator}authcode={authcode}"))
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn sign(
    State(cosigner): State<Arc<AuthCosigner>>,
    Json(request): Json<SignRequest>,
) -> Response {
    match cosigner.redeem(request.sig.as_bytes()).await {
        Ok(pkt) => Json(SignResponse { pkt }).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::CosignerState(_) => StatusCode::FORBIDDEN,
        Error::MalformedToken { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}
