use std::sync::Arc;

use serde_json::Value;

use openpubkey::cic::Claims;
use openpubkey::client::OpkClient;
use openpubkey::gq;
use openpubkey::jws::{self, signer::JwsSigner, ProtectedHeader};
use openpubkey::pktoken::{PkToken, ProviderSignatureType};
use openpubkey::providers::mock::{MockOp, MockOpOptions};
use openpubkey::providers::OpenIdProvider;
use openpubkey::verifier::{ProviderVerifier, ProviderVerifierOpts};
use openpubkey::Error;

fn plain_id_token(op: &MockOp) -> Vec<u8> {
    op.issue_id_token(&op.default_claims()).unwrap()
}

#[test]
fn gq_transform_roundtrips() {
    let op = MockOp::new().unwrap();
    let id_token = plain_id_token(&op);
    let gq_token = gq::sign_jwt(&op.public_key(), &id_token, None).unwrap();
    gq::verify_jwt(&op.public_key(), &gq_token).unwrap();

    // The original headers survive inside the GQ header.
    let (orig_header_b64, _, _) = jws::split_compact(&id_token).unwrap();
    assert_eq!(
        gq::original_jwt_headers(&gq_token).unwrap(),
        orig_header_b64
    );
}

#[test]
fn gq_signature_has_the_expected_geometry() {
    let op = MockOp::new().unwrap();
    let gq_token = gq::sign_jwt(&op.public_key(), &plain_id_token(&op), None).unwrap();
    let (_, _, sig_b64) = jws::split_compact(&gq_token).unwrap();
    let signature = jws::decode_segment(sig_b64).unwrap();
    // t rounds, each contributing a 256-byte R_j and a 256-byte S_j for a
    // 2048-bit modulus.
    assert_eq!(signature.len(), 2 * gq::SECURITY_PARAMETER * 256);
}

#[test]
fn tampering_breaks_gq_verification() {
    let op = MockOp::new().unwrap();
    let id_token = plain_id_token(&op);
    let gq_token = gq::sign_jwt(&op.public_key(), &id_token, None).unwrap();

    // Flip one byte of the payload.
    let (header_b64, payload_b64, sig_b64) = jws::split_compact(&gq_token).unwrap();
    let mut payload = jws::decode_segment(payload_b64).unwrap();
    payload[0] ^= 0x01;
    let tampered = jws::join_compact(header_b64, &jws::encode_segment(&payload), sig_b64);
    assert!(gq::verify_jwt(&op.public_key(), &tampered).is_err());

    // Flip one byte of R.
    let mut signature = jws::decode_segment(sig_b64).unwrap();
    signature[10] ^= 0x01;
    let tampered = jws::join_compact(header_b64, payload_b64, &jws::encode_segment(&signature));
    assert!(gq::verify_jwt(&op.public_key(), &tampered).is_err());

    // Flip one byte of S.
    let mut signature = jws::decode_segment(sig_b64).unwrap();
    let s_offset = signature.len() / 2 + 10;
    signature[s_offset] ^= 0x01;
    let tampered = jws::join_compact(header_b64, payload_b64, &jws::encode_segment(&signature));
    assert!(gq::verify_jwt(&op.public_key(), &tampered).is_err());
}

#[test]
fn fresh_witnesses_hide_the_provider_signature() {
    let op = MockOp::new().unwrap();
    let id_token = plain_id_token(&op);
    let first = gq::sign_jwt(&op.public_key(), &id_token, None).unwrap();
    let second = gq::sign_jwt(&op.public_key(), &id_token, None).unwrap();
    let (_, _, first_sig) = jws::split_compact(&first).unwrap();
    let (_, _, second_sig) = jws::split_compact(&second).unwrap();
    assert_ne!(first_sig, second_sig);
}

#[test]
fn non_rs256_tokens_cannot_be_transformed() {
    let op = MockOp::new().unwrap();
    let signer = JwsSigner::generate_es256();
    let mut header = ProtectedHeader::new();
    header.insert("alg".to_string(), Value::from("ES256"));
    let header_b64 = jws::encode_protected(&header).unwrap();
    let payload_b64 = jws::encode_segment(br#"{"iss":"x"}"#);
    let sig = signer
        .sign(&jws::signing_input(&header_b64, &payload_b64))
        .unwrap();
    let token = jws::join_compact(&header_b64, &payload_b64, &jws::encode_segment(&sig));
    assert!(matches!(
        gq::sign_jwt(&op.public_key(), &token, None),
        Err(Error::UnsupportedAlgorithm { .. })
    ));
}

#[tokio::test]
async fn gq_happy_path_end_to_end() {
    let op = Arc::new(
        MockOp::with_options(MockOpOptions {
            client_id: "verifier".to_string(),
            sign_gq: true,
            ..MockOpOptions::default()
        })
        .unwrap(),
    );
    let client = OpkClient::new(Arc::clone(&op) as Arc<dyn OpenIdProvider>, JwsSigner::generate_es256());
    let pkt = client.oidc_auth(ProtectedHeader::new()).await.unwrap();
    assert_eq!(
        pkt.provider_signature_type().unwrap(),
        ProviderSignatureType::Gq
    );

    let verifier = ProviderVerifier::new(
        op.issuer(),
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            gq_only: true,
            discover_public_key: Some(op.public_key_finder()),
            ..ProviderVerifierOpts::default()
        },
    );
    verifier.verify(&pkt).await.unwrap();

    let signature = jws::decode_segment(pkt.op().signature_b64()).unwrap();
    assert_eq!(signature.len(), 2 * gq::SECURITY_PARAMETER * 256);
}

#[tokio::test]
async fn upgrading_an_issued_pk_token_to_gq() {
    let op = Arc::new(
        MockOp::with_options(MockOpOptions {
            client_id: "verifier".to_string(),
            ..MockOpOptions::default()
        })
        .unwrap(),
    );
    let client = OpkClient::new(Arc::clone(&op) as Arc<dyn OpenIdProvider>, JwsSigner::generate_es256());
    let pkt = client.oidc_auth(ProtectedHeader::new()).await.unwrap();

    let upgraded = openpubkey::pktoken::upgrade_to_gq(&pkt, &op.public_key()).unwrap();
    assert_eq!(
        upgraded.provider_signature_type().unwrap(),
        ProviderSignatureType::Gq
    );
    // Same payload, same CIC; only the provider part changed.
    assert_eq!(upgraded.payload_b64(), pkt.payload_b64());
    assert_eq!(
        upgraded.cic_values().unwrap().hash().unwrap(),
        pkt.cic_values().unwrap().hash().unwrap()
    );

    let verifier = ProviderVerifier::new(
        op.issuer(),
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            gq_only: true,
            discover_public_key: Some(op.public_key_finder()),
            ..ProviderVerifierOpts::default()
        },
    );
    verifier.verify(&upgraded).await.unwrap();
}

#[tokio::test]
async fn gq_commitment_mode_end_to_end() {
    let op = Arc::new(
        MockOp::with_options(MockOpOptions {
            gq_commitment: true,
            ..MockOpOptions::default()
        })
        .unwrap(),
    );
    let client = OpkClient::new(Arc::clone(&op) as Arc<dyn OpenIdProvider>, JwsSigner::generate_es256());
    let pkt = client.oidc_auth(ProtectedHeader::new()).await.unwrap();

    // The commitment rides in the GQ protected header.
    let commitment = pkt.cic_values().unwrap().hash().unwrap();
    assert_eq!(
        pkt.op().protected_header().unwrap().get("cic").unwrap(),
        &Value::from(commitment)
    );
    op.verifier().verify(&pkt).await.unwrap();
}

#[tokio::test]
async fn captured_tokens_cannot_be_upgraded_into_gq_commitment_tokens() {
    // An ordinary ID Token, audience never opted into PK Token use.
    let op = Arc::new(MockOp::new().unwrap());
    let signer = JwsSigner::generate_es256();
    let cic = Claims::new(&signer.public_jwk(), ProtectedHeader::new()).unwrap();

    let captured = plain_id_token(&op);
    let bound =
        gq::sign_jwt(&op.public_key(), &captured, Some(&cic.hash().unwrap())).unwrap();
    let (_, payload_b64, _) = jws::split_compact(&bound).unwrap();
    let cic_token = cic.sign(&signer, payload_b64).unwrap();
    let pkt = PkToken::new(&bound, &cic_token).unwrap();

    let verifier = ProviderVerifier::new(
        op.issuer(),
        "",
        ProviderVerifierOpts {
            skip_client_id_check: true,
            gq_only: true,
            gq_commitment: true,
            discover_public_key: Some(op.public_key_finder()),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::AudienceMismatch { .. }), "{err}");
}

#[tokio::test]
async fn gq_commitment_requires_consistent_configuration() {
    let op = Arc::new(MockOp::new().unwrap());
    let client = OpkClient::new(Arc::clone(&op) as Arc<dyn OpenIdProvider>, JwsSigner::generate_es256());
    let pkt = client.oidc_auth(ProtectedHeader::new()).await.unwrap();

    // gq_commitment without gq_only is a configuration error.
    let verifier = ProviderVerifier::new(
        op.issuer(),
        "",
        ProviderVerifierOpts {
            skip_client_id_check: true,
            gq_commitment: true,
            discover_public_key: Some(op.public_key_finder()),
            ..ProviderVerifierOpts::default()
        },
    );
    assert!(matches!(
        verifier.verify(&pkt).await,
        Err(Error::Internal(_))
    ));
}
