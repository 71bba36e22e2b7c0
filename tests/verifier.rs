use std::sync::Arc;

use serde_json::Value;

use openpubkey::cic::Claims;
use openpubkey::client::OpkClient;
use openpubkey::jws::{self, signer::JwsSigner, ProtectedHeader};
use openpubkey::pktoken::PkToken;
use openpubkey::providers::mock::{MockOp, MockOpOptions};
use openpubkey::providers::OpenIdProvider;
use openpubkey::verifier::{ProviderVerifier, ProviderVerifierOpts};
use openpubkey::Error;

fn mock_op(client_id: &str) -> Arc<MockOp> {
    Arc::new(
        MockOp::with_options(MockOpOptions {
            client_id: client_id.to_string(),
            ..MockOpOptions::default()
        })
        .unwrap(),
    )
}

async fn issue(op: &Arc<MockOp>) -> PkToken {
    let client = OpkClient::new(Arc::clone(op) as Arc<dyn OpenIdProvider>, JwsSigner::generate_es256());
    client.oidc_auth(ProtectedHeader::new()).await.unwrap()
}

fn verifier_for(op: &Arc<MockOp>, commitment_claim: &str, opts: ProviderVerifierOpts) -> ProviderVerifier {
    let opts = ProviderVerifierOpts {
        discover_public_key: Some(op.public_key_finder()),
        ..opts
    };
    ProviderVerifier::new(op.issuer(), commitment_claim, opts)
}

// Assembles a PK Token from an ID Token the test controls and a CIC the
// test controls; the two need not be bound to each other.
fn assemble(op: &MockOp, signer: &JwsSigner, cic: &Claims, claims: &ProtectedHeader) -> PkToken {
    let id_token = op.issue_id_token(claims).unwrap();
    let (_, payload_b64, _) = jws::split_compact(&id_token).unwrap();
    let cic_token = cic.sign(signer, payload_b64).unwrap();
    PkToken::new(&id_token, &cic_token).unwrap()
}

#[tokio::test]
async fn happy_path_rs256() {
    let op = mock_op("verifier");
    let pkt = issue(&op).await;
    let verifier = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    verifier.verify(&pkt).await.unwrap();
}

#[tokio::test]
async fn wrong_issuer_is_rejected() {
    let op = mock_op("verifier");
    let pkt = issue(&op).await;
    let verifier = ProviderVerifier::new(
        "https://evil.com/",
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            discover_public_key: Some(op.public_key_finder()),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::IssuerMismatch { .. }), "{err}");
}

#[tokio::test]
async fn wrong_commitment_claim_is_rejected() {
    let op = mock_op("verifier");
    let pkt = issue(&op).await;
    let verifier = verifier_for(
        &op,
        "evil",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::CommitmentMismatch { .. }), "{err}");
}

#[tokio::test]
async fn list_audience_follows_the_contains_rule() {
    let op = mock_op("verifier");
    let signer = JwsSigner::generate_es256();
    let cic = Claims::new(&signer.public_jwk(), ProtectedHeader::new()).unwrap();

    let mut claims = op.default_claims();
    claims.insert(
        "aud".to_string(),
        Value::from(vec!["verifier".to_string(), "other".to_string()]),
    );
    claims.insert("nonce".to_string(), Value::from(cic.hash().unwrap()));
    let pkt = assemble(&op, &signer, &cic, &claims);

    let accept = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    accept.verify(&pkt).await.unwrap();

    let reject = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "super_evil".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = reject.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::AudienceMismatch { .. }), "{err}");

    // A join of the members is not a valid audience either.
    let joined = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier,other".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    assert!(joined.verify(&pkt).await.is_err());
}

#[tokio::test]
async fn gq_only_rejects_plain_rs256() {
    let op = mock_op("verifier");
    let pkt = issue(&op).await;
    let verifier = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            gq_only: true,
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlgorithm { .. }), "{err}");
}

#[tokio::test]
async fn corrupted_provider_signature_fails_before_commitment() {
    let op = mock_op("verifier");
    let pkt = issue(&op).await;

    // Flip one byte of the provider signature, leave the commitment alone.
    let mut json: serde_json::Map<String, Value> =
        serde_json::from_slice(&pkt.to_json().unwrap()).unwrap();
    let sig_b64 = json["op_signature"].as_str().unwrap();
    let mut sig = jws::decode_segment(sig_b64).unwrap();
    sig[0] ^= 0x01;
    json.insert(
        "op_signature".to_string(),
        Value::from(jws::encode_segment(&sig)),
    );
    let corrupted = PkToken::from_json(&serde_json::to_vec(&json).unwrap()).unwrap();

    let verifier = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&corrupted).await.unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid { part: "op" }), "{err}");
}

#[tokio::test]
async fn unbound_commitment_is_rejected() {
    let op = mock_op("verifier");
    let signer = JwsSigner::generate_es256();

    // An ID Token whose nonce commits to *some other* CIC.
    let cic = Claims::new(&signer.public_jwk(), ProtectedHeader::new()).unwrap();
    let stray = Claims::new(&signer.public_jwk(), ProtectedHeader::new()).unwrap();
    let mut claims = op.default_claims();
    claims.insert("nonce".to_string(), Value::from(stray.hash().unwrap()));
    let pkt = assemble(&op, &signer, &cic, &claims);

    let verifier = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::CommitmentMismatch { .. }), "{err}");
}

#[tokio::test]
async fn configured_cosigner_key_makes_cosignature_mandatory() {
    let op = mock_op("verifier");
    let pkt = issue(&op).await;
    let cosigner = JwsSigner::generate_es256();
    let verifier = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            cosigner_public_key: Some(cosigner.public_jwk()),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = verifier.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::MalformedToken { .. }), "{err}");
}

#[tokio::test]
async fn expired_tokens_fail_unless_skipped() {
    let op = mock_op("verifier");
    let signer = JwsSigner::generate_es256();
    let cic = Claims::new(&signer.public_jwk(), ProtectedHeader::new()).unwrap();

    let mut claims = op.default_claims();
    let past = chrono::Utc::now().timestamp() - 7200;
    claims.insert("iat".to_string(), Value::from(past));
    claims.insert("exp".to_string(), Value::from(past + 3600));
    claims.insert("nonce".to_string(), Value::from(cic.hash().unwrap()));
    let pkt = assemble(&op, &signer, &cic, &claims);

    let strict = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            ..ProviderVerifierOpts::default()
        },
    );
    let err = strict.verify(&pkt).await.unwrap_err();
    assert!(matches!(err, Error::Expired { .. }), "{err}");

    let archival = verifier_for(
        &op,
        "nonce",
        ProviderVerifierOpts {
            client_id: "verifier".to_string(),
            skip_expiration_check: true,
            ..ProviderVerifierOpts::default()
        },
    );
    archival.verify(&pkt).await.unwrap();
}
