//! JWS compact codec: Base64URL-without-padding segments, compact
//! split/join, and protected headers as an insertion-ordered map.
//!
//! The signing input of a JWS is literally `header_b64 || "." ||
//! payload_b64` over the encoded segments, never a re-encoding, so every
//! function here treats the Base64URL forms as the authoritative bytes.

pub mod signer;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// A protected header: string keys to JSON values, preserving insertion
/// order. Serialization emits compact JSON with members in insertion order,
/// which is the canonical spelling this crate signs and hashes.
pub type ProtectedHeader = Map<String, Value>;

/// Encodes raw bytes as Base64URL without padding.
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a Base64URL-without-padding segment.
///
/// # Errors
/// Returns [`Error::MalformedToken`] on non-URL-safe characters or padding.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::MalformedToken {
            reason: format!("segment is not unpadded base64url ({} bytes)", segment.len()),
        })
}

/// Splits a compact JWS into its three encoded segments.
///
/// # Errors
/// Returns [`Error::MalformedToken`] if the token is not UTF-8 or does not
/// consist of exactly three dot-separated segments.
pub fn split_compact(token: &[u8]) -> Result<(&str, &str, &str)> {
    let token = std::str::from_utf8(token).map_err(|_| Error::MalformedToken {
        reason: "compact JWS is not valid UTF-8".to_string(),
    })?;
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => {
            Ok((header, payload, signature))
        }
        _ => Err(Error::MalformedToken {
            reason: format!(
                "compact JWS must have 3 segments, found {}",
                token.split('.').count()
            ),
        }),
    }
}

/// Joins three encoded segments into a compact JWS.
pub fn join_compact(header_b64: &str, payload_b64: &str, signature_b64: &str) -> Vec<u8> {
    let mut token = Vec::with_capacity(header_b64.len() + payload_b64.len() + signature_b64.len() + 2);
    token.extend_from_slice(header_b64.as_bytes());
    token.push(b'.');
    token.extend_from_slice(payload_b64.as_bytes());
    token.push(b'.');
    token.extend_from_slice(signature_b64.as_bytes());
    token
}

/// The bytes a JWS signature is computed over.
pub fn signing_input(header_b64: &str, payload_b64: &str) -> Vec<u8> {
    let mut input = Vec::with_capacity(header_b64.len() + payload_b64.len() + 1);
    input.extend_from_slice(header_b64.as_bytes());
    input.push(b'.');
    input.extend_from_slice(payload_b64.as_bytes());
    input
}

/// Decodes and parses a protected-header segment into an ordered map.
///
/// # Errors
/// Returns [`Error::MalformedToken`] if the segment is not Base64URL, not
/// UTF-8, or not a JSON object.
pub fn parse_protected(header_b64: &str) -> Result<ProtectedHeader> {
    let raw = decode_segment(header_b64)?;
    let value: Value = serde_json::from_slice(&raw).map_err(|_| Error::MalformedToken {
        reason: "protected header is not valid JSON".to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::MalformedToken {
            reason: "protected header is not a JSON object".to_string(),
        }),
    }
}

/// Serializes a protected header to its encoded segment: compact JSON in
/// insertion order, then Base64URL.
///
/// # Errors
/// Returns [`Error::Internal`] if JSON serialization fails.
pub fn encode_protected(header: &ProtectedHeader) -> Result<String> {
    let raw = serde_json::to_vec(header)
        .map_err(|err| Error::Internal(format!("protected header serialization: {err}")))?;
    Ok(encode_segment(&raw))
}

/// Returns the string value of a header member.
///
/// # Errors
/// Returns [`Error::MalformedToken`] if the member is absent or not a string.
pub fn header_str<'a>(header: &'a ProtectedHeader, name: &str) -> Result<&'a str> {
    header
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedToken {
            reason: format!("protected header missing string member {name:?}"),
        })
}
