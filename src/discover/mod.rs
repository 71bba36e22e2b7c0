//! OIDC key discovery: fetching issuer JWKS documents and resolving the
//! key a token was signed under.
//!
//! Fetched key sets are cached per issuer with a short TTL and revalidated
//! once when a lookup misses. All network I/O lives behind [`JwksFetch`] so
//! verifiers can be tested without a live provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::common::errors::DiscoveryError;
use crate::gq;
use crate::jwk::{Jwk, JwkSet};
use crate::jws;
use crate::{Algorithm, Error, Result};

/// How long a fetched JWKS is served from cache.
pub const CACHE_TTL_SECS: i64 = 15 * 60;

/// A provider public key resolved for one issuer. When the token header
/// carried no `kid`, the record's `kid` is the key's RFC 7638 thumbprint.
#[derive(Clone, Debug)]
pub struct PublicKeyRecord {
    /// Issuer the key belongs to.
    pub issuer: String,
    /// Algorithm the key verifies.
    pub alg: Algorithm,
    /// Key id, or the JWK thumbprint if the issuer assigned none.
    pub kid: String,
    /// The key itself.
    pub jwk: Jwk,
    /// When the cached record should be considered stale.
    pub expires_at: DateTime<Utc>,
}

/// Transport for issuer key sets. The default implementation walks
/// RFC 8414 discovery (`/.well-known/openid-configuration`) to the
/// issuer's `jwks_uri`.
#[async_trait]
pub trait JwksFetch: Send + Sync {
    /// Fetches the raw JWKS document for `issuer`.
    async fn fetch_jwks(&self, issuer: &str) -> std::result::Result<Vec<u8>, DiscoveryError>;
}

/// HTTP-backed [`JwksFetch`].
#[derive(Clone, Debug, Default)]
pub struct HttpJwksFetch {
    client: reqwest::Client,
}

impl HttpJwksFetch {
    /// Creates a fetcher with its own connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[async_trait]
impl JwksFetch for HttpJwksFetch {
    async fn fetch_jwks(&self, issuer: &str) -> std::result::Result<Vec<u8>, DiscoveryError> {
        let network = |source: reqwest::Error| DiscoveryError::Network {
            issuer: issuer.to_string(),
            source,
        };
        let config_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let document: DiscoveryDocument = self
            .client
            .get(&config_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network)?
            .json()
            .await
            .map_err(network)?;
        log::debug!("discovered jwks_uri {} for {issuer}", document.jwks_uri);
        let jwks = self
            .client
            .get(&document.jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network)?
            .bytes()
            .await
            .map_err(network)?;
        Ok(jwks.to_vec())
    }
}

/// A fixed key set, for tests and for providers that pin their keys.
#[derive(Clone, Debug)]
pub struct StaticJwksFetch {
    jwks: Vec<u8>,
}

impl StaticJwksFetch {
    /// Serves `jwks` (a serialized JWK Set) for every issuer.
    pub fn new(jwks: Vec<u8>) -> Self {
        Self { jwks }
    }
}

#[async_trait]
impl JwksFetch for StaticJwksFetch {
    async fn fetch_jwks(&self, _issuer: &str) -> std::result::Result<Vec<u8>, DiscoveryError> {
        Ok(self.jwks.clone())
    }
}

struct CacheEntry {
    jwks: Arc<JwkSet>,
    fetched_at: DateTime<Utc>,
}

/// Resolves provider public keys by `kid`, by JWK thumbprint, or from a
/// token's own header, caching key sets per issuer.
pub struct PublicKeyFinder {
    fetch: Arc<dyn JwksFetch>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl std::fmt::Debug for PublicKeyFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyFinder")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for PublicKeyFinder {
    fn default() -> Self {
        Self::new(Arc::new(HttpJwksFetch::new()))
    }
}

impl PublicKeyFinder {
    /// Creates a finder over the given transport with the default TTL.
    pub fn new(fetch: Arc<dyn JwksFetch>) -> Self {
        Self {
            fetch,
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(CACHE_TTL_SECS),
        }
    }

    /// Looks up a key by its `kid`.
    ///
    /// # Errors
    /// [`Error::ProviderKeyUnavailable`]; retryable iff the failure was
    /// transport-level.
    pub async fn by_kid(&self, issuer: &str, kid: &str) -> Result<PublicKeyRecord> {
        self.lookup(issuer, &format!("kid {kid:?}"), |jwks| {
            jwks.keys.iter().find(|key| key.kid.as_deref() == Some(kid)).cloned()
        })
        .await
    }

    /// Looks up a key by its RFC 7638 thumbprint.
    ///
    /// # Errors
    /// [`Error::ProviderKeyUnavailable`]; retryable iff the failure was
    /// transport-level.
    pub async fn by_jwk_thumbprint(&self, issuer: &str, jkt: &str) -> Result<PublicKeyRecord> {
        self.lookup(issuer, &format!("thumbprint {jkt:?}"), |jwks| {
            jwks.keys
                .iter()
                .find(|key| key.thumbprint().map(|t| t == jkt).unwrap_or(false))
                .cloned()
        })
        .await
    }

    /// Resolves the key a compact JWS was signed under. For GQ256 tokens
    /// the lookup uses the original headers preserved in the `jwt` member.
    /// A `kid` header wins; otherwise a `jkt` header is matched against key
    /// thumbprints; otherwise the set must contain exactly one usable key.
    ///
    /// # Errors
    /// [`Error::MalformedToken`] if the header does not parse, otherwise as
    /// [`Self::by_kid`].
    pub async fn by_token(&self, issuer: &str, token: &[u8]) -> Result<PublicKeyRecord> {
        let (header_b64, _, _) = jws::split_compact(token)?;
        let mut header = jws::parse_protected(header_b64)?;
        if jws::header_str(&header, "alg")? == gq::GQ256 {
            let orig_header_b64 = jws::header_str(&header, "jwt")?;
            header = jws::parse_protected(orig_header_b64)?;
        }
        if let Ok(kid) = jws::header_str(&header, "kid") {
            return self.by_kid(issuer, kid).await;
        }
        if let Ok(jkt) = jws::header_str(&header, "jkt") {
            return self.by_jwk_thumbprint(issuer, jkt).await;
        }
        self.lookup(issuer, "token without kid", |jwks| {
            match jwks.keys.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            }
        })
        .await
    }

    async fn lookup<F>(&self, issuer: &str, selector: &str, select: F) -> Result<PublicKeyRecord>
    where
        F: Fn(&JwkSet) -> Option<Jwk>,
    {
        let jwks = self.jwks(issuer, false).await?;
        if let Some(jwk) = select(&jwks) {
            return self.record(issuer, jwk);
        }
        // Miss: the issuer may have rotated keys since the cache fill.
        let jwks = self.jwks(issuer, true).await?;
        match select(&jwks) {
            Some(jwk) => self.record(issuer, jwk),
            None => Err(Error::ProviderKeyUnavailable {
                source: DiscoveryError::NoMatchingKey {
                    issuer: issuer.to_string(),
                    selector: selector.to_string(),
                },
            }),
        }
    }

    async fn jwks(&self, issuer: &str, force_refresh: bool) -> Result<Arc<JwkSet>> {
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(issuer) {
                if Utc::now() - entry.fetched_at < self.ttl {
                    return Ok(Arc::clone(&entry.jwks));
                }
            }
        }

        let raw = self
            .fetch
            .fetch_jwks(issuer)
            .await
            .map_err(|source| Error::ProviderKeyUnavailable { source })?;
        let jwks: JwkSet = serde_json::from_slice(&raw).map_err(|err| {
            Error::ProviderKeyUnavailable {
                source: DiscoveryError::InvalidJwks {
                    issuer: issuer.to_string(),
                    reason: err.to_string(),
                },
            }
        })?;
        log::debug!("cached {} keys for {issuer}", jwks.keys.len());

        let jwks = Arc::new(jwks);
        let mut cache = self.cache.write().await;
        cache.insert(
            issuer.to_string(),
            CacheEntry {
                jwks: Arc::clone(&jwks),
                fetched_at: Utc::now(),
            },
        );
        Ok(jwks)
    }

    fn record(&self, issuer: &str, jwk: Jwk) -> Result<PublicKeyRecord> {
        let alg = jwk.algorithm()?;
        let kid = match &jwk.kid {
            Some(kid) => kid.clone(),
            None => jwk.thumbprint()?,
        };
        Ok(PublicKeyRecord {
            issuer: issuer.to_string(),
            alg,
            kid,
            jwk,
            expires_at: Utc::now() + self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingFetch {
        jwks: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JwksFetch for CountingFetch {
        async fn fetch_jwks(&self, _: &str) -> std::result::Result<Vec<u8>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.jwks.clone())
        }
    }

    fn test_jwks(kid: &str) -> Vec<u8> {
        let signer = crate::jws::signer::JwsSigner::generate_es256();
        let mut jwk = signer.public_jwk();
        jwk.kid = Some(kid.to_string());
        serde_json::to_vec(&JwkSet { keys: vec![jwk] }).unwrap()
    }

    #[tokio::test]
    async fn lookup_serves_from_cache() {
        let fetch = Arc::new(CountingFetch {
            jwks: test_jwks("k1"),
            calls: AtomicUsize::new(0),
        });
        let finder = PublicKeyFinder::new(Arc::<CountingFetch>::clone(&fetch));
        finder.by_kid("https://op.example.com", "k1").await.unwrap();
        finder.by_kid("https://op.example.com", "k1").await.unwrap();
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn miss_revalidates_then_fails_fatally() {
        let fetch = Arc::new(CountingFetch {
            jwks: test_jwks("k1"),
            calls: AtomicUsize::new(0),
        });
        let finder = PublicKeyFinder::new(Arc::<CountingFetch>::clone(&fetch));
        let err = finder
            .by_kid("https://op.example.com", "absent")
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn record_kid_falls_back_to_thumbprint() {
        let signer = crate::jws::signer::JwsSigner::generate_es256();
        let jwk = signer.public_jwk();
        let jwks = serde_json::to_vec(&JwkSet {
            keys: vec![jwk.clone()],
        })
        .unwrap();
        let finder = PublicKeyFinder::new(Arc::new(StaticJwksFetch::new(jwks)));
        let record = finder
            .by_jwk_thumbprint("https://op.example.com", &jwk.thumbprint().unwrap())
            .await
            .unwrap();
        assert_eq!(record.kid, jwk.thumbprint().unwrap());
    }
}
