// GitHub-App integration surface (§4.7): installation token minting and
// webhook signature verification. The daemon core only ever touches these
// two primitives; the rest of the GitHub App protocol (manifest flow,
// installation management) is out of scope.

use crate::config::GitHubAppConfig;
use crate::error::{KotaError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const APP_JWT_TTL_SECS: i64 = 9 * 60;
const TOKEN_SAFETY_MARGIN_SECS: i64 = 5 * 60;
const INSTALLATION_CACHE_IDLE: Duration = Duration::from_secs(24 * 3600);
const INSTALLATION_CACHE_CAPACITY: u64 = 1024;
const LOOKUP_NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Mints and caches GitHub-App installation tokens, and verifies webhook
/// signatures against the configured secret.
#[derive(Clone)]
pub struct GitHubAppClient {
    http: reqwest::Client,
    config: GitHubAppConfig,
    token_cache: Cache<i64, CachedToken>,
    installation_lookup: Cache<(String, String), Option<i64>>,
}

impl GitHubAppClient {
    pub fn new(http: reqwest::Client, config: GitHubAppConfig) -> Self {
        let token_cache = Cache::builder()
            .max_capacity(INSTALLATION_CACHE_CAPACITY)
            .time_to_idle(INSTALLATION_CACHE_IDLE)
            .build();
        let installation_lookup = Cache::builder()
            .max_capacity(INSTALLATION_CACHE_CAPACITY)
            .time_to_live(LOOKUP_NEGATIVE_CACHE_TTL)
            .build();

        Self {
            http,
            config,
            token_cache,
            installation_lookup,
        }
    }

    fn app_jwt(&self) -> Result<String> {
        let app_id = self
            .config
            .app_id
            .as_deref()
            .ok_or_else(|| KotaError::Internal("GitHub App not configured".into()))?;
        let private_key_pem = self
            .config
            .private_key_pem
            .as_deref()
            .ok_or_else(|| KotaError::Internal("GitHub App not configured".into()))?;

        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + APP_JWT_TTL_SECS,
            iss: app_id.to_string(),
        };
        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| KotaError::Internal(format!("invalid GitHub App private key: {e}")))?;

        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| KotaError::Internal(format!("failed to sign app JWT: {e}")))
    }

    /// Mint (or reuse a cached) installation access token. `repo_ids` narrows
    /// the token's scope when the installation has been granted more
    /// repositories than the caller needs.
    pub async fn get_installation_token(&self, installation_id: i64, repo_ids: Option<&[i64]>) -> Result<(String, DateTime<Utc>)> {
        if let Some(cached) = self.token_cache.get(&installation_id).await {
            if cached.expires_at - Utc::now() > chrono::Duration::seconds(TOKEN_SAFETY_MARGIN_SECS) {
                return Ok((cached.token, cached.expires_at));
            }
        }

        let jwt = self.app_jwt()?;
        let url = format!("https://api.github.com/app/installations/{installation_id}/access_tokens");

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "kotadb");

        if let Some(ids) = repo_ids {
            request = request.json(&serde_json::json!({ "repository_ids": ids }));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(KotaError::UpstreamAuth(format!(
                "installation token request failed: {}",
                response.status()
            )));
        }

        let parsed: InstallationTokenResponse = response.json().await?;
        self.token_cache
            .insert(
                installation_id,
                CachedToken {
                    token: parsed.token.clone(),
                    expires_at: parsed.expires_at,
                },
            )
            .await;

        Ok((parsed.token, parsed.expires_at))
    }

    /// Cached best-effort lookup of the installation covering `owner/repo`.
    /// Misses are negatively cached for an hour so a repeatedly-probed,
    /// not-installed repo doesn't hit the GitHub API on every request.
    pub async fn find_installation(&self, owner: &str, repo: &str) -> Result<Option<i64>> {
        let key = (owner.to_string(), repo.to_string());
        if let Some(cached) = self.installation_lookup.get(&key).await {
            return Ok(cached);
        }

        let jwt = self.app_jwt()?;
        let url = format!("https://api.github.com/repos/{owner}/{repo}/installation");
        let response = self
            .http
            .get(&url)
            .bearer_auth(jwt)
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "kotadb")
            .send()
            .await?;

        let installation_id = if response.status().is_success() {
            #[derive(Deserialize)]
            struct InstallationResponse {
                id: i64,
            }
            let parsed: InstallationResponse = response.json().await?;
            Some(parsed.id)
        } else {
            None
        };

        self.installation_lookup.insert(key, installation_id).await;
        Ok(installation_id)
    }
}

/// Verify a GitHub webhook's `X-Hub-Signature-256` header against `payload`
/// using HMAC-SHA256 with constant-time comparison.
pub fn verify_webhook_signature(payload_bytes: &[u8], header_value: &str, secret: &str) -> bool {
    let Some(hex_signature) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected_bytes) = hex::decode(hex_signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload_bytes);
    let computed = mac.finalize().into_bytes();

    computed.ct_eq(&expected_bytes[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let payload = br#"{"action":"opened"}"#;
        let secret = "whsec";
        let header = sign(payload, secret);
        assert!(verify_webhook_signature(payload, &header, secret));
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let payload = br#"{"action":"opened"}"#;
        let secret = "whsec";
        let header = sign(payload, secret);
        assert!(!verify_webhook_signature(br#"{"action":"closed"}"#, &header, secret));
    }

    #[test]
    fn rejects_a_malformed_header() {
        let payload = br#"{"action":"opened"}"#;
        assert!(!verify_webhook_signature(payload, "not-a-signature", "whsec"));
        assert!(!verify_webhook_signature(payload, "sha256=zz", "whsec"));
    }
}
