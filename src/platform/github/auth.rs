use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use octocrab::Octocrab;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Serialize)]
struct JwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Generate a JWT for GitHub App authentication.
pub fn generate_app_jwt(app_id: u64, private_key_path: &Path) -> Result<String> {
    let key_pem = std::fs::read(private_key_path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read private key at {}: {e}",
            private_key_path.display()
        ))
    })?;

    let encoding_key = EncodingKey::from_rsa_pem(&key_pem)
        .map_err(|e| AppError::Config(format!("Invalid RSA private key: {e}")))?;

    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        iat: now - 60,      // clock drift
        exp: now + 10 * 60, // 10 minute maximum
        iss: app_id.to_string(),
    };

    let header = Header::new(Algorithm::RS256);
    encode(&header, &claims, &encoding_key)
        .map_err(|e| AppError::GitHubAuth(format!("Failed to generate JWT: {e}")))
}

/// Installation access tokens, cached until five minutes before expiry.
pub struct InstallationTokens {
    app_id: u64,
    private_key_path: PathBuf,
    cache: RwLock<HashMap<u64, (String, DateTime<Utc>)>>,
}

impl InstallationTokens {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if !config.private_key_path.exists() {
            return Err(AppError::Config(format!(
                "GitHub App private key not found at: {}",
                config.private_key_path.display()
            )));
        }

        Ok(Self {
            app_id: config.app_id,
            private_key_path: config.private_key_path.clone(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub async fn get(&self, installation_id: u64) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some((token, expiry)) = cache.get(&installation_id) {
                if *expiry > Utc::now() + Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        let client = self.app_client()?;
        let url = format!("/app/installations/{installation_id}/access_tokens");
        let response: serde_json::Value = client.post(&url, None::<&()>).await?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| AppError::GitHubAuth("No token in response".to_string()))?
            .to_string();

        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        self.cache
            .write()
            .await
            .insert(installation_id, (token.clone(), expires_at));
        tracing::debug!(installation_id, %expires_at, "Cached installation token");

        Ok(token)
    }

    /// Installation id of the app on `owner/name`.
    pub async fn installation_for(&self, owner: &str, name: &str) -> Result<u64> {
        let client = self.app_client()?;
        let url = format!("/repos/{owner}/{name}/installation");
        let response: serde_json::Value = client.get(&url, None::<&()>).await?;
        response["id"].as_u64().ok_or_else(|| {
            AppError::GitHubApi(format!("No installation id for {owner}/{name}"))
        })
    }

    fn app_client(&self) -> Result<Octocrab> {
        let jwt = generate_app_jwt(self.app_id, &self.private_key_path)?;
        Octocrab::builder()
            .personal_token(jwt)
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build JWT client: {e}")))
    }

    /// An octocrab client authenticated as the installation.
    pub async fn client(&self, installation_id: u64) -> Result<Octocrab> {
        let token = self.get(installation_id).await?;
        Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))
    }
}
