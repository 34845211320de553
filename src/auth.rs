//! OAuth access tokens for Google Cloud REST calls.
//!
//! A token is taken from `GOOGLE_OAUTH_ACCESS_TOKEN` when set; otherwise
//! it is minted with `gcloud auth print-access-token` using the caller's
//! application-default credentials and cached for 45 minutes.

use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Source of bearer tokens shared by all outbound clients.
pub struct TokenSource {
    fixed: Option<String>,
    cached: Mutex<Option<(String, Instant)>>,
}

impl TokenSource {
    /// Use the environment variable if present, otherwise `gcloud`.
    pub fn from_environment() -> Self {
        Self {
            fixed: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            cached: Mutex::new(None),
        }
    }

    /// Always return the given token.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            fixed: Some(token.into()),
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token.
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = &self.fixed {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some((token, minted)) = cached.as_ref() {
            if minted.elapsed() < TOKEN_TTL {
                return Ok(token.clone());
            }
        }

        let token = mint_with_gcloud().await?;
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

async fn mint_with_gcloud() -> Result<String> {
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .with_context(|| format!("failed to run gcloud; set {} or install the Cloud SDK", TOKEN_ENV))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("gcloud auth print-access-token failed: {}", stderr.trim());
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        bail!("gcloud returned an empty access token");
    }
    tracing::debug!("minted access token with gcloud");
    Ok(token)
}
