//! `vault:` provider: fetches secrets from a HashiCorp Vault KV store.
//!
//! References take the form `vault:<path>#<field>`. The path is read under
//! the `/v1/` HTTP API; versioned-KV payloads (an inner `data` object) are
//! unwrapped one level before the field lookup.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::Provider;
use crate::config::VaultConfig;

/// Interval between token self-renewals.
const RENEW_INTERVAL: Duration = Duration::from_secs(1800);

#[derive(Debug)]
pub struct VaultProvider {
    client: reqwest::Client,
    address: String,
    token: String,
}

impl VaultProvider {
    /// Build an HTTP client from the config and complete initial
    /// authentication. Fails if the token cannot be obtained.
    pub async fn connect(config: &VaultConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();

        if config.tls.skip_verify {
            warn!("vault TLS verification disabled; do not use in production");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_cert) = &config.tls.ca_cert {
            let pem = std::fs::read(ca_cert)
                .with_context(|| format!("reading CA cert {ca_cert}"))?;
            let certificate =
                reqwest::Certificate::from_pem(&pem).context("parsing CA cert")?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder.build().context("creating vault client")?;
        let address = config.address.trim_end_matches('/').to_string();
        let token = authenticate(&client, &address, config)
            .await
            .context("vault authentication")?;

        Ok(Self {
            client,
            address,
            token,
        })
    }

    /// Spawn a background task that keeps the auth token alive with
    /// periodic self-renewal. Renewal failures are logged, never fatal.
    pub fn start_renewal(&self) -> RenewalHandle {
        let client = self.client.clone();
        let url = format!("{}/v1/auth/token/renew-self", self.address);
        let token = self.token.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(RENEW_INTERVAL);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                let result = client
                    .post(&url)
                    .header("X-Vault-Token", &token)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status());
                match result {
                    Ok(_) => debug!("vault token renewed"),
                    Err(err) => warn!("vault token renewal failed: {err}"),
                }
            }
        });

        RenewalHandle { task }
    }
}

#[async_trait]
impl Provider for VaultProvider {
    /// Resolve a reference like `secret/data/myapp#connection_string`: the
    /// part before `#` is the read path, the part after is the field key.
    async fn fetch(&self, reference: &str) -> anyhow::Result<String> {
        let Some((path, field)) = reference.split_once('#') else {
            bail!("invalid vault reference \"{reference}\": expected path#field");
        };

        let response = self
            .client
            .get(format!("{}/v1/{path}", self.address))
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .with_context(|| format!("reading vault path \"{path}\""))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            bail!("no secret found at vault path \"{path}\"");
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("reading vault path \"{path}\""))?;
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("parsing secret at vault path \"{path}\""))?;

        // Versioned KV wraps the payload in an inner "data" object
        let mut data = body.get("data").cloned().unwrap_or(Value::Null);
        if let Some(inner) = data.get("data").filter(|value| value.is_object()) {
            data = inner.clone();
        }

        match data.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => bail!("field \"{field}\" not found at vault path \"{path}\""),
        }
    }
}

/// Cancel handle for the token-renewal task. Dropping the handle leaves the
/// task running; call [`RenewalHandle::cancel`] to stop it.
pub struct RenewalHandle {
    task: tokio::task::JoinHandle<()>,
}

impl RenewalHandle {
    /// Stop the renewal task promptly.
    pub fn cancel(self) {
        self.task.abort();
    }
}

async fn authenticate(
    client: &reqwest::Client,
    address: &str,
    config: &VaultConfig,
) -> anyhow::Result<String> {
    match config.auth.method.as_str() {
        "token" => {
            let token = std::env::var("VAULT_TOKEN").unwrap_or_default();
            if token.is_empty() {
                bail!("VAULT_TOKEN environment variable not set");
            }
            Ok(token)
        }

        "approle" => {
            let role_id_path = config
                .auth
                .role_id_path
                .as_deref()
                .context("auth method \"approle\" requires role_id_path")?;
            let secret_id_path = config
                .auth
                .secret_id_path
                .as_deref()
                .context("auth method \"approle\" requires secret_id_path")?;

            let role_id = std::fs::read_to_string(role_id_path)
                .with_context(|| format!("reading role_id from {role_id_path}"))?;
            let secret_id = std::fs::read_to_string(secret_id_path)
                .with_context(|| format!("reading secret_id from {secret_id_path}"))?;

            let response = client
                .post(format!("{address}/v1/auth/approle/login"))
                .json(&serde_json::json!({
                    "role_id": role_id.trim(),
                    "secret_id": secret_id.trim(),
                }))
                .send()
                .await
                .context("approle login request")?
                .error_for_status()
                .context("approle login")?;

            let body: Value = response
                .json()
                .await
                .context("parsing approle login response")?;
            body.get("auth")
                .and_then(|auth| auth.get("client_token"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .context("approle login response missing auth.client_token")
        }

        other => bail!("unsupported auth method: \"{other}\""),
    }
}
