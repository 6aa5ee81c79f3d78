//! `env:` provider: reads secrets from the parent process environment.

use async_trait::async_trait;

use super::Provider;

/// Resolves `env:NAME` references to environment variable values. Never
/// creates, modifies, or enumerates variables.
#[derive(Debug, Default)]
pub struct EnvProvider;

impl EnvProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for EnvProvider {
    async fn fetch(&self, name: &str) -> anyhow::Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("environment variable \"{name}\" not set"))
    }
}
