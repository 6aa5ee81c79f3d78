//! `constellation run`: resolve secrets, spawn the server, broker the pipe.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;

use constellation_core::audit::AuditLogger;
use constellation_core::config::Config;
use constellation_core::policy::PolicyEngine;
use constellation_core::proxy::{Proxy, ProxyConfig};
use constellation_core::secrets::{self, EnvProvider, ProviderRegistry, VaultProvider};

use super::super::args::RunArgs;

pub async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let config = Config::from_file(&args.policy).context("loading policy")?;

    let server = config
        .servers
        .get(&args.server)
        .with_context(|| format!("server \"{}\" not found in policy file", args.server))?
        .clone();

    let logger = Arc::new(match &args.audit_log {
        Some(path) => AuditLogger::to_file(path)
            .with_context(|| format!("opening audit log {}", path.display()))?,
        None => AuditLogger::stderr(),
    });

    // Secrets are fully resolved before the child is spawned; any failure
    // here is fatal and the child never starts.
    let secret_refs = server
        .secrets
        .as_ref()
        .map(|secrets| secrets.env.clone())
        .unwrap_or_default();

    let mut renewal = None;
    let extra_env = if secret_refs.is_empty() {
        BTreeMap::new()
    } else {
        let mut providers = ProviderRegistry::new();
        providers.insert("env".to_string(), Arc::new(EnvProvider::new()) as _);

        if let Some(vault_config) = &config.vault {
            let vault = VaultProvider::connect(vault_config)
                .await
                .context("initializing vault")?;
            renewal = Some(vault.start_renewal());
            providers.insert("vault".to_string(), Arc::new(vault) as _);
        }

        secrets::resolve(&secret_refs, &providers)
            .await
            .context("resolving secrets")?
    };

    if args.dry_run {
        tracing::warn!("dry-run mode: denials are audited but not enforced");
    }

    let engine = PolicyEngine::new(server.clone());
    let proxy_config = ProxyConfig {
        server_name: args.server.clone(),
        policy_path: args.policy.display().to_string(),
        dry_run: args.dry_run,
        secret_refs,
    };

    let proxy = Proxy::spawn(
        &server.command,
        &server.args,
        &extra_env,
        engine,
        logger,
        proxy_config,
    )
    .with_context(|| format!("starting server \"{}\"", server.command))?;

    let code = tokio::task::spawn_blocking(move || proxy.run()).await??;

    if let Some(handle) = renewal {
        handle.cancel();
    }

    Ok(code)
}
