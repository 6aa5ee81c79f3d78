//! Secret reference resolution.
//!
//! A reference has the form `<prefix>:<tail>`: the prefix selects a
//! registered provider, the tail is provider-specific (`env:DB_PASSWORD`,
//! `vault:secret/data/myapp#connection_string`). Resolution is
//! all-or-nothing so the child process never spawns with a partial
//! environment.

pub mod env;
pub mod vault;

pub use env::EnvProvider;
pub use vault::{RenewalHandle, VaultProvider};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

/// A capability that resolves provider-specific reference tails to values.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn fetch(&self, reference: &str) -> anyhow::Result<String>;
}

/// Providers keyed by reference prefix. Assembled before proxy startup and
/// never mutated after the child is spawned.
pub type ProviderRegistry = HashMap<String, Arc<dyn Provider>>;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown secrets provider \"{prefix}\" in reference \"{reference}\"")]
    UnknownProvider { prefix: String, reference: String },

    #[error("fetching secret \"{reference}\": {source}")]
    Fetch {
        reference: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Resolve a map of env-var names to secret references through the registry.
///
/// Either every entry resolves and the returned map carries exactly the
/// input's keys, or the first failure aborts with no partial output.
pub async fn resolve(
    refs: &BTreeMap<String, String>,
    providers: &ProviderRegistry,
) -> Result<BTreeMap<String, String>, ResolveError> {
    let mut resolved = BTreeMap::new();
    for (env_name, reference) in refs {
        let (prefix, tail) = parse_reference(reference);
        let provider = providers
            .get(prefix)
            .ok_or_else(|| ResolveError::UnknownProvider {
                prefix: prefix.to_string(),
                reference: reference.clone(),
            })?;
        let value = provider
            .fetch(tail)
            .await
            .map_err(|source| ResolveError::Fetch {
                reference: reference.clone(),
                source,
            })?;
        resolved.insert(env_name.clone(), value);
    }
    Ok(resolved)
}

/// Split `vault:secret/myapp#field` into `("vault", "secret/myapp#field")`.
/// A reference without `:` gets the empty prefix.
fn parse_reference(reference: &str) -> (&str, &str) {
    match reference.split_once(':') {
        Some((prefix, tail)) => (prefix, tail),
        None => ("", reference),
    }
}
