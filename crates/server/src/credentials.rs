//! Credential lookup for outbound requests.

use std::collections::HashMap;

use secrecy::SecretString;

/// Supplies the secret injected into outbound requests of a provider, when
/// one is configured. Implementations live outside the core; the default is
/// backed by route tokens from the configuration file.
pub trait CredentialStore: Send + Sync {
    /// The secret for a provider identifier, or `None` to forward the
    /// client's own credentials untouched.
    fn get(&self, provider: &str) -> Option<SecretString>;
}

/// [`CredentialStore`] over the token fields of the configured routes.
#[derive(Default)]
pub struct ConfigCredentials {
    tokens: HashMap<String, SecretString>,
}

impl ConfigCredentials {
    /// Collect route tokens keyed by provider identifier.
    pub fn from_config(config: &config::Config) -> Self {
        let mut tokens = HashMap::new();

        let routes = config
            .proxy
            .iter()
            .chain(config.agents.values())
            .filter_map(|route| Some((route.provider.clone(), route.token.clone()?)));

        for (provider, token) in routes {
            tokens.insert(provider, token);
        }

        Self { tokens }
    }
}

impl CredentialStore for ConfigCredentials {
    fn get(&self, provider: &str) -> Option<SecretString> {
        self.tokens.get(provider).cloned()
    }
}
