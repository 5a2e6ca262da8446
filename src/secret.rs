//! External secrets.
//!
//! Secrets are declared as a map of environment variable name to a location
//! inside a secret provider. The location grammar depends on the provider:
//!
//! ```text
//! Vault           path/to/key:property   ->  secret/path/to/key, property
//! ParameterStore  path/to/key            ->  /path/to/key
//! SecretsManager  path/to/key:property   ->  /path/to/key, property
//! ```
use crate::deployment::EnvironmentVariable;
use crate::manifest::{ApiResource, Manifest, Metadata};
use crate::naming;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_REFRESH_INTERVAL: &str = "24h";

const LOCATION_SEPARATOR: char = ':';

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("must provide exactly one property in location {location} for provider {provider}")]
    ExpectedOneProperty {
        location: String,
        provider: SecretProvider,
    },

    #[error("unexpected property found in location {location} for provider {provider}")]
    UnexpectedProperty {
        location: String,
        provider: SecretProvider,
    },

    #[error("unsupported secret provider {0}")]
    UnsupportedProvider(String),

    #[error("unsupported provider {0} while getting default secret store name")]
    NoDefaultStore(SecretProvider),
}

/// The external secret providers that are currently supported.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretProvider {
    Vault,
    ParameterStore,
    SecretsManager,
}

impl SecretProvider {
    pub const ALL: [SecretProvider; 3] = [
        SecretProvider::Vault,
        SecretProvider::ParameterStore,
        SecretProvider::SecretsManager,
    ];

    /// Name of the cluster secret store installed for this provider, if there is one.
    pub fn default_store_name(&self) -> Option<&'static str> {
        match self {
            SecretProvider::Vault => Some("vault-backend"),
            SecretProvider::ParameterStore => Some("aws-backend"),
            SecretProvider::SecretsManager => None,
        }
    }

    /// Split a raw `path[:property]` location according to this provider's grammar.
    pub fn parse_location(&self, location: &str) -> Result<Location, Error> {
        match self {
            SecretProvider::Vault => Vault::parse(location),
            SecretProvider::ParameterStore => ParameterStore::parse(location),
            SecretProvider::SecretsManager => SecretsManager::parse(location),
        }
    }
}

impl Display for SecretProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SecretProvider::Vault => "Vault",
            SecretProvider::ParameterStore => "ParameterStore",
            SecretProvider::SecretsManager => "SecretsManager",
        })
    }
}

impl FromStr for SecretProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecretProvider::ALL
            .into_iter()
            .find(|provider| provider.to_string() == s)
            .ok_or_else(|| Error::UnsupportedProvider(s.to_string()))
    }
}

/// Where a secret value lives inside its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub property: Option<String>,
}

pub enum PropertyRule {
    Required,
    Forbidden,
}

/// Location grammar of a single provider.
pub trait LocationGrammar {
    const PROVIDER: SecretProvider;

    /// Prepended to the path given by the user.
    const PATH_PREFIX: &'static str;

    const PROPERTY: PropertyRule;

    fn parse(location: &str) -> Result<Location, Error> {
        let mut parts = location.split(LOCATION_SEPARATOR);
        // split() always yields at least one element
        let path = parts.next().unwrap_or_default();
        let property = parts.next();
        let leftover = parts.next().is_some();

        let property = match (Self::PROPERTY, property) {
            (PropertyRule::Required, Some(property)) if !property.is_empty() && !leftover => {
                Some(property.to_string())
            }
            (PropertyRule::Required, _) => {
                return Err(Error::ExpectedOneProperty {
                    location: location.to_string(),
                    provider: Self::PROVIDER,
                })
            }
            (PropertyRule::Forbidden, None) => None,
            (PropertyRule::Forbidden, Some(_)) => {
                return Err(Error::UnexpectedProperty {
                    location: location.to_string(),
                    provider: Self::PROVIDER,
                })
            }
        };

        Ok(Location {
            path: format!("{}{}", Self::PATH_PREFIX, path),
            property,
        })
    }
}

pub struct Vault;

impl LocationGrammar for Vault {
    const PROVIDER: SecretProvider = SecretProvider::Vault;
    const PATH_PREFIX: &'static str = "secret/";
    const PROPERTY: PropertyRule = PropertyRule::Required;
}

pub struct ParameterStore;

impl LocationGrammar for ParameterStore {
    const PROVIDER: SecretProvider = SecretProvider::ParameterStore;
    const PATH_PREFIX: &'static str = "/";
    const PROPERTY: PropertyRule = PropertyRule::Forbidden;
}

pub struct SecretsManager;

impl LocationGrammar for SecretsManager {
    const PROVIDER: SecretProvider = SecretProvider::SecretsManager;
    const PATH_PREFIX: &'static str = "/";
    const PROPERTY: PropertyRule = PropertyRule::Required;
}

/// Input parameters for an external secret.
#[derive(Debug, Clone)]
pub struct Config {
    /// Free-form identifier. The Kubernetes secret name is derived from it.
    pub id: String,
    pub provider: SecretProvider,
    pub namespace: String,
    /// Environment variable name to provider location.
    pub keys: BTreeMap<String, String>,
    /// Name of the cluster secret store. Defaults per provider.
    pub store_name: Option<String>,
    /// How often to check the provider for an updated value, e.g. `10m`, `1h`.
    pub refresh_interval: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretBody {
    pub refresh_interval: String,
    pub secret_store_ref: SecretStoreRef,
    pub target: SecretTarget,
    pub data: Vec<SecretData>,
}

impl ApiResource for ExternalSecretBody {
    const API_VERSION: &'static str = "external-secrets.io/v1beta1";
    const KIND: &'static str = "ExternalSecret";
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SecretStoreRef {
    pub name: String,
    pub kind: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SecretTarget {
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretData {
    pub secret_key: String,
    pub remote_ref: RemoteRef,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RemoteRef {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

/// A validated external secret. Once built it cannot change.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSecretSpec {
    keys: BTreeMap<String, String>,
    manifest: Manifest<ExternalSecretBody>,
}

impl ExternalSecretSpec {
    /// Validate every location and render the ExternalSecret manifest.
    /// The first malformed location aborts the build.
    pub fn build(cfg: Config) -> Result<Self, Error> {
        let secret_name = naming::normalize(&cfg.id);

        let store_name = match cfg.store_name {
            Some(name) => name,
            None => cfg
                .provider
                .default_store_name()
                .ok_or(Error::NoDefaultStore(cfg.provider))?
                .to_string(),
        };

        let data = cfg
            .keys
            .iter()
            .map(|(variable, location)| {
                let Location { path, property } = cfg.provider.parse_location(location)?;
                Ok(SecretData {
                    secret_key: variable.clone(),
                    remote_ref: RemoteRef {
                        key: path,
                        property,
                    },
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        debug!(
            "external secret {} -> {secret_name} ({} keys from {store_name})",
            cfg.id,
            data.len()
        );

        let manifest = Manifest::new(
            Metadata::namespaced(&secret_name, cfg.namespace),
            ExternalSecretBody {
                refresh_interval: cfg
                    .refresh_interval
                    .unwrap_or_else(|| DEFAULT_REFRESH_INTERVAL.to_string()),
                secret_store_ref: SecretStoreRef {
                    name: store_name,
                    kind: "ClusterSecretStore".to_string(),
                },
                target: SecretTarget {
                    name: secret_name,
                },
                data,
            },
        );

        Ok(Self {
            keys: cfg.keys,
            manifest,
        })
    }

    /// Name of the Kubernetes secret the values are materialized into.
    pub fn secret_name(&self) -> &str {
        &self.manifest.spec.target.name
    }

    pub fn store_name(&self) -> &str {
        &self.manifest.spec.secret_store_ref.name
    }

    pub fn refresh_interval(&self) -> &str {
        &self.manifest.spec.refresh_interval
    }

    pub fn manifest(&self) -> &Manifest<ExternalSecretBody> {
        &self.manifest
    }

    /// One secret reference per key, in key order, for use in a container's environment.
    pub fn environment_variables(&self) -> Vec<EnvironmentVariable> {
        self.keys
            .keys()
            .map(|variable| EnvironmentVariable::SecretRef {
                name: variable.clone(),
                secret_name: self.secret_name().to_string(),
                secret_key: variable.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: SecretProvider, keys: &[(&str, &str)]) -> Config {
        Config {
            id: "HelloSecrets".into(),
            provider,
            namespace: "dev".into(),
            keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            store_name: None,
            refresh_interval: None,
        }
    }

    #[test]
    fn vault_locations() {
        let location = SecretProvider::Vault.parse_location("dev/app:password").unwrap();
        assert_eq!(location.path, "secret/dev/app");
        assert_eq!(location.property.as_deref(), Some("password"));

        for bad in ["dev/app", "dev/app:", "dev/app:a:b"] {
            assert_eq!(
                SecretProvider::Vault.parse_location(bad),
                Err(Error::ExpectedOneProperty {
                    location: bad.into(),
                    provider: SecretProvider::Vault
                })
            );
        }
    }

    #[test]
    fn parameter_store_locations() {
        let location = SecretProvider::ParameterStore
            .parse_location("dev/app/hello/message")
            .unwrap();
        assert_eq!(location.path, "/dev/app/hello/message");
        assert_eq!(location.property, None);

        for bad in ["dev/app:property", "dev/app:", "a:b:c"] {
            assert!(matches!(
                SecretProvider::ParameterStore.parse_location(bad),
                Err(Error::UnexpectedProperty { .. })
            ));
        }
    }

    #[test]
    fn secrets_manager_locations() {
        let location = SecretProvider::SecretsManager
            .parse_location("dev/db:username")
            .unwrap();
        assert_eq!(location.path, "/dev/db");
        assert_eq!(location.property.as_deref(), Some("username"));

        assert!(SecretProvider::SecretsManager.parse_location("dev/db").is_err());
        assert!(SecretProvider::SecretsManager
            .parse_location("dev/db:user:name")
            .is_err());
    }

    #[test]
    fn provider_names() {
        for provider in SecretProvider::ALL {
            assert_eq!(provider.to_string().parse::<SecretProvider>(), Ok(provider));
        }
        assert_eq!(
            "KeyVault".parse::<SecretProvider>(),
            Err(Error::UnsupportedProvider("KeyVault".into()))
        );
    }

    #[test]
    fn default_store_names() {
        let vault = ExternalSecretSpec::build(config(SecretProvider::Vault, &[])).unwrap();
        assert_eq!(vault.store_name(), "vault-backend");

        let ssm = ExternalSecretSpec::build(config(SecretProvider::ParameterStore, &[])).unwrap();
        assert_eq!(ssm.store_name(), "aws-backend");

        assert_eq!(
            ExternalSecretSpec::build(config(SecretProvider::SecretsManager, &[])),
            Err(Error::NoDefaultStore(SecretProvider::SecretsManager))
        );

        let mut cfg = config(SecretProvider::SecretsManager, &[]);
        cfg.store_name = Some("sm-backend".into());
        assert_eq!(ExternalSecretSpec::build(cfg).unwrap().store_name(), "sm-backend");
    }

    #[test]
    fn refresh_interval_defaults_to_a_day() {
        let spec = ExternalSecretSpec::build(config(SecretProvider::Vault, &[])).unwrap();
        assert_eq!(spec.refresh_interval(), "24h");

        let mut cfg = config(SecretProvider::Vault, &[]);
        cfg.refresh_interval = Some("10m".into());
        assert_eq!(ExternalSecretSpec::build(cfg).unwrap().refresh_interval(), "10m");
    }

    #[test]
    fn first_bad_location_fails_the_whole_secret() {
        let cfg = config(
            SecretProvider::Vault,
            &[("A_GOOD", "dev/a:x"), ("B_BAD", "dev/b"), ("C_GOOD", "dev/c:y")],
        );
        assert_eq!(
            ExternalSecretSpec::build(cfg),
            Err(Error::ExpectedOneProperty {
                location: "dev/b".into(),
                provider: SecretProvider::Vault
            })
        );
    }

    #[test]
    fn parameter_store_manifest() {
        let spec = ExternalSecretSpec::build(config(
            SecretProvider::ParameterStore,
            &[("MESSAGE", "dev/app/hello/message")],
        ))
        .unwrap();

        let value = serde_json::to_value(spec.manifest()).unwrap();
        assert_eq!(value["apiVersion"], "external-secrets.io/v1beta1");
        assert_eq!(value["kind"], "ExternalSecret");
        assert_eq!(value["metadata"]["name"], "hello-secrets");
        assert_eq!(value["metadata"]["namespace"], "dev");
        assert_eq!(value["spec"]["refreshInterval"], "24h");
        assert_eq!(value["spec"]["secretStoreRef"]["name"], "aws-backend");
        assert_eq!(value["spec"]["secretStoreRef"]["kind"], "ClusterSecretStore");
        assert_eq!(value["spec"]["target"]["name"], "hello-secrets");
        assert_eq!(value["spec"]["data"][0]["secretKey"], "MESSAGE");
        assert_eq!(
            value["spec"]["data"][0]["remoteRef"]["key"],
            "/dev/app/hello/message"
        );
        assert!(value["spec"]["data"][0]["remoteRef"].get("property").is_none());

        assert_eq!(
            spec.environment_variables(),
            vec![EnvironmentVariable::SecretRef {
                name: "MESSAGE".into(),
                secret_name: "hello-secrets".into(),
                secret_key: "MESSAGE".into(),
            }]
        );
    }

    #[test]
    fn environment_variables_follow_key_order() {
        let spec = ExternalSecretSpec::build(config(
            SecretProvider::Vault,
            &[("ZETA", "z:v"), ("ALPHA", "a:v"), ("MID", "m:v")],
        ))
        .unwrap();
        let names: Vec<_> = spec
            .environment_variables()
            .into_iter()
            .map(|var| var.name().to_string())
            .collect();
        assert_eq!(names, ["ALPHA", "MID", "ZETA"]);

        let data_keys: Vec<_> = spec
            .manifest()
            .spec
            .data
            .iter()
            .map(|d| d.secret_key.as_str())
            .collect();
        assert_eq!(data_keys, ["ALPHA", "MID", "ZETA"]);
    }
}
