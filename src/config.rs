pub mod file {
    use crate::deployment::{HealthCheck, Probe, ProbeMerge, ResourceRequirements, Timeouts};
    use crate::service_mapping::SsmParameterOverrides;
    use serde::Deserialize;
    use serde_inline_default::serde_inline_default;
    use std::collections::BTreeMap;
    use thiserror::Error;

    const DEFAULT_CONFIG: &str = include_str!("../default.toml");

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("read {path}: {err}")]
        ReadFile {
            err: std::io::Error,
            path: String,
        },

        #[error("parse: {0}")]
        Parse(#[from] toml::de::Error),
    }

    /// A svcspec.toml file.
    #[derive(Deserialize, Debug, Clone)]
    #[serde(deny_unknown_fields)]
    pub struct File {
        pub description: Option<String>,
        #[serde(default)]
        pub app: App,
        #[serde(default)]
        pub routing: Routing,
        #[serde(default)]
        pub deployment: Deployment,
        #[serde(default)]
        pub secrets: Vec<Secret>,
    }

    impl Default for File {
        fn default() -> Self {
            // The default config is compiled into the program, so
            // make sure to test default() to catch panics compile-time.
            toml::from_str(DEFAULT_CONFIG).expect("built-in default.toml must parse")
        }
    }

    impl File {
        /// Parse a config file, layering it over the built-in defaults.
        pub fn default_with_user_config(user_config: &str) -> Result<Self, Error> {
            let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
            let user: toml::Table = toml::from_str(user_config)?;
            merge(&mut merged, user);
            Ok(toml::Value::Table(merged).try_into()?)
        }

        pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
            let contents = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
                err,
                path: path.to_string(),
            })?;
            Self::default_with_user_config(&contents)
        }
    }

    /// Tables are merged key by key; any other value in `top` replaces the one in `base`.
    fn merge(base: &mut toml::Table, top: toml::Table) {
        for (key, value) in top {
            match value {
                toml::Value::Table(top_table) => match base.get_mut(&key) {
                    Some(toml::Value::Table(base_table)) => merge(base_table, top_table),
                    _ => {
                        base.insert(key, toml::Value::Table(top_table));
                    }
                },
                value => {
                    base.insert(key, value);
                }
            }
        }
    }

    #[serde_inline_default]
    #[derive(Deserialize, Debug, Clone)]
    #[serde(deny_unknown_fields)]
    pub struct App {
        pub name: Option<String>,
        #[serde_inline_default(8080)]
        pub service_port: i64,
        #[serde_inline_default(8080)]
        pub container_port: u16,
        #[serde_inline_default(1)]
        pub replicas: i64,
        /// Defaults to the workspace name.
        pub namespace: Option<String>,
        /// Container image. The `IMAGE` environment variable takes precedence.
        pub image: Option<String>,
    }

    impl Default for App {
        fn default() -> Self {
            Self {
                name: None,
                service_port: 8080,
                container_port: 8080,
                replicas: 1,
                namespace: None,
                image: None,
            }
        }
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    #[serde(deny_unknown_fields)]
    pub struct Routing {
        pub domain: Option<String>,
        pub host_header: Option<String>,
        /// Fixed listener priority, regardless of workspace.
        pub priority: Option<i64>,
        /// Listener priority per workspace name.
        #[serde(default)]
        pub priorities: BTreeMap<String, i64>,
        pub ssm_parameters: Option<SsmParameterOverrides>,
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    #[serde(deny_unknown_fields)]
    pub struct Deployment {
        #[serde(default)]
        pub probe_merge: ProbeMerge,
        pub timeouts: Option<Timeouts>,
        pub readiness_probe: Option<Probe>,
        pub resources: Option<ResourceRequirements>,
        pub health_check: Option<HealthCheck>,
        #[serde(default)]
        pub environment: BTreeMap<String, String>,
    }

    /// An `[[secrets]]` entry.
    ///
    /// `{workspace}` in a key location is replaced with the current workspace.
    #[derive(Deserialize, Debug, Clone)]
    #[serde(deny_unknown_fields)]
    pub struct Secret {
        pub id: String,
        pub provider: String,
        pub namespace: Option<String>,
        #[serde(default)]
        pub keys: BTreeMap<String, String>,
        pub store_name: Option<String>,
        pub refresh_interval: Option<String>,
    }

    #[cfg(test)]
    pub mod test {
        use super::*;

        #[test]
        pub fn load_default_configuration() {
            let cfg = File::default();
            assert_eq!(cfg.description, Some("Default configuration file".into()));
            assert_eq!(cfg.app.service_port, 8080);
            assert_eq!(cfg.routing.priorities.get("prod"), Some(&200));
            assert_eq!(cfg.deployment.probe_merge, ProbeMerge::Shallow);
            assert!(cfg.secrets.is_empty());
        }

        #[test]
        pub fn user_config_is_layered_over_defaults() {
            let cfg = File::default_with_user_config(
                r#"
[app]
name = "hello"
service_port = 9090

[routing]
domain = "example.dev"

[routing.priorities]
dev = 300

[deployment]
probe_merge = "deep"

[deployment.readiness_probe]
timeout_seconds = 5
tcp_socket = { port = "9090" }

[deployment.health_check]
path = "/healthz"
healthy_threshold = 2

[deployment.resources]
limits = { memory = "1536Mi" }
requests = { memory = "1Gi" }

[[secrets]]
id = "HelloParameterStoreSecrets"
provider = "ParameterStore"
keys = { MESSAGE = "{workspace}/app/hello/message" }
"#,
            )
            .unwrap();

            assert_eq!(cfg.app.name.as_deref(), Some("hello"));
            assert_eq!(cfg.app.service_port, 9090);
            assert_eq!(cfg.app.container_port, 8080);
            assert_eq!(cfg.routing.priorities.get("dev"), Some(&300));
            assert_eq!(cfg.routing.priorities.get("prod"), Some(&200));
            assert_eq!(cfg.deployment.probe_merge, ProbeMerge::Deep);

            let probe = cfg.deployment.readiness_probe.unwrap();
            assert_eq!(probe.timeout_seconds, Some(5));
            assert_eq!(probe.tcp_socket.unwrap().port, "9090");
            let health_check = cfg.deployment.health_check.unwrap();
            assert_eq!(health_check.path.as_deref(), Some("/healthz"));
            assert_eq!(health_check.healthy_threshold, Some(2));
            assert_eq!(
                cfg.deployment.resources.unwrap().limits.get("memory").map(String::as_str),
                Some("1536Mi")
            );
            assert_eq!(cfg.secrets.len(), 1);
            assert_eq!(cfg.secrets[0].provider, "ParameterStore");
        }

        #[test]
        pub fn unknown_keys_are_rejected() {
            assert!(matches!(
                File::default_with_user_config("[app]\nport = 1\n"),
                Err(Error::Parse(_))
            ));
        }

        #[test]
        pub fn camel_case_keys_are_rejected() {
            assert!(matches!(
                File::default_with_user_config(
                    "[deployment.readiness_probe]\ntimeoutSeconds = 5\n"
                ),
                Err(Error::Parse(_))
            ));
            assert!(matches!(
                File::default_with_user_config("[deployment.health_check]\nhealthyThreshold = 2\n"),
                Err(Error::Parse(_))
            ));
        }

        #[test]
        pub fn missing_file() {
            assert!(matches!(
                File::default_with_user_config_file("/nonexistent/svcspec.toml"),
                Err(Error::ReadFile { .. })
            ));
        }
    }
}

pub mod runtime {
    use super::file::File;
    use crate::secret::{self, SecretProvider};
    use crate::stack::{StackConfig, Workspace};
    use log::debug;
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    pub enum Error {
        #[error("must have {0} defined")]
        Missing(&'static str),
    }

    /// Values that come from the process environment rather than the config file.
    #[derive(Debug, Clone, Default)]
    pub struct Environment {
        /// dev, qa, stage or prod.
        pub workspace: Option<String>,
        pub account: Option<String>,
        pub region: Option<String>,
        pub image: Option<String>,
    }

    /// Combine the config file with the environment into a buildable stack configuration.
    pub fn stack_config(file: &File, env: &Environment) -> crate::Result<StackConfig> {
        let workspace: Workspace = env
            .workspace
            .as_deref()
            .ok_or(Error::Missing("a workspace"))?
            .parse()?;
        let account = env.account.clone().ok_or(Error::Missing("an AWS account id"))?;
        let region = env.region.clone().ok_or(Error::Missing("an AWS region"))?;
        let image = env
            .image
            .clone()
            .or_else(|| file.app.image.clone())
            .ok_or(Error::Missing("an image tag"))?;
        let app_name = file.app.name.clone().ok_or(Error::Missing("app.name"))?;
        let domain = file
            .routing
            .domain
            .clone()
            .ok_or(Error::Missing("routing.domain"))?;

        let namespace = file
            .app
            .namespace
            .clone()
            .unwrap_or_else(|| workspace.to_string());

        let priority = file
            .routing
            .priority
            .or_else(|| file.routing.priorities.get(&workspace.to_string()).copied())
            .unwrap_or_else(|| workspace.default_priority());
        debug!("workspace {workspace}, listener priority {priority}");

        let external_secrets = file
            .secrets
            .iter()
            .map(|secret| {
                Ok(secret::Config {
                    id: secret.id.clone(),
                    provider: secret.provider.parse::<SecretProvider>()?,
                    namespace: secret.namespace.clone().unwrap_or_else(|| namespace.clone()),
                    keys: secret
                        .keys
                        .iter()
                        .map(|(name, location)| {
                            (
                                name.clone(),
                                location.replace("{workspace}", &workspace.to_string()),
                            )
                        })
                        .collect(),
                    store_name: secret.store_name.clone(),
                    refresh_interval: secret.refresh_interval.clone(),
                })
            })
            .collect::<Result<Vec<_>, secret::Error>>()?;

        Ok(StackConfig {
            app_name,
            service_port: file.app.service_port,
            container_port: file.app.container_port,
            namespace,
            region,
            account,
            workspace,
            image,
            replicas: file.app.replicas,
            priority,
            domain,
            host_header: file.routing.host_header.clone(),
            timeouts: file.deployment.timeouts.clone(),
            readiness_probe: file.deployment.readiness_probe.clone(),
            probe_merge: file.deployment.probe_merge,
            resources: file.deployment.resources.clone(),
            environment_variables: file.deployment.environment.clone(),
            external_secrets,
            health_check: file.deployment.health_check.clone(),
            ssm_parameter_overrides: file.routing.ssm_parameters.clone(),
        })
    }

}
