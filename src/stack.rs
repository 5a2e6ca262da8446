//! A complete service stack.
//!
//! Builds, in order and stopping at the first error:
//! state backend, external secrets, deployment, service mapping.
//! The deployment's outputs are handed to the service mapping explicitly.
use crate::backend::StateBackend;
use crate::deployment::{
    self, DeploymentOutputs, DeploymentSpec, HealthCheck, Probe, ProbeMerge, ResourceRequirements,
    Timeouts,
};
use crate::manifest::Manifest;
use crate::secret::{self, ExternalSecretBody, ExternalSecretSpec};
use crate::service_mapping::{self, ServiceMappingSpec, SsmParameterOverrides};
use crate::Error;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Workspace {
    Dev,
    Qa,
    Stage,
    Prod,
}

impl Workspace {
    pub const ALL: [Workspace; 4] = [
        Workspace::Dev,
        Workspace::Qa,
        Workspace::Stage,
        Workspace::Prod,
    ];

    /// Listener rule priority used when none is configured.
    /// Each workspace gets its own slot on the shared listener.
    pub fn default_priority(&self) -> i64 {
        match self {
            Workspace::Prod => 200,
            Workspace::Stage => 210,
            Workspace::Dev => 220,
            Workspace::Qa => 230,
        }
    }
}

impl Display for Workspace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Workspace::Dev => "dev",
            Workspace::Qa => "qa",
            Workspace::Stage => "stage",
            Workspace::Prod => "prod",
        })
    }
}

impl FromStr for Workspace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Workspace::ALL
            .into_iter()
            .find(|workspace| workspace.to_string() == s)
            .ok_or_else(|| Error::UnknownWorkspace(s.to_string()))
    }
}

/// Everything needed to build a stack. Sourcing these values is the caller's job.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub app_name: String,
    pub service_port: i64,
    pub container_port: u16,
    pub namespace: String,
    pub region: String,
    pub account: String,
    pub workspace: Workspace,
    pub image: String,
    pub replicas: i64,
    pub priority: i64,
    /// DNS domain appended to the deployment name to form the default host header.
    pub domain: String,
    pub host_header: Option<String>,
    pub timeouts: Option<Timeouts>,
    pub readiness_probe: Option<Probe>,
    pub probe_merge: ProbeMerge,
    pub resources: Option<ResourceRequirements>,
    pub environment_variables: BTreeMap<String, String>,
    pub external_secrets: Vec<secret::Config>,
    pub health_check: Option<HealthCheck>,
    pub ssm_parameter_overrides: Option<SsmParameterOverrides>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub backend: StateBackend,
    pub external_secrets: Vec<Manifest<ExternalSecretBody>>,
    #[serde(flatten)]
    pub deployment: DeploymentSpec,
    pub outputs: DeploymentOutputs,
    pub service_mapping: ServiceMappingSpec,
}

impl Stack {
    pub fn build(cfg: StackConfig) -> Result<Stack, Error> {
        let backend = StateBackend::new(&cfg.app_name, &cfg.region, &cfg.account);

        let external_secrets = cfg
            .external_secrets
            .into_iter()
            .map(ExternalSecretSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("{} external secrets built", external_secrets.len());

        let secret_manifests = external_secrets
            .iter()
            .map(|spec| spec.manifest().clone())
            .collect();

        let (deployment, outputs) = DeploymentSpec::build(deployment::Config {
            app_name: cfg.app_name,
            service_port: cfg.service_port,
            container_port: cfg.container_port,
            namespace: cfg.namespace,
            workspace: cfg.workspace.to_string(),
            image: cfg.image,
            replicas: cfg.replicas,
            timeouts: cfg.timeouts,
            readiness_probe: cfg.readiness_probe,
            probe_merge: cfg.probe_merge,
            resources: cfg.resources,
            environment_variables: cfg.environment_variables,
            external_secrets,
            health_check: cfg.health_check,
        })?;

        let host_header = cfg
            .host_header
            .unwrap_or_else(|| format!("{}.{}", outputs.derived_name, cfg.domain));
        debug!("routing {host_header} to {}", outputs.target_group_id);

        let service_mapping = ServiceMappingSpec::build(service_mapping::Config {
            deployment_name: outputs.derived_name.clone(),
            target_group_id: outputs.target_group_id.clone(),
            host_header,
            priority: cfg.priority,
            ssm_parameter_overrides: cfg.ssm_parameter_overrides,
        });

        Ok(Stack {
            backend,
            external_secrets: secret_manifests,
            deployment,
            outputs,
            service_mapping,
        })
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretProvider;
    use crate::ErrorKind;

    fn config() -> StackConfig {
        StackConfig {
            app_name: "hello".into(),
            service_port: 8080,
            container_port: 8080,
            namespace: "dev".into(),
            region: "us-west-2".into(),
            account: "123456789012".into(),
            workspace: Workspace::Dev,
            image: "hello:1".into(),
            replicas: 1,
            priority: 220,
            domain: "example.dev".into(),
            host_header: None,
            timeouts: None,
            readiness_probe: None,
            probe_merge: ProbeMerge::Shallow,
            resources: None,
            environment_variables: BTreeMap::new(),
            external_secrets: vec![],
            health_check: None,
            ssm_parameter_overrides: None,
        }
    }

    #[test]
    fn workspaces() {
        for workspace in Workspace::ALL {
            assert_eq!(workspace.to_string().parse::<Workspace>().ok(), Some(workspace));
        }
        assert!(matches!(
            "production".parse::<Workspace>(),
            Err(Error::UnknownWorkspace(_))
        ));
        assert_eq!(Workspace::Prod.default_priority(), 200);
        assert_eq!(Workspace::Qa.default_priority(), 230);
    }

    #[test]
    fn target_group_flows_into_listener_rule() {
        let stack = Stack::build(config()).unwrap();
        assert_eq!(
            stack.service_mapping.listener_rule.action[0].target_group_arn,
            stack.outputs.target_group_id
        );
        assert_eq!(
            stack.deployment.target_group_binding.spec.target_group_arn,
            stack.outputs.target_group_id
        );
        assert_eq!(
            stack.service_mapping.listener_rule.condition[0].host_header.values,
            ["hello-dev.example.dev"]
        );
    }

    #[test]
    fn explicit_host_header_wins() {
        let stack = Stack::build(StackConfig {
            host_header: Some("hello.internal".into()),
            ..config()
        })
        .unwrap();
        assert_eq!(
            stack.service_mapping.listener_rule.condition[0].host_header.values,
            ["hello.internal"]
        );
    }

    #[test]
    fn secret_errors_abort_the_stack() {
        let err = Stack::build(StackConfig {
            external_secrets: vec![secret::Config {
                id: "Db".into(),
                provider: SecretProvider::SecretsManager,
                namespace: "dev".into(),
                keys: BTreeMap::from([("DB_USER".to_string(), "dev/db:user".to_string())]),
                store_name: None,
                refresh_interval: None,
            }],
            ..config()
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
    }

    #[test]
    fn deployment_errors_abort_the_stack() {
        let err = Stack::build(StackConfig {
            service_port: 70000,
            ..config()
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn renders_json_and_yaml() {
        let stack = Stack::build(config()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&stack.to_json().unwrap()).unwrap();
        assert_eq!(json["backend"]["key"], "service/hello/terraform.tfstate");
        assert_eq!(json["deployment"]["kind"], "Deployment");
        assert_eq!(json["outputs"]["derivedName"], "hello-dev");

        let yaml = stack.to_yaml().unwrap();
        assert!(yaml.contains("kind: TargetGroupBinding"));
    }
}
