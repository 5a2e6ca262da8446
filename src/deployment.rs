//! Kubernetes service deployment.
//!
//! Validates workload parameters and renders everything needed to run the
//! application behind the shared load balancer:
//!
//! 1. a Deployment running the container,
//! 2. a ClusterIP Service in front of it,
//! 3. an ALB target group in the cluster VPC,
//! 4. a TargetGroupBinding registering the Service's pods in that target group.
//!
//! The target group identifier is returned in [DeploymentOutputs] so that the
//! service mapping can route traffic to it.
use crate::manifest::{ApiResource, Manifest, Metadata};
use crate::reference::{Reference, TargetGroupId};
use crate::secret::ExternalSecretSpec;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/actuator/health";
pub const DEFAULT_TIMEOUT: &str = "5m";
const IMAGE_PULL_POLICY: &str = "IfNotPresent";
const IMAGE_PULL_SECRET: &str = "docker-registry";
const PROTOCOL: &str = "TCP";
const VPC_NAME: &str = "services";
const TARGET_GROUP_PORT: u16 = 80;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("must provide a valid port, got {0}")]
    InvalidServicePort(i64),

    #[error("replicas must be between 0 and 2147483647, got {0}")]
    InvalidReplicas(i64),
}

/// A single container environment variable.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(into = "EnvVar")]
pub enum EnvironmentVariable {
    Literal {
        name: String,
        value: String,
    },
    SecretRef {
        name: String,
        secret_name: String,
        secret_key: String,
    },
}

impl EnvironmentVariable {
    pub fn name(&self) -> &str {
        match self {
            EnvironmentVariable::Literal { name, .. } => name,
            EnvironmentVariable::SecretRef { name, .. } => name,
        }
    }
}

/// Kubernetes wire format of [EnvironmentVariable].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvVar {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_from: Option<EnvVarSource>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvVarSource {
    secret_key_ref: SecretKeySelector,
}

#[derive(Serialize)]
struct SecretKeySelector {
    name: String,
    key: String,
}

impl From<EnvironmentVariable> for EnvVar {
    fn from(var: EnvironmentVariable) -> Self {
        match var {
            EnvironmentVariable::Literal { name, value } => EnvVar {
                name,
                value: Some(value),
                value_from: None,
            },
            EnvironmentVariable::SecretRef {
                name,
                secret_name,
                secret_key,
            } => EnvVar {
                name,
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: SecretKeySelector {
                        name: secret_name,
                        key: secret_key,
                    },
                }),
            },
        }
    }
}

/// Container readiness probe. Every field is optional so that a caller-supplied
/// probe can be layered over the defaults.
///
/// Read with snake_case keys like the rest of the config file, rendered with
/// the camelCase keys of the Kubernetes API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(
    rename_all(serialize = "camelCase", deserialize = "snake_case"),
    deny_unknown_fields
)]
pub struct Probe {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpSocketAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HttpGetAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TcpSocketAction {
    pub port: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecAction {
    pub command: Vec<String>,
}

impl Probe {
    /// Timing applied to every readiness probe unless the caller overrides it.
    pub fn envelope() -> Self {
        Self {
            timeout_seconds: Some(15),
            period_seconds: Some(20),
            success_threshold: Some(1),
            failure_threshold: Some(3),
            ..Default::default()
        }
    }

    /// `GET /actuator/health` on the container port.
    pub fn default_body(container_port: u16) -> Self {
        Self {
            http_get: Some(HttpGetAction {
                path: Some(DEFAULT_HEALTH_CHECK_PATH.to_string()),
                port: Some(container_port.to_string()),
                scheme: Some("HTTP".to_string()),
                host: None,
            }),
            ..Default::default()
        }
    }

    /// Every top-level field set in `top` replaces the one in `self`.
    /// Nested sections are replaced as a whole.
    pub fn overlay(self, top: Probe) -> Probe {
        Probe {
            timeout_seconds: top.timeout_seconds.or(self.timeout_seconds),
            period_seconds: top.period_seconds.or(self.period_seconds),
            success_threshold: top.success_threshold.or(self.success_threshold),
            failure_threshold: top.failure_threshold.or(self.failure_threshold),
            initial_delay_seconds: top.initial_delay_seconds.or(self.initial_delay_seconds),
            http_get: top.http_get.or(self.http_get),
            tcp_socket: top.tcp_socket.or(self.tcp_socket),
            exec: top.exec.or(self.exec),
        }
    }

    pub fn has_handler(&self) -> bool {
        self.http_get.is_some() || self.tcp_socket.is_some() || self.exec.is_some()
    }
}

impl HttpGetAction {
    fn fill_from(&mut self, defaults: &HttpGetAction) {
        self.path = self.path.take().or_else(|| defaults.path.clone());
        self.port = self.port.take().or_else(|| defaults.port.clone());
        self.scheme = self.scheme.take().or_else(|| defaults.scheme.clone());
        self.host = self.host.take().or_else(|| defaults.host.clone());
    }
}

/// How a caller-supplied readiness probe is combined with the default one.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMerge {
    /// The caller's probe is laid over the timing envelope key by key.
    /// Supplying any probe drops the default `httpGet` section entirely,
    /// even when the caller's probe has no handler of its own.
    #[default]
    Shallow,

    /// Like `Shallow`, but a probe without a handler keeps the default
    /// `httpGet`, and a partial `httpGet` is completed from the default.
    Deep,
}

impl ProbeMerge {
    pub fn merge(&self, container_port: u16, custom: Option<&Probe>) -> Probe {
        let default_body = Probe::default_body(container_port);
        let body = match (self, custom) {
            (_, None) => default_body,
            (ProbeMerge::Shallow, Some(custom)) => custom.clone(),
            (ProbeMerge::Deep, Some(custom)) => {
                let mut custom = custom.clone();
                if let (Some(http_get), Some(defaults)) =
                    (custom.http_get.as_mut(), default_body.http_get.as_ref())
                {
                    http_get.fill_from(defaults);
                }
                if custom.has_handler() {
                    custom
                } else {
                    default_body.overlay(custom)
                }
            }
        };
        Probe::envelope().overlay(body)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

impl Timeouts {
    fn standard() -> Self {
        Self {
            create: Some(DEFAULT_TIMEOUT.to_string()),
            update: Some(DEFAULT_TIMEOUT.to_string()),
            delete: Some(DEFAULT_TIMEOUT.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Load balancer target group health check. Keys follow the same convention
/// as [`Probe`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(
    rename_all(serialize = "camelCase", deserialize = "snake_case"),
    deny_unknown_fields
)]
pub struct HealthCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold: Option<u32>,
}

/// Input parameters to a deployment.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Short name of the application, without namespace or workspace.
    pub app_name: String,
    /// Must be within 1..=65535.
    pub service_port: i64,
    pub container_port: u16,
    pub namespace: String,
    pub workspace: String,
    pub image: String,
    /// Must be within 0..=i32::MAX, the range of the Kubernetes `replicas` field.
    pub replicas: i64,
    pub timeouts: Option<Timeouts>,
    pub readiness_probe: Option<Probe>,
    pub probe_merge: ProbeMerge,
    pub resources: Option<ResourceRequirements>,
    /// Plain environment variables, rendered before any secret.
    pub environment_variables: BTreeMap<String, String>,
    pub external_secrets: Vec<ExternalSecretSpec>,
    pub health_check: Option<HealthCheck>,
}

/// Values produced by the deployment for use by later builders.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutputs {
    /// `<app>-<workspace>`, shared by the Deployment, Service and target group.
    pub derived_name: String,
    pub target_group_id: TargetGroupId,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub deployment: Workload,
    pub service: Manifest<ServiceBody>,
    pub vpc: VpcLookup,
    pub target_group: TargetGroup,
    pub target_group_binding: Manifest<TargetGroupBindingBody>,
}

/// The Deployment manifest together with how long the engine may wait for it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Workload {
    pub timeouts: Timeouts,
    #[serde(flatten)]
    pub manifest: Manifest<DeploymentBody>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeploymentBody {
    pub replicas: i32,
    pub selector: LabelSelector,
    pub template: PodTemplate,
}

impl ApiResource for DeploymentBody {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "Deployment";
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PodTemplate {
    pub metadata: TemplateMetadata,
    pub spec: PodSpec,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TemplateMetadata {
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    pub node_selector: BTreeMap<String, String>,
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,
    pub ports: Vec<ContainerPort>,
    pub readiness_probe: Probe,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    pub env: Vec<EnvironmentVariable>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServiceBody {
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    #[serde(rename = "type")]
    pub typ: String,
}

impl ApiResource for ServiceBody {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Service";
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub port: u16,
    pub target_port: String,
    pub protocol: String,
}

/// Lookup of the VPC hosting the cluster.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VpcLookup {
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroup {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub target_type: String,
    pub vpc_id: Reference,
    pub lifecycle: Lifecycle,
    pub health_check: HealthCheck,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    pub create_before_destroy: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingBody {
    pub target_type: String,
    pub service_ref: ServiceReference,
    #[serde(rename = "targetGroupARN")]
    pub target_group_arn: TargetGroupId,
}

impl ApiResource for TargetGroupBindingBody {
    const API_VERSION: &'static str = "elbv2.k8s.aws/v1beta1";
    const KIND: &'static str = "TargetGroupBinding";
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServiceReference {
    pub name: String,
    pub port: u16,
}

/// Literal variables first, then the secret references of each external secret
/// in declaration order.
///
/// Names are not deduplicated. A name present in both sets is logged and
/// rendered twice; which value wins is up to the platform.
pub fn compose_environment(
    literals: &BTreeMap<String, String>,
    external_secrets: &[ExternalSecretSpec],
) -> Vec<EnvironmentVariable> {
    let mut env: Vec<EnvironmentVariable> = literals
        .iter()
        .map(|(name, value)| EnvironmentVariable::Literal {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();

    let mut seen: BTreeSet<String> = literals.keys().cloned().collect();
    for var in external_secrets
        .iter()
        .flat_map(ExternalSecretSpec::environment_variables)
    {
        if !seen.insert(var.name().to_string()) {
            warn!("environment variable {} is defined more than once", var.name());
        }
        env.push(var);
    }

    env
}

impl DeploymentSpec {
    pub fn build(cfg: Config) -> Result<(DeploymentSpec, DeploymentOutputs), Error> {
        let service_port = u16::try_from(cfg.service_port)
            .ok()
            .filter(|port| *port >= 1)
            .ok_or(Error::InvalidServicePort(cfg.service_port))?;
        let replicas = i32::try_from(cfg.replicas)
            .ok()
            .filter(|replicas| *replicas >= 0)
            .ok_or(Error::InvalidReplicas(cfg.replicas))?;

        let name = format!("{}-{}", cfg.app_name, cfg.workspace);
        debug!("deployment name: {name}");

        let labels = BTreeMap::from([("app".to_string(), cfg.app_name.clone())]);
        let env = compose_environment(&cfg.environment_variables, &cfg.external_secrets);
        let readiness_probe = cfg
            .probe_merge
            .merge(cfg.container_port, cfg.readiness_probe.as_ref());

        let timeouts = cfg.timeouts.unwrap_or_else(|| {
            debug!("using default timeouts of {DEFAULT_TIMEOUT}");
            Timeouts::standard()
        });

        let deployment = Workload {
            timeouts,
            manifest: Manifest::new(
                Metadata::namespaced(&name, &cfg.namespace),
                DeploymentBody {
                    replicas,
                    selector: LabelSelector {
                        match_labels: labels.clone(),
                    },
                    template: PodTemplate {
                        metadata: TemplateMetadata {
                            labels: labels.clone(),
                        },
                        spec: PodSpec {
                            containers: vec![Container {
                                name: cfg.app_name.clone(),
                                image: cfg.image,
                                image_pull_policy: IMAGE_PULL_POLICY.to_string(),
                                ports: vec![ContainerPort {
                                    container_port: cfg.container_port,
                                    protocol: PROTOCOL.to_string(),
                                }],
                                readiness_probe,
                                resources: cfg.resources,
                                env,
                            }],
                            node_selector: BTreeMap::from([(
                                "platform".to_string(),
                                "x86".to_string(),
                            )]),
                            image_pull_secrets: vec![LocalObjectReference {
                                name: IMAGE_PULL_SECRET.to_string(),
                            }],
                        },
                    },
                },
            ),
        };

        let service = Manifest::new(
            Metadata::namespaced(&name, &cfg.namespace),
            ServiceBody {
                selector: labels,
                ports: vec![ServicePort {
                    port: service_port,
                    target_port: cfg.container_port.to_string(),
                    protocol: PROTOCOL.to_string(),
                }],
                typ: "ClusterIP".to_string(),
            },
        );

        let vpc = VpcLookup {
            name: name.clone(),
            tags: BTreeMap::from([("Name".to_string(), VPC_NAME.to_string())]),
        };

        let target_group = TargetGroup {
            name: name.clone(),
            port: TARGET_GROUP_PORT,
            protocol: "HTTP".to_string(),
            target_type: "ip".to_string(),
            vpc_id: Reference::data("aws_vpc", &vpc.name, "id"),
            lifecycle: Lifecycle {
                create_before_destroy: true,
            },
            health_check: cfg.health_check.unwrap_or_else(|| HealthCheck {
                path: Some(DEFAULT_HEALTH_CHECK_PATH.to_string()),
                ..Default::default()
            }),
        };
        let target_group_id = TargetGroupId::for_target_group(&target_group.name);

        let target_group_binding = Manifest::new(
            Metadata::namespaced(&cfg.app_name, &cfg.namespace),
            TargetGroupBindingBody {
                target_type: "ip".to_string(),
                service_ref: ServiceReference {
                    name: name.clone(),
                    port: service_port,
                },
                target_group_arn: target_group_id.clone(),
            },
        );

        Ok((
            DeploymentSpec {
                deployment,
                service,
                vpc,
                target_group,
                target_group_binding,
            },
            DeploymentOutputs {
                derived_name: name,
                target_group_id,
            },
        ))
    }
}
