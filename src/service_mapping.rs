//! DNS and load balancer routing for a deployment.
//!
//! The load balancer, hosted zone and listener are shared infrastructure whose
//! identifiers are published as SSM parameters. A service mapping looks those
//! up and adds:
//!
//! - an `A` alias record `<deployment>.<zone>` pointing at the load balancer,
//! - a listener rule forwarding requests for the host header to the
//!   deployment's target group.
use crate::reference::{Reference, TargetGroupId};
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOAD_BALANCER_ARN_PARAMETER: &str = "/kubernetes/services/ingress/alb/arn";
pub const DEFAULT_HOSTED_ZONE_ID_PARAMETER: &str = "/kubernetes/services/ingress/hosted_zone/id";
pub const DEFAULT_LISTENER_ARN_PARAMETER: &str = "/kubernetes/services/ingress/root_listener/arn";

/// Names of the SSM parameters holding the shared ingress identifiers.
/// Unset names fall back to the cluster-wide defaults.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SsmParameterOverrides {
    pub load_balancer_arn_name: Option<String>,
    pub hosted_zone_id_name: Option<String>,
    pub alb_listener_arn_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub deployment_name: String,
    pub target_group_id: TargetGroupId,
    pub host_header: String,
    pub priority: i64,
    pub ssm_parameter_overrides: Option<SsmParameterOverrides>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMappingSpec {
    pub load_balancer_arn_parameter: ParameterLookup,
    pub hosted_zone_id_parameter: ParameterLookup,
    pub listener_arn_parameter: ParameterLookup,
    pub load_balancer: LoadBalancerLookup,
    pub zone: ZoneLookup,
    pub record: DnsRecord,
    pub listener_rule: ListenerRule,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParameterLookup {
    /// Local name of the lookup.
    pub id: String,
    /// Name of the SSM parameter.
    pub name: String,
}

impl ParameterLookup {
    fn new(deployment_name: &str, purpose: &str, name: String) -> Self {
        Self {
            id: format!("{deployment_name}_{purpose}"),
            name,
        }
    }

    pub fn value(&self) -> Reference {
        Reference::data("aws_ssm_parameter", &self.id, "value")
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LoadBalancerLookup {
    pub id: String,
    pub arn: Reference,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneLookup {
    pub id: String,
    pub zone_id: Reference,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    pub zone_id: Reference,
    pub name: String,
    #[serde(rename = "type")]
    pub typ: String,
    pub alias: Alias,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    pub name: Reference,
    pub zone_id: Reference,
    pub evaluate_target_health: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRule {
    pub listener_arn: Reference,
    pub priority: i64,
    pub action: Vec<ListenerAction>,
    pub condition: Vec<ListenerCondition>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerAction {
    #[serde(rename = "type")]
    pub typ: String,
    pub target_group_arn: TargetGroupId,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerCondition {
    pub host_header: HostHeaderCondition,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HostHeaderCondition {
    pub values: Vec<String>,
}

impl ServiceMappingSpec {
    pub fn build(cfg: Config) -> ServiceMappingSpec {
        let overrides = cfg.ssm_parameter_overrides.unwrap_or_default();
        let deployment = cfg.deployment_name.as_str();

        let load_balancer_arn_parameter = ParameterLookup::new(
            deployment,
            "load_balancer_arn",
            overrides
                .load_balancer_arn_name
                .unwrap_or_else(|| DEFAULT_LOAD_BALANCER_ARN_PARAMETER.to_string()),
        );
        let hosted_zone_id_parameter = ParameterLookup::new(
            deployment,
            "hosted_zone_id",
            overrides
                .hosted_zone_id_name
                .unwrap_or_else(|| DEFAULT_HOSTED_ZONE_ID_PARAMETER.to_string()),
        );
        let listener_arn_parameter = ParameterLookup::new(
            deployment,
            "listener_arn",
            overrides
                .alb_listener_arn_name
                .unwrap_or_else(|| DEFAULT_LISTENER_ARN_PARAMETER.to_string()),
        );
        debug!(
            "service mapping {deployment} reads {}, {} and {}",
            load_balancer_arn_parameter.name,
            hosted_zone_id_parameter.name,
            listener_arn_parameter.name
        );

        let load_balancer = LoadBalancerLookup {
            id: deployment.to_string(),
            arn: load_balancer_arn_parameter.value(),
        };
        let zone = ZoneLookup {
            id: deployment.to_string(),
            zone_id: hosted_zone_id_parameter.value(),
        };

        let zone_name = Reference::data("aws_route53_zone", &zone.id, "name");
        let record = DnsRecord {
            zone_id: Reference::data("aws_route53_zone", &zone.id, "zone_id"),
            name: format!("{deployment}.{zone_name}"),
            typ: "A".to_string(),
            alias: Alias {
                name: Reference::data("aws_alb", &load_balancer.id, "dns_name"),
                zone_id: Reference::data("aws_alb", &load_balancer.id, "zone_id"),
                evaluate_target_health: true,
            },
        };

        let listener_rule = ListenerRule {
            listener_arn: listener_arn_parameter.value(),
            priority: cfg.priority,
            action: vec![ListenerAction {
                typ: "forward".to_string(),
                target_group_arn: cfg.target_group_id,
            }],
            condition: vec![ListenerCondition {
                host_header: HostHeaderCondition {
                    values: vec![cfg.host_header],
                },
            }],
        };

        ServiceMappingSpec {
            load_balancer_arn_parameter,
            hosted_zone_id_parameter,
            listener_arn_parameter,
            load_balancer,
            zone,
            record,
            listener_rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        Config {
            deployment_name: "hello-dev".into(),
            target_group_id: TargetGroupId::for_target_group("hello-dev"),
            host_header: "hello-dev.example.dev".into(),
            priority: 220,
            ssm_parameter_overrides: None,
        }
    }

    #[test]
    fn default_parameter_names() {
        let spec = ServiceMappingSpec::build(config());
        assert_eq!(
            spec.load_balancer_arn_parameter.name,
            "/kubernetes/services/ingress/alb/arn"
        );
        assert_eq!(
            spec.hosted_zone_id_parameter.name,
            "/kubernetes/services/ingress/hosted_zone/id"
        );
        assert_eq!(
            spec.listener_arn_parameter.name,
            "/kubernetes/services/ingress/root_listener/arn"
        );
    }

    #[test]
    fn overridden_parameter_names() {
        let spec = ServiceMappingSpec::build(Config {
            ssm_parameter_overrides: Some(SsmParameterOverrides {
                hosted_zone_id_name: Some("/custom/zone".into()),
                ..Default::default()
            }),
            ..config()
        });
        assert_eq!(spec.hosted_zone_id_parameter.name, "/custom/zone");
        assert_eq!(
            spec.load_balancer_arn_parameter.name,
            DEFAULT_LOAD_BALANCER_ARN_PARAMETER
        );
        assert_eq!(spec.listener_arn_parameter.name, DEFAULT_LISTENER_ARN_PARAMETER);
    }

    #[test]
    fn listener_rule_forwards_to_target_group() {
        let value = serde_json::to_value(ServiceMappingSpec::build(config())).unwrap();
        assert_eq!(
            value["listenerRule"],
            json!({
                "listenerArn": "${data.aws_ssm_parameter.hello-dev_listener_arn.value}",
                "priority": 220,
                "action": [{
                    "type": "forward",
                    "targetGroupArn": "${aws_alb_target_group.hello-dev.arn}",
                }],
                "condition": [{"hostHeader": {"values": ["hello-dev.example.dev"]}}],
            })
        );
    }

    #[test]
    fn alias_record_points_at_load_balancer() {
        let value = serde_json::to_value(ServiceMappingSpec::build(config())).unwrap();
        assert_eq!(
            value["loadBalancer"]["arn"],
            "${data.aws_ssm_parameter.hello-dev_load_balancer_arn.value}"
        );
        assert_eq!(
            value["zone"]["zoneId"],
            "${data.aws_ssm_parameter.hello-dev_hosted_zone_id.value}"
        );
        assert_eq!(
            value["record"],
            json!({
                "zoneId": "${data.aws_route53_zone.hello-dev.zone_id}",
                "name": "hello-dev.${data.aws_route53_zone.hello-dev.name}",
                "type": "A",
                "alias": {
                    "name": "${data.aws_alb.hello-dev.dns_name}",
                    "zoneId": "${data.aws_alb.hello-dev.zone_id}",
                    "evaluateTargetHealth": true,
                },
            })
        );
    }
}
