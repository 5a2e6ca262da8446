use serde::Serialize;
use std::fmt::{Display, Formatter};

/// A value that only exists once the provisioning engine has applied the stack,
/// such as an ARN, a DNS name, or the contents of a looked-up parameter.
///
/// Rendered in the engine's interpolation syntax, e.g.
/// `${aws_alb_target_group.hello-dev.arn}` or `${data.aws_ssm_parameter.x.value}`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Attribute of a resource managed by the stack.
    pub fn resource(typ: &str, name: &str, attribute: &str) -> Self {
        Self(format!("${{{typ}.{}.{attribute}}}", local_name(name)))
    }

    /// Attribute of a read-only lookup.
    pub fn data(typ: &str, name: &str, attribute: &str) -> Self {
        Self(format!("${{data.{typ}.{}.{attribute}}}", local_name(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The engine accepts letters, digits, `_` and `-` in local names,
/// which must start with a letter or `_`.
pub fn local_name(name: &str) -> String {
    let escaped: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    match escaped.chars().next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => escaped,
        _ => format!("_{escaped}"),
    }
}

/// Identifier of the load balancer target group created for a deployment.
///
/// Produced by the deployment builder and passed explicitly to the service
/// mapping builder.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct TargetGroupId(Reference);

impl TargetGroupId {
    pub(crate) fn for_target_group(name: &str) -> Self {
        Self(Reference::resource("aws_alb_target_group", name, "arn"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for TargetGroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
