use serde::Serialize;

/// A Kubernetes resource type with a fixed API group and kind.
pub trait ApiResource {
    /// Full API version, e.g. `external-secrets.io/v1beta1`.
    const API_VERSION: &'static str;
    const KIND: &'static str;
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Metadata {
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

/// A complete Kubernetes manifest, handed to the provisioning engine as-is.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest<S> {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: S,
}

impl<S: ApiResource> Manifest<S> {
    pub fn new(metadata: Metadata, spec: S) -> Self {
        Self {
            api_version: S::API_VERSION.to_string(),
            kind: S::KIND.to_string(),
            metadata,
            spec,
        }
    }
}
