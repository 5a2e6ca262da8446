//! Service stack synthesis.
//!
//! Turns a handful of application parameters into the full set of
//! declarative resources needed to run a service on the shared cluster:
//! external secrets, the Kubernetes workload and its load balancer wiring,
//! DNS and listener routing, and the state backend location.
//!
//! Nothing here talks to a cluster or a cloud API. The resulting [stack::Stack]
//! is handed to the provisioning engine, which applies it.
use thiserror::Error;

pub mod backend;
pub mod config;
pub mod deployment;
pub mod manifest;
pub mod naming;
pub mod reference;
pub mod secret;
pub mod service_mapping;
pub mod stack;

#[derive(Error, Debug)]
pub enum Error {
    #[error("external secret: {0}")]
    Secret(#[from] secret::Error),

    #[error("deployment: {0}")]
    Deployment(#[from] deployment::Error),

    #[error("unknown workspace {0}, expected one of dev, qa, stage, prod")]
    UnknownWorkspace(String),

    #[error("configuration file: {0}")]
    ConfigFile(#[from] config::file::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::runtime::Error),

    #[error("render json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("render yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Broad classification of [Error].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A value is out of range or does not follow its grammar.
    Validation,
    /// A secret provider is unknown, or lacks a default it was asked for.
    UnsupportedProvider,
    /// Configuration could not be read or is incomplete.
    Config,
    /// The finished stack could not be serialized.
    Render,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Secret(secret::Error::UnsupportedProvider(_))
            | Error::Secret(secret::Error::NoDefaultStore(_)) => ErrorKind::UnsupportedProvider,
            Error::Secret(_) | Error::Deployment(_) | Error::UnknownWorkspace(_) => {
                ErrorKind::Validation
            }
            Error::ConfigFile(_) | Error::Config(_) => ErrorKind::Config,
            Error::Json(_) | Error::Yaml(_) => ErrorKind::Render,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
