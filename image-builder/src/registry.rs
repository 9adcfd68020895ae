//! Registry mirrors for prebuilt images.
//!
//! Images are pulled from the first mirror that answers, in tier order.

use crate::ImageVariant;
use serde::{Deserialize, Serialize};

pub const GHCR_REGISTRY: &str = "ghcr.io";
pub const QUAY_REGISTRY: &str = "quay.io";
pub const DOCKER_HUB_REGISTRY: &str = "docker.io";
const UPSTREAM_NAMESPACE: &str = "docling-project";
const IMAGE_NAME: &str = "docling-serve";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegistryTier {
    Primary,
    Secondary,
    Tertiary,
}

impl std::fmt::Display for RegistryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryTier::Primary => write!(f, "primary"),
            RegistryTier::Secondary => write!(f, "secondary"),
            RegistryTier::Tertiary => write!(f, "tertiary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMirror {
    pub tier: RegistryTier,
    pub registry: String,
    pub repository: String,
}

impl RegistryMirror {
    /// Full image reference for `tag`
    pub fn reference(&self, tag: &str) -> String {
        format!("{}/{}:{}", self.registry, self.repository, tag)
    }
}

/// Repository name for a variant, e.g. `docling-serve-cu128`
pub fn repository_name(variant: ImageVariant) -> String {
    format!("{}{}", IMAGE_NAME, variant.image_suffix())
}

/// Mirrors to try, in order. Docker Hub is only included when a username is
/// configured since there is no upstream Docker Hub namespace.
pub fn mirror_chain(docker_hub_username: Option<&str>, variant: ImageVariant) -> Vec<RegistryMirror> {
    let repo = repository_name(variant);
    let mut chain = Vec::with_capacity(3);

    if let Some(user) = docker_hub_username.map(str::trim).filter(|u| !u.is_empty()) {
        chain.push(RegistryMirror {
            tier: RegistryTier::Primary,
            registry: DOCKER_HUB_REGISTRY.to_string(),
            repository: format!("{}/{}", user, repo),
        });
    }

    chain.push(RegistryMirror {
        tier: RegistryTier::Secondary,
        registry: GHCR_REGISTRY.to_string(),
        repository: format!("{}/{}", UPSTREAM_NAMESPACE, repo),
    });
    chain.push(RegistryMirror {
        tier: RegistryTier::Tertiary,
        registry: QUAY_REGISTRY.to_string(),
        repository: format!("{}/{}", UPSTREAM_NAMESPACE, repo),
    });

    chain
}
