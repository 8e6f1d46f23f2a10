//! Korma builds Kubernetes manifests from a layered configuration: a base
//! object graph of [`resource::Resource`]s, composed from open manifest
//! trees ([`tree::Node`]), gets patched by per-environment
//! [`overlay::Overlay`]s and deterministically serialized into the JSON the
//! cluster expects.
//!
//! The crate is the manifest engine only. Process execution (docker,
//! kubectl) and text templating are collaborator seams, see
//! [`deploy::ProcessRunner`] and [`render::TemplateRenderer`].

pub mod builder;
pub mod deploy;
pub mod overlay;
pub mod render;
pub mod resource;
pub mod tree;
pub mod versions;

pub use crate::{
    builder::{ConfigMapBuilder, CronJobBuilder, DeploymentBuilder, JobBuilder, ServiceBuilder},
    overlay::{ImageBuild, Overlay, OverlayResolver, ResourceSet},
    render::RenderContext,
    resource::{Kind, Resource},
    tree::Node,
    versions::VersionMap,
};
