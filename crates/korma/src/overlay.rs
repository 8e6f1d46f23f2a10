//! Layered environment resolution.
//!
//! A base configuration is a closure producing a [`ResourceSet`]; an
//! [`Overlay`] is a named patch mutating that set for one environment.
//! Resolution is a strict three-step chain, one type per state:
//! [`OverlayResolver::load_base`] runs the base closure,
//! [`BaseLoaded::apply`] runs the overlay patch and
//! [`EnvLoaded::serialize_all`] is terminal, emitting one [`Artifact`] per
//! resource.
//!
//! The aliasing policy is clone-first: the base closure is run fresh for
//! every resolution, so environments resolved from the same base never
//! observe each other's mutations. Within one resolution the patch mutates
//! the environment's own copy in place.

use std::{fmt, path::PathBuf};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::{
    builder::{ConfigMap, CronJob, Deployment, Job, Service},
    render::RenderContext,
    resource::{self, Kind, Resource},
    tree,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no {kind} named {name:?} is defined by the base configuration"))]
    UnresolvedReference { kind: Kind, name: String },

    #[snafu(context(false), display("manifest tree operation failed"))]
    Tree { source: tree::Error },

    #[snafu(display("failed to serialize {kind} {name:?}"))]
    Serialize {
        source: resource::Error,
        kind: Kind,
        name: String,
    },
}

/// One docker image build spec exported by a base configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuild {
    /// Image name without the registry host, e.g. `avengers/adminweb`.
    pub image: String,
    pub version: String,
    pub context_dir: PathBuf,
    /// Dockerfile template, rendered by the template collaborator.
    pub template: String,
    /// Flat key/value context the template is rendered with.
    pub context: IndexMap<String, JsonValue>,
    /// Extra templates pre-rendered and exposed to the main template.
    pub includes: IndexMap<String, PathBuf>,
}

impl ImageBuild {
    pub fn new(image: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            version: version.into(),
            context_dir: PathBuf::from("."),
            template: "Dockerfile".to_owned(),
            context: IndexMap::new(),
            includes: IndexMap::new(),
        }
    }

    /// The full image reference, e.g. `reg.example.com/avengers/adminweb:1.0`.
    pub fn image_reference(&self, registry: &str) -> String {
        format!(
            "{registry}/{image}:{version}",
            image = self.image,
            version = self.version
        )
    }
}

/// The object graph one environment deploys: image build specs plus the
/// resources grouped under it, both in insertion order.
#[derive(Clone, Debug, Default)]
pub struct ResourceSet {
    images: Vec<ImageBuild>,
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: impl Into<Resource>) {
        self.resources.push(resource.into());
    }

    pub fn push_image(&mut self, image: ImageBuild) {
        self.images.push(image);
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn images(&self) -> &[ImageBuild] {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut Vec<ImageBuild> {
        &mut self.images
    }

    /// Looks up a resource by kind and name. Referencing a name the base
    /// configuration never defined is an [`Error::UnresolvedReference`],
    /// never silently ignored.
    pub fn resource_mut(&mut self, kind: Kind, name: &str) -> Result<&mut Resource> {
        self.resources
            .iter_mut()
            .find(|resource| resource.kind() == kind && resource.name() == name)
            .context(UnresolvedReferenceSnafu { kind, name })
    }

    pub fn deployment_mut(&mut self, name: &str) -> Result<&mut Deployment> {
        self.resources
            .iter_mut()
            .find_map(|resource| match resource {
                Resource::Deployment(deployment) if deployment.name() == name => Some(deployment),
                _ => None,
            })
            .context(UnresolvedReferenceSnafu {
                kind: Kind::Deployment,
                name,
            })
    }

    pub fn cron_job_mut(&mut self, name: &str) -> Result<&mut CronJob> {
        self.resources
            .iter_mut()
            .find_map(|resource| match resource {
                Resource::CronJob(cron_job) if cron_job.name() == name => Some(cron_job),
                _ => None,
            })
            .context(UnresolvedReferenceSnafu {
                kind: Kind::CronJob,
                name,
            })
    }

    pub fn job_mut(&mut self, name: &str) -> Result<&mut Job> {
        self.resources
            .iter_mut()
            .find_map(|resource| match resource {
                Resource::Job(job) if job.name() == name => Some(job),
                _ => None,
            })
            .context(UnresolvedReferenceSnafu {
                kind: Kind::Job,
                name,
            })
    }

    pub fn service_mut(&mut self, name: &str) -> Result<&mut Service> {
        self.resources
            .iter_mut()
            .find_map(|resource| match resource {
                Resource::Service(service) if service.name() == name => Some(service),
                _ => None,
            })
            .context(UnresolvedReferenceSnafu {
                kind: Kind::Service,
                name,
            })
    }

    pub fn config_map_mut(&mut self, name: &str) -> Result<&mut ConfigMap> {
        self.resources
            .iter_mut()
            .find_map(|resource| match resource {
                Resource::ConfigMap(config_map) if config_map.name() == name => Some(config_map),
                _ => None,
            })
            .context(UnresolvedReferenceSnafu {
                kind: Kind::ConfigMap,
                name,
            })
    }

    /// Removes and returns a resource, for overlays that drop base objects.
    pub fn remove(&mut self, kind: Kind, name: &str) -> Result<Resource> {
        let index = self
            .resources
            .iter()
            .position(|resource| resource.kind() == kind && resource.name() == name)
            .context(UnresolvedReferenceSnafu { kind, name })?;
        Ok(self.resources.remove(index))
    }
}

/// A named environment patch on top of the base configuration.
pub struct Overlay {
    name: String,
    registry: String,
    patch: Box<dyn Fn(&mut ResourceSet) -> Result<()>>,
}

impl Overlay {
    pub fn new(
        name: impl Into<String>,
        registry: impl Into<String>,
        patch: impl Fn(&mut ResourceSet) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            registry: registry.into(),
            patch: Box::new(patch),
        }
    }

    /// An overlay that deploys the base configuration unchanged.
    pub fn unchanged(name: impl Into<String>, registry: impl Into<String>) -> Self {
        Self::new(name, registry, |_| Ok(()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Entry point of the resolution chain.
pub struct OverlayResolver;

impl OverlayResolver {
    /// Runs the base builder, producing a fresh set for this resolution.
    pub fn load_base<B>(base: B) -> Result<BaseLoaded>
    where
        B: FnOnce() -> Result<ResourceSet>,
    {
        let set = base()?;
        debug!(
            resources = set.resources.len(),
            images = set.images.len(),
            "loaded base configuration"
        );
        Ok(BaseLoaded { set })
    }
}

/// The base configuration has been built; an overlay can now be applied.
#[derive(Debug)]
pub struct BaseLoaded {
    set: ResourceSet,
}

impl BaseLoaded {
    pub fn apply(mut self, overlay: &Overlay) -> Result<EnvLoaded> {
        debug!(environment = overlay.name, "applying overlay");
        (overlay.patch)(&mut self.set)?;
        Ok(EnvLoaded {
            set: self.set,
            environment: overlay.name.clone(),
            registry: overlay.registry.clone(),
        })
    }
}

/// The environment's object graph, ready to serialize. Terminal state.
#[derive(Debug)]
pub struct EnvLoaded {
    set: ResourceSet,
    environment: String,
    registry: String,
}

impl EnvLoaded {
    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn set(&self) -> &ResourceSet {
        &self.set
    }

    /// Serializes every resource, in insertion order, into one artifact each.
    pub fn serialize_all(&self, ctx: &RenderContext) -> Result<Vec<Artifact>> {
        self.set
            .resources
            .iter()
            .map(|resource| {
                let manifest = resource.serialize(ctx).context(SerializeSnafu {
                    kind: resource.kind(),
                    name: resource.name(),
                })?;
                Ok(Artifact {
                    kind: resource.kind(),
                    name: resource.name().to_owned(),
                    manifest,
                })
            })
            .collect()
    }
}

/// One serialized manifest, ready to write and apply.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub kind: Kind,
    pub name: String,
    pub manifest: JsonValue,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        format!(
            "{kind}-{name}.json",
            kind = self.kind.to_string().to_lowercase(),
            name = self.name
        )
    }
}
