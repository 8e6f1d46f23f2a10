//! The buildable resource kinds and their common serialization surface.

use serde_json::{Map, Value as JsonValue};
use snafu::{ResultExt, Snafu};

use crate::{
    builder::{ConfigMap, CronJob, Deployment, Job, Service, configmap},
    render::RenderContext,
    tree,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize the manifest tree of {kind} {name:?}"))]
    Tree {
        source: tree::Error,
        kind: Kind,
        name: String,
    },

    #[snafu(display("failed to prepare the data of ConfigMap {name:?}"))]
    ConfigMapData {
        source: configmap::Error,
        name: String,
    },
}

/// The manifest kinds this crate can build, with their wire-format names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum Kind {
    Deployment,
    CronJob,
    Job,
    Service,
    ConfigMap,
}

impl Kind {
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Deployment => "apps/v1",
            Self::CronJob | Self::Job => "batch/v1",
            Self::Service | Self::ConfigMap => "v1",
        }
    }
}

/// The shared `{apiVersion, kind}` envelope every manifest starts from.
pub(crate) fn envelope(kind: Kind) -> Map<String, JsonValue> {
    let mut manifest = Map::new();
    manifest.insert("apiVersion".to_owned(), kind.api_version().into());
    manifest.insert("kind".to_owned(), kind.to_string().into());
    manifest
}

/// One buildable unit of cluster configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Deployment(Deployment),
    CronJob(CronJob),
    Job(Job),
    Service(Service),
    ConfigMap(ConfigMap),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Deployment(_) => Kind::Deployment,
            Self::CronJob(_) => Kind::CronJob,
            Self::Job(_) => Kind::Job,
            Self::Service(_) => Kind::Service,
            Self::ConfigMap(_) => Kind::ConfigMap,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Deployment(deployment) => deployment.name(),
            Self::CronJob(cron_job) => cron_job.name(),
            Self::Job(job) => job.name(),
            Self::Service(service) => service.name(),
            Self::ConfigMap(config_map) => config_map.name(),
        }
    }

    /// Renames the resource, propagating to every kind-mandated name path.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), tree::Error> {
        match self {
            Self::Deployment(deployment) => deployment.set_name(name),
            Self::CronJob(cron_job) => cron_job.set_name(name),
            Self::Job(job) => job.set_name(name),
            Self::Service(service) => {
                service.set_name(name);
                Ok(())
            }
            Self::ConfigMap(config_map) => {
                config_map.set_name(name);
                Ok(())
            }
        }
    }

    pub fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue> {
        let kind = self.kind();
        let name = self.name().to_owned();
        match self {
            Self::Deployment(deployment) => {
                deployment.serialize(ctx).context(TreeSnafu { kind, name })
            }
            Self::CronJob(cron_job) => cron_job.serialize(ctx).context(TreeSnafu { kind, name }),
            Self::Job(job) => job.serialize(ctx).context(TreeSnafu { kind, name }),
            Self::Service(service) => service.serialize(ctx).context(TreeSnafu { kind, name }),
            Self::ConfigMap(config_map) => config_map
                .serialize(ctx)
                .context(ConfigMapDataSnafu { name }),
        }
    }
}

impl From<Deployment> for Resource {
    fn from(deployment: Deployment) -> Self {
        Self::Deployment(deployment)
    }
}

impl From<CronJob> for Resource {
    fn from(cron_job: CronJob) -> Self {
        Self::CronJob(cron_job)
    }
}

impl From<Job> for Resource {
    fn from(job: Job) -> Self {
        Self::Job(job)
    }
}

impl From<Service> for Resource {
    fn from(service: Service) -> Self {
        Self::Service(service)
    }
}

impl From<ConfigMap> for Resource {
    fn from(config_map: ConfigMap) -> Self {
        Self::ConfigMap(config_map)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Kind::Deployment, "apps/v1", "Deployment")]
    #[case(Kind::CronJob, "batch/v1", "CronJob")]
    #[case(Kind::Job, "batch/v1", "Job")]
    #[case(Kind::Service, "v1", "Service")]
    #[case(Kind::ConfigMap, "v1", "ConfigMap")]
    fn envelope_matches_the_wire_format(
        #[case] kind: Kind,
        #[case] api_version: &str,
        #[case] wire_kind: &str,
    ) {
        let manifest = envelope(kind);
        assert_eq!(manifest["apiVersion"], api_version);
        assert_eq!(manifest["kind"], wire_kind);
    }
}
