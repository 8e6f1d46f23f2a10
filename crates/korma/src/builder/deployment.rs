use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::{
    builder::{base_metadata, list_node, map_node, prepare_containers},
    render::RenderContext,
    resource::{Kind, envelope},
    tree::{self, Node, Value},
};

/// A deployment workload with its canonical manifest shape.
///
/// `metadata` and `spec` are open trees that overlays mutate freely; the name
/// is only writable through [`Deployment::set_name`] so that every name path
/// the wire format requires stays consistent.
#[derive(Clone, Debug, PartialEq)]
pub struct Deployment {
    name: String,
    pub metadata: Node,
    pub spec: Node,
}

impl Deployment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the name in:
    /// * `metadata.name`
    /// * `metadata.annotations.name`
    /// * `spec.template.metadata.name`
    /// * `spec.template.metadata.labels.app`
    /// * `spec.selector.matchLabels.app`
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), tree::Error> {
        let name = name.into();
        self.metadata.set("name", name.as_str());
        self.metadata.child("annotations")?.set("name", name.as_str());

        let template_metadata = self.spec.at(["template", "metadata"])?;
        template_metadata.set("name", name.as_str());
        template_metadata.child("labels")?.set("app", name.as_str());

        self.spec
            .at(["selector", "matchLabels"])?
            .set("app", name.as_str());

        self.name = name;
        Ok(())
    }

    pub fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue, tree::Error> {
        let mut manifest = envelope(Kind::Deployment);
        manifest.insert("metadata".to_owned(), self.metadata.serialize(ctx)?);
        manifest.insert("spec".to_owned(), self.spec.serialize(ctx)?);
        Ok(JsonValue::Object(manifest))
    }
}

/// A builder to build [`Deployment`] objects.
#[derive(Clone, Debug)]
pub struct DeploymentBuilder {
    name: String,
    replicas: i64,
    termination_grace_period_seconds: i64,
    containers: IndexMap<String, Node>,
    volumes: IndexMap<String, Value>,
    labels: IndexMap<String, String>,
    annotations: IndexMap<String, String>,
    pod_annotations: IndexMap<String, String>,
    metadata: Option<Node>,
}

impl DeploymentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: 1,
            termination_grace_period_seconds: 30,
            containers: IndexMap::new(),
            volumes: IndexMap::new(),
            labels: IndexMap::new(),
            annotations: IndexMap::new(),
            pod_annotations: IndexMap::new(),
            metadata: None,
        }
    }

    pub fn replicas(&mut self, replicas: i64) -> &mut Self {
        self.replicas = replicas;
        self
    }

    pub fn termination_grace_period(&mut self, seconds: i64) -> &mut Self {
        self.termination_grace_period_seconds = seconds;
        self
    }

    pub fn add_container(&mut self, name: impl Into<String>, spec: Node) -> &mut Self {
        self.containers.insert(name.into(), spec);
        self
    }

    pub fn add_volume(&mut self, name: impl Into<String>, source: impl Into<Value>) -> &mut Self {
        self.volumes.insert(name.into(), source.into());
        self
    }

    /// Sets `spec.template.metadata.labels` in the manifest.
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets `metadata.annotations` in the manifest.
    pub fn add_annotation(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets `spec.template.metadata.annotations` in the manifest.
    pub fn add_pod_annotation(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.pod_annotations.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&mut self, metadata: Node) -> &mut Self {
        self.metadata = Some(metadata);
        self
    }

    /// Builds a fresh [`Deployment`]; every call returns an independent tree.
    pub fn build(&self) -> Result<Deployment, tree::Error> {
        let mut template_metadata = Node::new();
        template_metadata.set("labels", map_node(&self.labels));
        template_metadata.set("annotations", map_node(&self.pod_annotations));

        let mut pod_spec = Node::new();
        pod_spec.set("volumes", list_node(self.volumes.clone()));
        pod_spec.set("containers", prepare_containers(self.containers.clone()));
        pod_spec.set(
            "terminationGracePeriodSeconds",
            self.termination_grace_period_seconds,
        );

        let mut template = Node::new();
        template.set("metadata", template_metadata);
        template.set("spec", pod_spec);

        let mut spec = Node::new();
        spec.set("replicas", self.replicas);
        spec.set("template", template);

        let mut deployment = Deployment {
            name: String::new(),
            metadata: base_metadata(self.metadata.clone(), &self.annotations),
            spec,
        };
        deployment.set_name(&self.name)?;
        Ok(deployment)
    }
}
