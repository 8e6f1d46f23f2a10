use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::{
    builder::{base_metadata, list_node, map_node, prepare_containers},
    render::RenderContext,
    resource::{Kind, envelope},
    tree::{self, Node, Value},
};

/// A scheduled workload with its canonical manifest shape.
#[derive(Clone, Debug, PartialEq)]
pub struct CronJob {
    name: String,
    pub metadata: Node,
    pub spec: Node,
}

impl CronJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the name in:
    /// * `metadata.name`
    /// * `metadata.annotations.name`
    /// * `spec.jobTemplate.spec.template.metadata.name`
    /// * `spec.jobTemplate.spec.template.metadata.labels.app`
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), tree::Error> {
        let name = name.into();
        self.metadata.set("name", name.as_str());
        self.metadata.child("annotations")?.set("name", name.as_str());

        let template_metadata = self
            .spec
            .at(["jobTemplate", "spec", "template", "metadata"])?;
        template_metadata.set("name", name.as_str());
        template_metadata.child("labels")?.set("app", name.as_str());

        self.name = name;
        Ok(())
    }

    pub fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue, tree::Error> {
        let mut manifest = envelope(Kind::CronJob);
        manifest.insert("metadata".to_owned(), self.metadata.serialize(ctx)?);
        manifest.insert("spec".to_owned(), self.spec.serialize(ctx)?);
        Ok(JsonValue::Object(manifest))
    }
}

/// A builder to build [`CronJob`] objects.
#[derive(Clone, Debug)]
pub struct CronJobBuilder {
    name: String,
    schedule: String,
    concurrency_policy: String,
    restart_policy: String,
    termination_grace_period_seconds: i64,
    containers: IndexMap<String, Node>,
    volumes: IndexMap<String, Value>,
    labels: IndexMap<String, String>,
    annotations: IndexMap<String, String>,
    pod_annotations: IndexMap<String, String>,
    metadata: Option<Node>,
}

impl CronJobBuilder {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            concurrency_policy: "Allow".to_owned(),
            restart_policy: "Never".to_owned(),
            termination_grace_period_seconds: 30,
            containers: IndexMap::new(),
            volumes: IndexMap::new(),
            labels: IndexMap::new(),
            annotations: IndexMap::new(),
            pod_annotations: IndexMap::new(),
            metadata: None,
        }
    }

    pub fn concurrency_policy(&mut self, policy: impl Into<String>) -> &mut Self {
        self.concurrency_policy = policy.into();
        self
    }

    pub fn restart_policy(&mut self, policy: impl Into<String>) -> &mut Self {
        self.restart_policy = policy.into();
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

    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn add_annotation(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

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

    pub fn build(&self) -> Result<CronJob, tree::Error> {
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
        pod_spec.set("restartPolicy", self.restart_policy.as_str());

        let mut template = Node::new();
        template.set("metadata", template_metadata);
        template.set("spec", pod_spec);

        let mut spec = Node::new();
        spec.set("schedule", self.schedule.as_str());
        spec.set("concurrencyPolicy", self.concurrency_policy.as_str());
        spec.at(["jobTemplate", "spec"])?.set("template", template);

        let mut cron_job = CronJob {
            name: String::new(),
            metadata: base_metadata(self.metadata.clone(), &self.annotations),
            spec,
        };
        cron_job.set_name(&self.name)?;
        Ok(cron_job)
    }
}
