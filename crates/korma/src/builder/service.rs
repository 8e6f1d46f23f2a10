use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::{
    builder::{base_metadata, list_node, map_node},
    render::RenderContext,
    resource::{Kind, envelope},
    tree::{self, Node, Value},
};

/// A service with its canonical manifest shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    name: String,
    pub metadata: Node,
    pub spec: Node,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets `metadata.name`, the only name path a service carries.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.metadata.set("name", name.as_str());
        self.name = name;
    }

    pub fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue, tree::Error> {
        let mut manifest = envelope(Kind::Service);
        manifest.insert("metadata".to_owned(), self.metadata.serialize(ctx)?);
        manifest.insert("spec".to_owned(), self.spec.serialize(ctx)?);
        Ok(JsonValue::Object(manifest))
    }
}

/// A builder to build [`Service`] objects.
#[derive(Clone, Debug)]
pub struct ServiceBuilder {
    name: String,
    service_type: String,
    ports: IndexMap<String, Value>,
    selector: IndexMap<String, String>,
    cluster_ip: Option<String>,
    load_balancer_ip: Option<String>,
    annotations: IndexMap<String, String>,
    metadata: Option<Node>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: "ClusterIP".to_owned(),
            ports: IndexMap::new(),
            selector: IndexMap::new(),
            cluster_ip: None,
            load_balancer_ip: None,
            annotations: IndexMap::new(),
            metadata: None,
        }
    }

    pub fn service_type(&mut self, service_type: impl Into<String>) -> &mut Self {
        self.service_type = service_type.into();
        self
    }

    /// Adds one named port record, e.g. `{"port": 80, "targetPort": 8080}`.
    pub fn add_port(&mut self, name: impl Into<String>, port: impl Into<Value>) -> &mut Self {
        self.ports.insert(name.into(), port.into());
        self
    }

    pub fn add_selector(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.selector.insert(key.into(), value.into());
        self
    }

    pub fn cluster_ip(&mut self, cluster_ip: impl Into<String>) -> &mut Self {
        self.cluster_ip = Some(cluster_ip.into());
        self
    }

    pub fn load_balancer_ip(&mut self, load_balancer_ip: impl Into<String>) -> &mut Self {
        self.load_balancer_ip = Some(load_balancer_ip.into());
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

    pub fn metadata(&mut self, metadata: Node) -> &mut Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(&self) -> Service {
        let mut spec = Node::new();
        spec.set("type", self.service_type.as_str());
        spec.set("ports", list_node(self.ports.clone()));
        spec.set("selector", map_node(&self.selector));
        if let Some(cluster_ip) = &self.cluster_ip {
            spec.set("clusterIP", cluster_ip.as_str());
        }
        if let Some(load_balancer_ip) = &self.load_balancer_ip {
            spec.set("loadBalancerIP", load_balancer_ip.as_str());
        }

        let mut service = Service {
            name: String::new(),
            metadata: base_metadata(self.metadata.clone(), &self.annotations),
            spec,
        };
        service.set_name(&self.name);
        service
    }
}
