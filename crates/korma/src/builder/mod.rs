//! Builders for the supported manifest kinds.
//!
//! They are not _pure_ builders: each one assembles the canonical nested
//! shape its kind requires on the wire and propagates the resource name to
//! every path that has to carry it.

use indexmap::IndexMap;

use crate::tree::{Node, NodeKind, Value};

pub mod configmap;
pub mod cronjob;
pub mod deployment;
pub mod job;
pub mod service;

pub use configmap::{BinaryValue, ConfigMap, ConfigMapBuilder, DataValue};
pub use cronjob::{CronJob, CronJobBuilder};
pub use deployment::{Deployment, DeploymentBuilder};
pub use job::{Job, JobBuilder};
pub use service::{Service, ServiceBuilder};

/// Turns named container specs into the record list the pod spec expects.
///
/// Per container, the `env` and `volumeMounts` children are retagged as
/// record lists and `ports` as a port list (a raw-list `ports` child is kept
/// as given), before the container itself is tagged for image resolution.
pub(crate) fn prepare_containers(containers: IndexMap<String, Node>) -> Node {
    let mut list = Node::list();
    for (name, mut container) in containers {
        retag_child(&mut container, "env", NodeKind::List);
        retag_child(&mut container, "volumeMounts", NodeKind::List);
        retag_child(&mut container, "ports", NodeKind::Ports);
        list.set(name, container.into_kind(NodeKind::Container));
    }
    list
}

fn retag_child(container: &mut Node, key: &str, kind: NodeKind) {
    if let Some(Value::Node(child)) = container.get_mut(key) {
        child.set_kind(kind);
    }
}

/// Builds a metadata node, inserting the given annotations unless the caller
/// brought their own.
pub(crate) fn base_metadata(
    metadata: Option<Node>,
    annotations: &IndexMap<String, String>,
) -> Node {
    let mut metadata = metadata.unwrap_or_default();
    if !metadata.contains("annotations") {
        metadata.set("annotations", map_node(annotations));
    }
    metadata
}

pub(crate) fn map_node(entries: &IndexMap<String, String>) -> Node {
    entries
        .iter()
        .map(|(key, value)| (key.clone(), value.as_str()))
        .collect()
}

pub(crate) fn list_node(entries: IndexMap<String, Value>) -> Node {
    let mut node = Node::list();
    for (key, value) in entries {
        node.set(key, value);
    }
    node
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::render::RenderContext;

    #[test]
    fn containers_are_prepared_for_the_pod_spec() {
        let container = Node::try_from(json!({
            "image": "repo/web:1.0",
            "env": {"ENV": "stable"},
            "ports": {"http": 8080},
            "volumeMounts": {"cache": {"mountPath": "/cache"}},
        }))
        .expect("container spec is an object");

        let containers = prepare_containers(IndexMap::from([("web".to_owned(), container)]));
        let ctx = RenderContext::new("reg.example.com");
        let rendered = containers.serialize(&ctx).expect("containers serialize");

        assert_eq!(
            rendered,
            json!([{
                "name": "web",
                "image": "reg.example.com/repo/web:1.0",
                "env": [{"name": "ENV", "value": "stable"}],
                "ports": [{"name": "http", "containerPort": 8080}],
                "volumeMounts": [{"name": "cache", "mountPath": "/cache"}],
            }])
        );
    }

    #[test]
    fn raw_list_ports_are_kept_as_given() {
        let container = Node::try_from(json!({
            "image": "!busybox",
            "ports": [{"containerPort": 9000}],
        }))
        .expect("container spec is an object");

        let containers = prepare_containers(IndexMap::from([("util".to_owned(), container)]));
        let ctx = RenderContext::new("reg.example.com");
        let rendered = containers.serialize(&ctx).expect("containers serialize");

        assert_eq!(
            rendered,
            json!([{
                "name": "util",
                "image": "busybox",
                "ports": [{"containerPort": 9000}],
            }])
        );
    }

    #[test]
    fn caller_provided_annotations_win_over_the_default() {
        let mut metadata = Node::new();
        metadata.set("annotations", json!({"team": "search"}));

        let merged = base_metadata(
            Some(metadata),
            &IndexMap::from([("team".to_owned(), "ignored".to_owned())]),
        );
        let annotations = merged.get_node("annotations").expect("annotations node");
        assert_eq!(annotations.get("team"), Some(&Value::from("search")));
    }
}
