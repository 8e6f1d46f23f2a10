//! End-to-end flow: build a base configuration, overlay it per environment,
//! serialize the result and hand it to the process runner.

use indexmap::IndexMap;
use korma::{
    ConfigMapBuilder, DeploymentBuilder, Kind, Node, Overlay, OverlayResolver, RenderContext,
    ServiceBuilder, VersionMap,
    deploy::{self, Output, ProcessError, ProcessRunner},
    overlay::{self, ImageBuild, ResourceSet},
};
use serde_json::json;

const IMAGE: &str = "avengers/adminweb";

fn versions() -> VersionMap {
    [(IMAGE, "1.0.0")].into_iter().collect()
}

fn base() -> Result<ResourceSet, overlay::Error> {
    let versions = versions();
    let version = versions
        .version_of(IMAGE)
        .expect("the image is pinned")
        .to_owned();

    let mut set = ResourceSet::new();
    set.push_image(ImageBuild::new(IMAGE, &version));
    set.push(
        DeploymentBuilder::new("adminweb")
            .replicas(2)
            .add_container(
                "adminweb",
                Node::try_from(json!({
                    "image": format!("{IMAGE}:{version}"),
                    "env": {"ENV": "stable"},
                    "ports": {"http": 8080},
                }))
                .expect("container spec is an object"),
            )
            .build()?,
    );
    set.push(
        ServiceBuilder::new("adminweb")
            .add_port("http", json!({"port": 80, "targetPort": 8080}))
            .add_selector("app", "adminweb")
            .build(),
    );
    set.push(
        ConfigMapBuilder::new("adminweb-settings")
            .add_data("MODE", "standard")
            .build(),
    );
    Ok(set)
}

fn dev() -> Overlay {
    Overlay::new("dev", "reg.dev.example.com", |set| {
        let deployment = set.deployment_mut("adminweb")?;
        deployment.spec.set("replicas", 1);
        deployment
            .spec
            .at(["template", "spec", "containers", "adminweb", "env"])?
            .set("ENV", "dev");
        set.config_map_mut("adminweb-settings")?
            .data
            .insert("MODE".to_owned(), "debug".into());
        Ok(())
    })
}

#[test]
fn dev_overlay_produces_an_environment_specific_variant() {
    let resolved = OverlayResolver::load_base(base)
        .expect("base builds")
        .apply(&dev())
        .expect("overlay applies");

    let ctx = RenderContext::new(resolved.registry());
    let artifacts = resolved.serialize_all(&ctx).expect("resources serialize");
    assert_eq!(artifacts.len(), 3);

    let deployment = &artifacts[0].manifest;
    assert_eq!(deployment["spec"]["replicas"], json!(1));
    assert_eq!(
        deployment["spec"]["template"]["spec"]["containers"][0]["env"],
        json!([{"name": "ENV", "value": "dev"}])
    );
    assert_eq!(
        deployment["spec"]["template"]["spec"]["containers"][0]["image"],
        json!("reg.dev.example.com/avengers/adminweb:1.0.0")
    );

    let config_map = &artifacts[2].manifest;
    assert_eq!(config_map["data"]["MODE"], json!("debug"));
}

#[test]
fn the_base_is_rebuilt_fresh_for_every_environment() {
    let dev_resolved = OverlayResolver::load_base(base)
        .expect("base builds")
        .apply(&dev())
        .expect("overlay applies");
    let stage_resolved = OverlayResolver::load_base(base)
        .expect("base builds")
        .apply(&Overlay::unchanged("stage", "reg.example.com"))
        .expect("overlay applies");

    let stage_artifacts = stage_resolved
        .serialize_all(&RenderContext::new(stage_resolved.registry()))
        .expect("resources serialize");
    assert_eq!(
        stage_artifacts[0].manifest["spec"]["template"]["spec"]["containers"][0]["env"],
        json!([{"name": "ENV", "value": "stable"}]),
        "the dev mutation must not leak into stage"
    );
    assert_eq!(
        stage_artifacts[0].manifest["spec"]["template"]["spec"]["containers"][0]["image"],
        json!("reg.example.com/avengers/adminweb:1.0.0")
    );

    let dev_artifacts = dev_resolved
        .serialize_all(&RenderContext::new(dev_resolved.registry()))
        .expect("resources serialize");
    assert_eq!(
        dev_artifacts[0].manifest["spec"]["template"]["spec"]["containers"][0]["env"],
        json!([{"name": "ENV", "value": "dev"}])
    );
}

struct RecordingRunner {
    calls: Vec<(String, Vec<String>)>,
}

impl ProcessRunner for RecordingRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<Output, ProcessError> {
        self.calls.push((program.to_owned(), args.to_vec()));
        Ok(Output::default())
    }
}

#[test]
fn resolved_environments_apply_one_manifest_per_resource() {
    let resolved = OverlayResolver::load_base(base)
        .expect("base builds")
        .apply(&dev())
        .expect("overlay applies");
    let artifacts = resolved
        .serialize_all(&RenderContext::new(resolved.registry()))
        .expect("resources serialize");

    let dir = tempfile::tempdir().expect("temp dir is writable");
    let mut runner = RecordingRunner { calls: Vec::new() };
    deploy::apply_manifests(&artifacts, dir.path(), true, &mut runner)
        .expect("all applies succeed");

    assert_eq!(
        runner.calls.len(),
        4,
        "three applies plus the deployment rollout wait"
    );
    assert!(runner.calls.iter().all(|(program, _)| program == "kubectl"));
    assert_eq!(
        runner.calls[3].1,
        ["rollout", "status", "deployment", "adminweb"]
    );

    let written = std::fs::read_to_string(dir.path().join("deployment-adminweb.json"))
        .expect("the manifest was written");
    let manifest: serde_json::Value =
        serde_json::from_str(&written).expect("the manifest is valid JSON");
    assert_eq!(manifest["kind"], json!("Deployment"));
    assert_eq!(manifest["metadata"]["name"], json!("adminweb"));
}

#[test]
fn overlays_can_rename_resources_consistently() {
    let rename = Overlay::new("test", "reg.example.com", |set| {
        set.resource_mut(Kind::Deployment, "adminweb")?
            .set_name("adminweb-canary")?;
        Ok(())
    });

    let resolved = OverlayResolver::load_base(base)
        .expect("base builds")
        .apply(&rename)
        .expect("overlay applies");
    let artifacts = resolved
        .serialize_all(&RenderContext::new("reg.example.com"))
        .expect("resources serialize");

    let deployment = &artifacts[0].manifest;
    assert_eq!(deployment["metadata"]["name"], json!("adminweb-canary"));
    assert_eq!(
        deployment["spec"]["selector"]["matchLabels"]["app"],
        json!("adminweb-canary")
    );
    assert_eq!(
        deployment["spec"]["template"]["metadata"]["labels"]["app"],
        json!("adminweb-canary")
    );
}

#[test]
fn file_backed_config_entries_resolve_against_the_config_dir() {
    let dir = tempfile::tempdir().expect("temp dir is writable");
    std::fs::write(dir.path().join("nginx.conf"), "worker_processes 4;")
        .expect("config file writes");

    let base = move || -> Result<ResourceSet, overlay::Error> {
        let mut set = ResourceSet::new();
        set.push(
            ConfigMapBuilder::new("nginx")
                .add_data_file("nginx.conf", "nginx.conf", IndexMap::new())
                .build(),
        );
        Ok(set)
    };

    let resolved = OverlayResolver::load_base(base)
        .expect("base builds")
        .apply(&Overlay::unchanged("dev", "reg.dev.example.com"))
        .expect("overlay applies");
    let ctx = RenderContext::new(resolved.registry()).with_config_dir(dir.path());
    let artifacts = resolved.serialize_all(&ctx).expect("resources serialize");

    assert_eq!(
        artifacts[0].manifest["data"]["nginx.conf"],
        json!("worker_processes 4;")
    );
}
