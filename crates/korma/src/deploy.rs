//! Command assembly and the fail-fast apply loop.
//!
//! The actual process execution is delegated to a [`ProcessRunner`]
//! collaborator; this module materializes Dockerfiles from their templates,
//! assembles the docker/kubectl invocations and enforces the
//! abort-on-first-failure policy, so a broken apply never leaves later
//! resources silently unapplied behind a swallowed error.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value as JsonValue};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info};

use crate::{
    overlay::{Artifact, ImageBuild},
    render::{RenderContext, RenderError},
    resource::Kind,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to encode manifest {name:?} as JSON"))]
    EncodeManifest {
        source: serde_json::Error,
        name: String,
    },

    #[snafu(display("failed to write manifest {path}", path = path.display()))]
    WriteManifest {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read Dockerfile template {path}", path = path.display()))]
    ReadTemplate {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to render Dockerfile template {template:?}"))]
    RenderTemplate {
        source: RenderError,
        template: String,
    },

    #[snafu(display("failed to write Dockerfile {path}", path = path.display()))]
    WriteDockerfile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to launch {program}"))]
    Launch {
        source: ProcessError,
        program: String,
    },

    #[snafu(display("{program} exited with code {code}"))]
    CommandFailed { program: String, code: i32 },
}

/// The error type process-runner collaborators report through.
#[derive(Debug, Snafu)]
#[snafu(display("process runner failed: {message}"))]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Exit status and captured output of one external command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Executes an external command and returns its exit status plus captured
/// output. Implemented by the embedding tool; tests use recording fakes.
pub trait ProcessRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<Output, ProcessError>;
}

fn run_checked(runner: &mut dyn ProcessRunner, program: &str, args: &[String]) -> Result<Output> {
    debug!(program, ?args, "running external command");
    let output = runner.run(program, args).context(LaunchSnafu { program })?;
    ensure!(
        output.success(),
        CommandFailedSnafu {
            program,
            code: output.code
        }
    );
    Ok(output)
}

/// Writes every artifact to `out_dir` and applies it with kubectl.
///
/// The first failing command aborts the loop; already-applied resources stay
/// applied, the rest are not attempted. With `wait` set, every deployment is
/// followed up with a `kubectl rollout status` that blocks until the rollout
/// finishes.
pub fn apply_manifests(
    artifacts: &[Artifact],
    out_dir: &Path,
    wait: bool,
    runner: &mut dyn ProcessRunner,
) -> Result<()> {
    for artifact in artifacts {
        let path = out_dir.join(artifact.file_name());
        let manifest =
            serde_json::to_vec_pretty(&artifact.manifest).context(EncodeManifestSnafu {
                name: artifact.name.clone(),
            })?;
        fs::write(&path, manifest).context(WriteManifestSnafu { path: path.clone() })?;

        info!(kind = %artifact.kind, name = %artifact.name, "applying manifest");
        run_checked(
            runner,
            "kubectl",
            &[
                "apply".to_owned(),
                "-f".to_owned(),
                path.display().to_string(),
            ],
        )?;
    }

    if wait {
        for artifact in artifacts
            .iter()
            .filter(|artifact| artifact.kind == Kind::Deployment)
        {
            info!(name = %artifact.name, "waiting for rollout to finish");
            run_checked(
                runner,
                "kubectl",
                &[
                    "rollout".to_owned(),
                    "status".to_owned(),
                    "deployment".to_owned(),
                    artifact.name.clone(),
                ],
            )?;
        }
    }
    Ok(())
}

/// Materializes the image's Dockerfile from its template.
///
/// The template is read from the config directory and rendered through the
/// template collaborator with the image's context. Include files are
/// pre-rendered with the same context first and exposed to the main template
/// under the `includes` key. The result is written as `Dockerfile` into the
/// build context directory; the returned path is what docker builds against.
pub fn render_dockerfile(image: &ImageBuild, ctx: &RenderContext) -> Result<PathBuf> {
    let template_path = ctx.config_dir.join(&image.template);
    let template = fs::read_to_string(&template_path).context(ReadTemplateSnafu {
        path: template_path,
    })?;

    let mut context = image.context.clone();
    if !image.includes.is_empty() {
        let mut includes = Map::new();
        for (key, file) in &image.includes {
            let include_path = ctx.config_dir.join(file);
            let include = fs::read_to_string(&include_path).context(ReadTemplateSnafu {
                path: include_path,
            })?;
            let rendered =
                ctx.renderer
                    .render(&include, &image.context)
                    .context(RenderTemplateSnafu {
                        template: file.display().to_string(),
                    })?;
            includes.insert(key.clone(), JsonValue::String(rendered));
        }
        context.insert("includes".to_owned(), JsonValue::Object(includes));
    }

    let rendered = ctx
        .renderer
        .render(&template, &context)
        .context(RenderTemplateSnafu {
            template: image.template.clone(),
        })?;

    let dockerfile = image.context_dir.join("Dockerfile");
    fs::write(&dockerfile, rendered).context(WriteDockerfileSnafu {
        path: dockerfile.clone(),
    })?;
    Ok(dockerfile)
}

/// Renders the image's Dockerfile and builds it without caching, optionally
/// tagging it as latest too.
pub fn build_image(
    image: &ImageBuild,
    ctx: &RenderContext,
    latest: bool,
    runner: &mut dyn ProcessRunner,
) -> Result<()> {
    let dockerfile = render_dockerfile(image, ctx)?;

    let mut args = vec![
        "build".to_owned(),
        "-t".to_owned(),
        image.image_reference(ctx.registry),
        "--no-cache".to_owned(),
    ];
    if latest {
        args.push("-t".to_owned());
        args.push(format!(
            "{registry}/{image}:latest",
            registry = ctx.registry,
            image = image.image
        ));
    }
    args.push("-f".to_owned());
    args.push(dockerfile.display().to_string());
    args.push(image.context_dir.display().to_string());

    run_checked(runner, "docker", &args)?;
    Ok(())
}

pub fn push_image(
    image: &ImageBuild,
    registry: &str,
    latest: bool,
    runner: &mut dyn ProcessRunner,
) -> Result<()> {
    run_checked(
        runner,
        "docker",
        &["push".to_owned(), image.image_reference(registry)],
    )?;
    if latest {
        run_checked(
            runner,
            "docker",
            &[
                "push".to_owned(),
                format!("{registry}/{image}:latest", image = image.image),
            ],
        )?;
    }
    Ok(())
}

pub fn pull_image(
    image: &ImageBuild,
    registry: &str,
    runner: &mut dyn ProcessRunner,
) -> Result<()> {
    run_checked(
        runner,
        "docker",
        &["pull".to_owned(), image.image_reference(registry)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::json;

    use super::*;
    use crate::render::TemplateRenderer;

    /// Records invocations and fails every command from `fail_from` on.
    struct RecordingRunner {
        calls: Vec<(String, Vec<String>)>,
        fail_from: Option<usize>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_from: None,
            }
        }

        fn failing_from(call: usize) -> Self {
            Self {
                calls: Vec::new(),
                fail_from: Some(call),
            }
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&mut self, program: &str, args: &[String]) -> Result<Output, ProcessError> {
            let call = self.calls.len();
            self.calls.push((program.to_owned(), args.to_vec()));
            let code = match self.fail_from {
                Some(fail_from) if call >= fail_from => 1,
                _ => 0,
            };
            Ok(Output {
                code,
                ..Output::default()
            })
        }
    }

    /// Replaces every `{{key}}` with the context value stored under `key`;
    /// nested objects are joined line by line.
    struct SubstitutingRenderer;

    impl TemplateRenderer for SubstitutingRenderer {
        fn render(
            &self,
            template: &str,
            context: &IndexMap<String, JsonValue>,
        ) -> Result<String, RenderError> {
            let mut rendered = template.to_owned();
            for (key, value) in context {
                let replacement = match value {
                    JsonValue::String(text) => text.clone(),
                    JsonValue::Object(map) => map
                        .values()
                        .filter_map(JsonValue::as_str)
                        .collect::<Vec<_>>()
                        .join("\n"),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&format!("{{{{{key}}}}}"), &replacement);
            }
            Ok(rendered)
        }
    }

    fn artifact(kind: Kind, name: &str) -> Artifact {
        Artifact {
            kind,
            name: name.to_owned(),
            manifest: json!({"metadata": {"name": name}}),
        }
    }

    #[test]
    fn manifests_are_written_and_applied_in_order() {
        let dir = tempfile::tempdir().expect("temp dir is writable");
        let mut runner = RecordingRunner::new();

        apply_manifests(
            &[
                artifact(Kind::Deployment, "web"),
                artifact(Kind::Deployment, "api"),
            ],
            dir.path(),
            false,
            &mut runner,
        )
        .expect("all applies succeed");

        assert_eq!(runner.calls.len(), 2);
        assert_eq!(runner.calls[0].0, "kubectl");
        assert_eq!(runner.calls[0].1[..2], ["apply", "-f"]);
        assert!(runner.calls[0].1[2].ends_with("deployment-web.json"));
        assert!(
            dir.path().join("deployment-api.json").exists(),
            "the manifest file is left on disk"
        );
    }

    #[test]
    fn first_failure_aborts_the_loop() {
        let dir = tempfile::tempdir().expect("temp dir is writable");
        let mut runner = RecordingRunner::failing_from(0);

        let error = apply_manifests(
            &[
                artifact(Kind::Deployment, "web"),
                artifact(Kind::Deployment, "api"),
            ],
            dir.path(),
            false,
            &mut runner,
        )
        .expect_err("the first apply fails");

        assert!(matches!(error, Error::CommandFailed { code: 1, .. }));
        assert_eq!(runner.calls.len(), 1, "the second apply is never attempted");
    }

    #[test]
    fn rollout_waits_follow_the_applies_on_request() {
        let dir = tempfile::tempdir().expect("temp dir is writable");
        let mut runner = RecordingRunner::new();

        apply_manifests(
            &[
                artifact(Kind::Deployment, "web"),
                artifact(Kind::Service, "web"),
            ],
            dir.path(),
            true,
            &mut runner,
        )
        .expect("applies and waits succeed");

        assert_eq!(runner.calls.len(), 3, "only the deployment gets a wait");
        assert_eq!(
            runner.calls[2].1,
            ["rollout", "status", "deployment", "web"]
        );
    }

    #[test]
    fn build_assembles_the_docker_invocation() {
        let config_dir = tempfile::tempdir().expect("temp dir is writable");
        fs::write(config_dir.path().join("Dockerfile"), "FROM base").expect("template writes");
        let context_dir = tempfile::tempdir().expect("temp dir is writable");

        let mut runner = RecordingRunner::new();
        let mut image = ImageBuild::new("repo/web", "1.0");
        image.context_dir = context_dir.path().to_path_buf();

        let ctx = RenderContext::new("reg.example.com").with_config_dir(config_dir.path());
        build_image(&image, &ctx, true, &mut runner).expect("build succeeds");

        let dockerfile = context_dir.path().join("Dockerfile");
        let expected = [
            "build".to_owned(),
            "-t".to_owned(),
            "reg.example.com/repo/web:1.0".to_owned(),
            "--no-cache".to_owned(),
            "-t".to_owned(),
            "reg.example.com/repo/web:latest".to_owned(),
            "-f".to_owned(),
            dockerfile.display().to_string(),
            context_dir.path().display().to_string(),
        ];
        assert_eq!(runner.calls[0].1, expected);
    }

    #[test]
    fn configured_template_selects_the_dockerfile() {
        let config_dir = tempfile::tempdir().expect("temp dir is writable");
        fs::write(config_dir.path().join("Dockerfile"), "FROM default").expect("template writes");
        fs::write(config_dir.path().join("Dockerfile.web"), "FROM web-base")
            .expect("template writes");
        let context_dir = tempfile::tempdir().expect("temp dir is writable");

        let mut runner = RecordingRunner::new();
        let mut image = ImageBuild::new("repo/web", "1.0");
        image.template = "Dockerfile.web".to_owned();
        image.context_dir = context_dir.path().to_path_buf();

        let ctx = RenderContext::new("reg.example.com").with_config_dir(config_dir.path());
        build_image(&image, &ctx, false, &mut runner).expect("build succeeds");

        let materialized = fs::read_to_string(context_dir.path().join("Dockerfile"))
            .expect("the Dockerfile was materialized");
        assert_eq!(materialized, "FROM web-base");

        let args = &runner.calls[0].1;
        assert_eq!(args[args.len() - 3], "-f");
        assert!(args[args.len() - 2].ends_with("Dockerfile"));
    }

    #[test]
    fn includes_are_pre_rendered_into_the_template_context() {
        let config_dir = tempfile::tempdir().expect("temp dir is writable");
        fs::write(
            config_dir.path().join("Dockerfile"),
            "FROM base\n{{includes}}",
        )
        .expect("template writes");
        fs::write(
            config_dir.path().join("setup.tpl"),
            "RUN install {{version}}",
        )
        .expect("include writes");
        let context_dir = tempfile::tempdir().expect("temp dir is writable");

        let mut image = ImageBuild::new("repo/web", "1.0");
        image.context_dir = context_dir.path().to_path_buf();
        image.context.insert("version".to_owned(), json!("1.0"));
        image
            .includes
            .insert("setup".to_owned(), PathBuf::from("setup.tpl"));

        let ctx = RenderContext::new("reg.example.com")
            .with_config_dir(config_dir.path())
            .with_renderer(&SubstitutingRenderer);
        let dockerfile = render_dockerfile(&image, &ctx).expect("template renders");

        let materialized =
            fs::read_to_string(dockerfile).expect("the Dockerfile was materialized");
        assert_eq!(materialized, "FROM base\nRUN install 1.0");
    }

    #[test]
    fn missing_template_fails_the_build() {
        let config_dir = tempfile::tempdir().expect("temp dir is writable");
        let mut runner = RecordingRunner::new();
        let image = ImageBuild::new("repo/web", "1.0");

        let ctx = RenderContext::new("reg.example.com").with_config_dir(config_dir.path());
        let error =
            build_image(&image, &ctx, false, &mut runner).expect_err("the template does not exist");

        assert!(matches!(error, Error::ReadTemplate { .. }));
        assert!(runner.calls.is_empty(), "docker is never invoked");
    }

    #[test]
    fn push_includes_the_latest_tag_only_on_request() {
        let mut runner = RecordingRunner::new();
        let image = ImageBuild::new("repo/web", "1.0");

        push_image(&image, "reg.example.com", false, &mut runner).expect("push succeeds");
        assert_eq!(runner.calls.len(), 1);
        assert_eq!(runner.calls[0].1, ["push", "reg.example.com/repo/web:1.0"]);

        push_image(&image, "reg.example.com", true, &mut runner).expect("push succeeds");
        assert_eq!(runner.calls.len(), 3);
        assert_eq!(
            runner.calls[2].1,
            ["push", "reg.example.com/repo/web:latest"]
        );
    }
}
