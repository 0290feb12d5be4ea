//! The shelling pipeline.
//!
//! One [`Shell::run`] call turns an input package into
//! `<out_dir>/<stem>.shelled.<ext>`:
//!
//! ```text
//! preflight ─► workspace ─► instrument ─► stage-template ─► patch-template
//!           ─► native-build ─► assemble ─► strip-metadata ─► package
//! ```
//!
//! Each stage takes the [`BuildJob`] by value and hands back the job with its
//! own output filled in, so a stage can be exercised on its own in tests. The
//! first failure aborts the job; its workspace is then kept, removed or
//! archived according to the retention policy.

use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::abi::{select_abi, AbiSelection};
use crate::archive::PackOptions;
use crate::assemble::{
    append_dex, dex_file_name, place_artifact, place_modules, place_payload, ArtifactError,
};
use crate::config::{RetentionSpec, ShellConfig};
use crate::error::{ShellError, Stage, StageResultExt};
use crate::instrument::{InstrumentError, InstrumentOutput, InstrumentRequest, Instrumentor};
use crate::metadata::strip_signing_metadata;
use crate::native::{BuildError, NativeBuilder, Toolchain};
use crate::package::{output_path, package, PackageError};
use crate::template::{stage_template, PatchSummary, TemplatePatcher, TemplateProject};
use crate::workspace::Workspace;

/// Name of the executable payload inside a package.
pub const PAYLOAD_DEX: &str = "classes.dex";
/// Name of the package manifest.
pub const MANIFEST: &str = "AndroidManifest.xml";

/// What the caller asks for.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    /// Package to protect
    pub input: PathBuf,
    /// Receives the workspace and the shelled package
    pub out_dir: PathBuf,
    /// Optional native modules, copied next to the protection library
    pub modules: Vec<String>,
    /// Entry class override handed to the instrumentor
    pub entry_class: Option<String>,
    /// Replace an existing output file
    pub overwrite: bool,
    /// Overrides the configured retention policy
    pub retention: Option<RetentionSpec>,
}

impl ShellRequest {
    pub fn new(input: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            out_dir: out_dir.into(),
            modules: Vec::new(),
            entry_class: None,
            overwrite: false,
            retention: None,
        }
    }
}

/// Where the assembler put things.
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub abi: AbiSelection,
    pub payload: PathBuf,
    pub modules: Vec<PathBuf>,
    pub artifact: PathBuf,
    pub dex_index: u32,
    pub dex_path: PathBuf,
}

/// State of one job as it moves through the stages.
#[derive(Debug)]
pub struct BuildJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub workspace: Workspace,
    pub modules: Vec<String>,
    pub entry_class: Option<String>,
    pub overwrite: bool,

    pub instrumented: Option<InstrumentOutput>,
    pub project: Option<TemplateProject>,
    pub patch: Option<PatchSummary>,
    pub build_output: Option<PathBuf>,
    pub placement: Option<Placement>,
    pub stripped: Vec<PathBuf>,
    pub packaged: Option<PathBuf>,
}

impl BuildJob {
    pub fn new(request: &ShellRequest, workspace: Workspace) -> Self {
        Self {
            input: request.input.clone(),
            output: output_path(&request.input, &request.out_dir),
            workspace,
            modules: request.modules.clone(),
            entry_class: request.entry_class.clone(),
            overwrite: request.overwrite,
            instrumented: None,
            project: None,
            patch: None,
            build_output: None,
            placement: None,
            stripped: Vec::new(),
            packaged: None,
        }
    }
}

/// Summary of a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct ShellReport {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Workspace directory or its snapshot; `None` once removed
    pub workspace: Option<PathBuf>,
    pub abi: AbiSelection,
    pub payload: PathBuf,
    pub modules: Vec<PathBuf>,
    pub artifact: PathBuf,
    pub dex_index: u32,
    pub dex_name: String,
    pub patch: PatchSummary,
    pub stripped: Vec<PathBuf>,
    pub duration_ms: u128,
}

/// Runs shelling jobs with one configuration and instrumentor.
pub struct Shell<I: Instrumentor> {
    config: ShellConfig,
    instrumentor: I,
}

fn missing(stage: Stage, what: &str) -> ShellError {
    ShellError::stage(stage, anyhow::anyhow!("{} is not available; earlier stage did not run", what))
}

impl<I: Instrumentor> Shell<I> {
    pub fn new(config: ShellConfig, instrumentor: I) -> Self {
        Self {
            config,
            instrumentor,
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Check the toolchain and the template skeleton.
    ///
    /// Runs before any workspace exists, so misconfiguration never leaves
    /// directories behind.
    pub fn preflight(&self) -> Result<Toolchain, ShellError> {
        let toolchain = Toolchain::from_env(&self.config.toolchain_env)
            .map_err(|e| ShellError::configuration(e.to_string()))?;

        let skeleton = &self.config.template_dir;
        if !skeleton.is_dir() {
            return Err(ShellError::configuration(format!(
                "template skeleton not found: {}",
                skeleton.display()
            )));
        }
        let target = skeleton.join(&self.config.patch_target);
        if !target.is_file() {
            return Err(ShellError::configuration(format!(
                "patch target not found in template: {}",
                target.display()
            )));
        }
        Ok(toolchain)
    }

    /// Run one job end to end.
    pub fn run(&self, request: &ShellRequest) -> Result<ShellReport, ShellError> {
        let start = Instant::now();
        let toolchain = self.preflight()?;

        if !request.input.is_file() {
            return Err(ShellError::input(&request.input, "package not found"));
        }
        let output = output_path(&request.input, &request.out_dir);
        if output.exists() && !request.overwrite {
            return Err(ShellError::AlreadyExists { path: output });
        }

        let label = request
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let workspace = Workspace::create(&request.out_dir, &label)
            .map_err(|e| ShellError::configuration(format!("{:#}", e)))?;
        let retention = request.retention.unwrap_or(self.config.retention);

        let job = BuildJob::new(request, workspace.clone());
        info!(
            "job={} input={} output={} Starting shelling job",
            workspace.name(),
            request.input.display(),
            output.display()
        );

        match self.execute(job, &toolchain) {
            Ok(job) => {
                let location = match workspace.retire(retention.on_success, &request.out_dir) {
                    Ok(location) => location,
                    Err(e) => {
                        warn!("Failed to retire workspace {}: {:#}", workspace.root.display(), e);
                        Some(workspace.root.clone())
                    }
                };
                let report = build_report(job, location, start)?;
                info!(
                    "job={} duration_ms={} output={} Shelling job completed",
                    workspace.name(),
                    report.duration_ms,
                    report.output.display()
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    "job={} kind={} duration_ms={} Shelling job failed: {}",
                    workspace.name(),
                    e.kind(),
                    start.elapsed().as_millis(),
                    e
                );
                match workspace.retire(retention.on_failure, &request.out_dir) {
                    Ok(Some(location)) => info!("Workspace retained at {}", location.display()),
                    Ok(None) => {}
                    Err(cleanup) => warn!(
                        "Failed to retire workspace {}: {:#}",
                        workspace.root.display(),
                        cleanup
                    ),
                }
                Err(e)
            }
        }
    }

    fn execute(&self, job: BuildJob, toolchain: &Toolchain) -> Result<BuildJob, ShellError> {
        let job = self.unpack(job)?;
        let job = self.instrument(job)?;
        let job = self.stage_template(job)?;
        let job = self.patch_template(job)?;
        let job = self.build_native(job, toolchain)?;
        let job = self.assemble(job)?;
        let job = self.strip_metadata(job)?;
        self.package(job)
    }

    /// Unpack the input and check it carries a payload and a manifest.
    pub fn unpack(&self, job: BuildJob) -> Result<BuildJob, ShellError> {
        job.workspace
            .unpack(&job.input)
            .map_err(|e| ShellError::input(&job.input, format!("{:#}", e)))?;

        for required in [PAYLOAD_DEX, MANIFEST] {
            if !job.workspace.unpacked_dir.join(required).is_file() {
                return Err(ShellError::input(
                    &job.input,
                    format!("package has no {}", required),
                ));
            }
        }
        Ok(job)
    }

    pub fn instrument(&self, mut job: BuildJob) -> Result<BuildJob, ShellError> {
        let request = InstrumentRequest {
            dex: job.workspace.unpacked_dir.join(PAYLOAD_DEX),
            manifest: job.workspace.unpacked_dir.join(MANIFEST),
            entry_class: job.entry_class.clone(),
            out_dir: job.workspace.instrument_dir.clone(),
            context: job.workspace.env_vars(),
        };

        let output = self.instrumentor.instrument(&request).map_err(|e| match e {
            InstrumentError::TimedOut(after) => ShellError::Timeout {
                stage: Stage::Instrument,
                after,
            },
            InstrumentError::Failed(cause) => ShellError::stage(Stage::Instrument, cause),
        })?;

        job.instrumented = Some(output);
        Ok(job)
    }

    pub fn stage_template(&self, mut job: BuildJob) -> Result<BuildJob, ShellError> {
        let project = stage_template(&self.config.template_dir, &job.workspace.project_dir)
            .in_stage(Stage::StageTemplate)?;
        job.project = Some(project);
        Ok(job)
    }

    pub fn patch_template(&self, mut job: BuildJob) -> Result<BuildJob, ShellError> {
        let project = job
            .project
            .as_ref()
            .ok_or_else(|| missing(Stage::PatchTemplate, "staged template"))?;
        let fragment = job
            .instrumented
            .as_ref()
            .ok_or_else(|| missing(Stage::PatchTemplate, "generated source"))?;

        let target = project.jni_dir.join(&self.config.patch_target);
        if !target.is_file() {
            return Err(ShellError::configuration(format!(
                "patch target not found in staged template: {}",
                target.display()
            )));
        }

        let patcher = TemplatePatcher::from_spec(&self.config.sentinels);
        let summary = patcher
            .patch_file(&target, &fragment.source_fragment)
            .in_stage(Stage::PatchTemplate)?;
        job.patch = Some(summary);
        Ok(job)
    }

    pub fn build_native(&self, mut job: BuildJob, toolchain: &Toolchain) -> Result<BuildJob, ShellError> {
        let project = job
            .project
            .as_ref()
            .ok_or_else(|| missing(Stage::NativeBuild, "staged template"))?;

        let builder = NativeBuilder::new(
            toolchain.clone(),
            self.config.build_args.clone(),
            self.config.build_timeout(),
        );
        let libs = builder.build(project).map_err(|e| match e {
            BuildError::TimedOut(after) => ShellError::Timeout {
                stage: Stage::NativeBuild,
                after,
            },
            BuildError::Failed(status) => {
                ShellError::stage(Stage::NativeBuild, anyhow::anyhow!("ndk-build {}", status))
            }
            BuildError::Spawn(cause) => ShellError::stage(Stage::NativeBuild, cause),
        })?;

        job.build_output = Some(libs);
        Ok(job)
    }

    /// Place payload library, modules, artifact and the rewritten dex.
    pub fn assemble(&self, mut job: BuildJob) -> Result<BuildJob, ShellError> {
        let unpacked = job.workspace.unpacked_dir.clone();
        let build_output = job
            .build_output
            .clone()
            .ok_or_else(|| missing(Stage::Assemble, "native build output"))?;
        let instrumented = job
            .instrumented
            .clone()
            .ok_or_else(|| missing(Stage::Assemble, "instrumentor output"))?;

        let abi = select_abi(&unpacked);
        let payload = place_payload(&unpacked, abi.target, &build_output, &self.config.payload_library)
            .in_stage(Stage::Assemble)?;
        let modules = place_modules(&abi.target.lib_dir(&unpacked), &job.modules)
            .in_stage(Stage::Assemble)?;
        let artifact = place_artifact(&unpacked, &instrumented.artifact).map_err(|e| match e {
            ArtifactError::AlreadyExists(path) => ShellError::AlreadyExists { path },
            ArtifactError::Io(cause) => ShellError::stage(Stage::Assemble, cause),
        })?;
        let (dex_index, dex_path) = append_dex(&unpacked, &instrumented.dex).in_stage(Stage::Assemble)?;

        job.placement = Some(Placement {
            abi,
            payload,
            modules,
            artifact,
            dex_index,
            dex_path,
        });
        Ok(job)
    }

    pub fn strip_metadata(&self, mut job: BuildJob) -> Result<BuildJob, ShellError> {
        job.stripped = strip_signing_metadata(&job.workspace.unpacked_dir).in_stage(Stage::StripMetadata)?;
        Ok(job)
    }

    pub fn package(&self, mut job: BuildJob) -> Result<BuildJob, ShellError> {
        let options = PackOptions {
            store_extensions: self.config.store_uncompressed.clone(),
        };
        let written = package(&job.workspace.unpacked_dir, &job.output, &options, job.overwrite)
            .map_err(|e| match e {
                PackageError::AlreadyExists(path) => ShellError::AlreadyExists { path },
                PackageError::Io(cause) => ShellError::stage(Stage::Package, cause),
            })?;
        job.packaged = Some(written);
        Ok(job)
    }
}

fn build_report(job: BuildJob, workspace: Option<PathBuf>, start: Instant) -> Result<ShellReport, ShellError> {
    let placement = job.placement.ok_or_else(|| missing(Stage::Package, "placement"))?;
    let output = job.packaged.ok_or_else(|| missing(Stage::Package, "packaged output"))?;

    Ok(ShellReport {
        input: job.input,
        output,
        workspace,
        abi: placement.abi,
        payload: relative_to(&placement.payload, &job.workspace.unpacked_dir),
        modules: placement
            .modules
            .iter()
            .map(|m| relative_to(m, &job.workspace.unpacked_dir))
            .collect(),
        artifact: relative_to(&placement.artifact, &job.workspace.unpacked_dir),
        dex_index: placement.dex_index,
        dex_name: dex_file_name(placement.dex_index),
        patch: job.patch.unwrap_or_default(),
        stripped: job
            .stripped
            .iter()
            .map(|p| relative_to(p, &job.workspace.unpacked_dir))
            .collect(),
        duration_ms: start.elapsed().as_millis(),
    })
}

/// Path inside the package; the workspace may be gone by the time the report is read.
fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct NoopInstrumentor;

    impl Instrumentor for NoopInstrumentor {
        fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
            fs::write(request.out_dex(), "loader").map_err(anyhow::Error::from)?;
            fs::write(request.out_artifact(), "extracted").map_err(anyhow::Error::from)?;
            fs::write(request.out_source(), "int generated;").map_err(anyhow::Error::from)?;
            Ok(InstrumentOutput::collect(request)?)
        }
    }

    fn job_in(temp: &TempDir) -> BuildJob {
        let workspace = Workspace::create(&temp.path().join("out"), "app").unwrap();
        let request = ShellRequest::new(temp.path().join("app.apk"), temp.path().join("out"));
        BuildJob::new(&request, workspace)
    }

    #[test]
    fn test_request_defaults() {
        let request = ShellRequest::new("/in/app.apk", "/out");
        assert!(request.modules.is_empty());
        assert!(!request.overwrite);
        assert!(request.retention.is_none());
    }

    #[test]
    fn test_job_output_name() {
        let temp = TempDir::new().unwrap();
        let job = job_in(&temp);
        assert_eq!(job.output, temp.path().join("out/app.shelled.apk"));
        assert!(job.placement.is_none());
    }

    #[test]
    fn test_preflight_missing_toolchain() {
        let config = ShellConfig {
            toolchain_env: "APKSHELL_TEST_PIPELINE_NO_NDK".to_string(),
            ..ShellConfig::default()
        };
        let shell = Shell::new(config, NoopInstrumentor);
        let err = shell.preflight().unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("APKSHELL_TEST_PIPELINE_NO_NDK"));
    }

    #[test]
    fn test_instrument_stage_fills_job() {
        let temp = TempDir::new().unwrap();
        let shell = Shell::new(ShellConfig::default(), NoopInstrumentor);
        let job = shell.instrument(job_in(&temp)).unwrap();
        let output = job.instrumented.unwrap();
        assert_eq!(fs::read_to_string(output.dex).unwrap(), "loader");
    }

    #[test]
    fn test_stage_out_of_order_is_stage_error() {
        let temp = TempDir::new().unwrap();
        let shell = Shell::new(ShellConfig::default(), NoopInstrumentor);
        let err = shell.assemble(job_in(&temp)).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Assemble));
    }

    #[test]
    fn test_unpack_rejects_non_zip_input() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("app.apk"), "not a zip").unwrap();
        let shell = Shell::new(ShellConfig::default(), NoopInstrumentor);
        let err = shell.unpack(job_in(&temp)).unwrap_err();
        assert_eq!(err.kind(), "input");
    }

    #[test]
    fn test_strip_stage_records_removed_files() {
        let temp = TempDir::new().unwrap();
        let job = job_in(&temp);
        let meta = job.workspace.unpacked_dir.join("META-INF");
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join("CERT.RSA"), "sig").unwrap();

        let shell = Shell::new(ShellConfig::default(), NoopInstrumentor);
        let job = shell.strip_metadata(job).unwrap();
        assert_eq!(job.stripped, vec![meta.join("CERT.RSA")]);
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("/ws/apk/lib/armeabi/libshell.so"), Path::new("/ws/apk")),
            PathBuf::from("lib/armeabi/libshell.so")
        );
        assert_eq!(relative_to(Path::new("/elsewhere"), Path::new("/ws")), PathBuf::from("/elsewhere"));
    }
}
