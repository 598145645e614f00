use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};

use scenecast_lib::core::hardware::{probe_for_mode, HardwareMode};
use scenecast_lib::core::jobs::{JobStatus, JobStore, RenderRequest, SubmitOptions};
use scenecast_lib::core::render::{CommandRenderEngine, RenderEngine};
use scenecast_lib::core::settings::{ServiceSettings, SettingsManager};
use scenecast_lib::core::template::{
    validate, ConfigValue, CustomTemplateParams, TemplateCatalog, TemplateProcessor, VariableSet,
};
use scenecast_lib::ServiceContext;

#[derive(Parser, Debug)]
#[command(name = "scenecast-cli", version)]
struct Cli {
    /// Settings file (defaults to the user config directory).
    #[arg(long, global = true, env = "SCENECAST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in templates.
    Templates,
    /// Check supplied variables against a template's required list.
    Validate(ValidateArgs),
    /// Print the render configuration a request expands to.
    Build(BuildArgs),
    /// Render one request in this process and wait for it.
    Render(RenderArgs),
    /// Queue a request in the shared job store for the daemon.
    Submit(SubmitArgs),
    /// Show one job.
    Status(StatusArgs),
    /// List recent jobs.
    Jobs(JobsArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Template id.
    template: String,

    /// Variable as NAME=VALUE (VALUE is parsed as JSON when possible).
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, ConfigValue)>,
}

/// Exactly one of --template, --platform, --raw or --custom selects the request kind.
#[derive(Args, Debug)]
struct RequestArgs {
    /// Catalog template id.
    #[arg(long)]
    template: Option<String>,

    /// Platform name mapped to a catalog template.
    #[arg(long)]
    platform: Option<String>,

    /// Raw workflow config JSON file.
    #[arg(long)]
    raw: Option<PathBuf>,

    /// Custom template JSON file.
    #[arg(long)]
    custom: Option<PathBuf>,

    /// Custom mobile template parameters JSON file.
    #[arg(long)]
    custom_params: Option<PathBuf>,

    /// Variable as NAME=VALUE (VALUE is parsed as JSON when possible).
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, ConfigValue)>,
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Override hardware detection: auto, enabled or disabled.
    #[arg(long, value_parser = parse_hardware)]
    hardware: Option<HardwareMode>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Override hardware detection: auto, enabled or disabled.
    #[arg(long, value_parser = parse_hardware)]
    hardware: Option<HardwareMode>,

    /// Output file name inside the configured output directory.
    #[arg(long)]
    output_name: Option<String>,

    /// Give up waiting after this many seconds.
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Output file name inside the configured output directory.
    #[arg(long)]
    output_name: Option<String>,

    /// URL to notify when the job finishes.
    #[arg(long)]
    webhook_url: Option<String>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    job_id: String,
}

#[derive(Args, Debug)]
struct JobsArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Only jobs with this status (queued, processing, completed, failed).
    #[arg(long)]
    status: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(cli.config.as_deref());
    match cli.cmd {
        Command::Templates => cmd_templates(),
        Command::Validate(args) => cmd_validate(args),
        Command::Build(args) => cmd_build(settings, args).await,
        Command::Render(args) => cmd_render(settings, args).await,
        Command::Submit(args) => cmd_submit(settings, args),
        Command::Status(args) => cmd_status(settings, args),
        Command::Jobs(args) => cmd_jobs(settings, args),
    }
}

fn load_settings(path: Option<&Path>) -> ServiceSettings {
    let manager = match path {
        Some(path) => SettingsManager::new(path.to_path_buf()),
        None => SettingsManager::default_location(),
    };
    manager.load()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_templates() -> anyhow::Result<()> {
    let catalog = TemplateCatalog::builtin()?;
    print_json(&catalog.list_templates())
}

fn cmd_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let catalog = TemplateCatalog::builtin()?;
    catalog.get(&args.template)?;
    let report = validate(&args.template, &variable_set(args.vars));
    print_json(&report)?;
    if !report.valid {
        bail!("missing variables: {}", report.missing.join(", "));
    }
    Ok(())
}

async fn cmd_build(mut settings: ServiceSettings, args: BuildArgs) -> anyhow::Result<()> {
    if let Some(mode) = args.hardware {
        settings.hardware.mode = mode;
    }
    let request = args.request.into_request()?;
    request.validate()?;

    let catalog = TemplateCatalog::builtin()?;
    let processor = TemplateProcessor::new(
        settings.processor_paths(),
        probe_for_mode(settings.hardware.mode),
    );
    let (spec, variables) = request.normalize(&catalog)?;
    let config = processor.build(&spec, &variables).await?;
    print_json(&config)
}

async fn cmd_render(mut settings: ServiceSettings, args: RenderArgs) -> anyhow::Result<()> {
    if let Some(mode) = args.hardware {
        settings.hardware.mode = mode;
    }
    settings
        .ensure_directories()
        .context("failed to create service directories")?;
    let request = args.request.into_request()?;

    let engine: Arc<dyn RenderEngine> = Arc::new(CommandRenderEngine::new(
        settings.renderer.program.clone(),
        settings.renderer.args.clone(),
        settings.directories.cache.clone(),
    ));
    let probe = probe_for_mode(settings.hardware.mode);
    let ctx = ServiceContext::new(settings, JobStore::in_memory()?, engine, probe)?;
    ctx.start()?;

    let submission = ctx.jobs.submit(
        request,
        SubmitOptions {
            output_name: args.output_name,
            webhook_url: None,
        },
    )?;
    tracing::info!("Rendering {} as job {}", submission.output_name, submission.job_id);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_progress = None;
    let view = loop {
        ticker.tick().await;
        let view = ctx.jobs.job_status(&submission.job_id)?;
        if view.status.is_terminal() {
            break view;
        }
        if last_progress != Some(view.progress) {
            tracing::info!("Job {} {} at {}%", view.job_id, view.status, view.progress);
            last_progress = Some(view.progress);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for job {}", submission.job_id);
        }
    };

    ctx.shutdown().await;
    print_json(&view)?;
    if view.status == JobStatus::Failed {
        bail!(
            "render failed: {}",
            view.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn cmd_submit(settings: ServiceSettings, args: SubmitArgs) -> anyhow::Result<()> {
    let request = args.request.into_request()?;
    // No workers here: the record stays queued until a daemon sharing the
    // database picks it up.
    let ctx = ServiceContext::from_settings(settings).context("failed to open job store")?;
    let submission = ctx.jobs.submit(
        request,
        SubmitOptions {
            output_name: args.output_name,
            webhook_url: args.webhook_url,
        },
    )?;
    tracing::info!(
        "Job {} queued in {}",
        submission.job_id,
        ctx.settings.database.path.display()
    );
    print_json(&submission)
}

fn open_store(settings: &ServiceSettings) -> anyhow::Result<JobStore> {
    JobStore::open(&settings.database.path).with_context(|| {
        format!(
            "failed to open job store at {}",
            settings.database.path.display()
        )
    })
}

fn cmd_status(settings: ServiceSettings, args: StatusArgs) -> anyhow::Result<()> {
    let store = open_store(&settings)?;
    print_json(&store.get(&args.job_id)?.status_view())
}

fn cmd_jobs(settings: ServiceSettings, args: JobsArgs) -> anyhow::Result<()> {
    let store = open_store(&settings)?;
    let records = match args.status.as_deref() {
        Some(status) => {
            let mut records = store.list_by_status(JobStatus::parse(status)?)?;
            records.truncate(args.limit);
            records
        }
        None => store.list(args.limit)?,
    };
    let views: Vec<_> = records.iter().map(|r| r.status_view()).collect();
    print_json(&views)
}

impl RequestArgs {
    fn into_request(self) -> anyhow::Result<RenderRequest> {
        let sources = [
            self.template.is_some(),
            self.platform.is_some(),
            self.raw.is_some(),
            self.custom.is_some() || self.custom_params.is_some(),
        ];
        if sources.iter().filter(|s| **s).count() != 1 {
            bail!("pass exactly one of --template, --platform, --raw, --custom/--custom-params");
        }

        let variables = variable_set(self.vars);
        let request = if let Some(template_id) = self.template {
            RenderRequest::TemplateById {
                template_id,
                variables,
            }
        } else if let Some(platform) = self.platform {
            RenderRequest::PlatformTemplate {
                platform,
                variables,
            }
        } else if let Some(path) = self.raw {
            RenderRequest::RawConfig {
                config: read_json(&path)?.into(),
            }
        } else {
            let params = match &self.custom_params {
                Some(path) => Some(
                    serde_json::from_value::<CustomTemplateParams>(read_json(path)?)
                        .with_context(|| format!("invalid custom params in {}", path.display()))?,
                ),
                None => None,
            };
            RenderRequest::CustomTemplate {
                template_config: self.custom.as_deref().map(read_json).transpose()?.map(Into::into),
                params,
                variables,
            }
        };
        Ok(request)
    }
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn variable_set(vars: Vec<(String, ConfigValue)>) -> VariableSet {
    vars.into_iter().collect()
}

fn parse_var(raw: &str) -> Result<(String, ConfigValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("variable name is empty".to_string());
    }
    let value = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(json) => ConfigValue::from(json),
        Err(_) => ConfigValue::from(value),
    };
    Ok((name.to_string(), value))
}

fn parse_hardware(raw: &str) -> Result<HardwareMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| format!("expected auto, enabled or disabled, got `{raw}`"))
}
