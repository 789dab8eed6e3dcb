mod event;
mod output;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rvm_aws::{CfnExecutor, CfnStateReader, S3BundleLoader, StsBroker};
use rvm_core::bundle::{Bundle, BundleRef};
use rvm_core::config::RvmConfig;
use rvm_core::orchestrator::Engine;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "rvm",
    about = "Role Vending Machine: reconcile declared IAM roles across accounts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Engine configuration file (JSON); defaults apply when omitted
    #[arg(long, global = true, env = "RVM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a configuration bundle to every declared account
    Run {
        /// Bucket holding the bundle archive
        #[arg(long, conflicts_with = "event_file")]
        bucket: Option<String>,

        /// Object key of the bundle archive
        #[arg(long, requires = "bucket", conflicts_with = "event_file")]
        key: Option<String>,

        /// Specific object version to fetch
        #[arg(long, requires = "key")]
        version_id: Option<String>,

        /// S3 event notification JSON naming the bundle (as delivered by
        /// the upload trigger)
        #[arg(long)]
        event_file: Option<PathBuf>,
    },

    /// Validate a local bundle archive without touching any account
    Validate {
        /// Path to a bundle zip
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        Commands::Validate { .. } => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run {
            ref bucket,
            ref key,
            ref version_id,
            ref event_file,
        } => {
            run(
                &cli,
                bucket.as_deref(),
                key.as_deref(),
                version_id.as_deref(),
                event_file.as_deref(),
            )
            .await
        }
        Commands::Validate { ref path } => validate(path, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RvmConfig> {
    match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(RvmConfig::default()),
    }
}

fn resolve_bundle_ref(
    bucket: Option<&str>,
    key: Option<&str>,
    version_id: Option<&str>,
    event_file: Option<&std::path::Path>,
) -> anyhow::Result<BundleRef> {
    match (bucket, key, event_file) {
        (_, _, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading event {}", path.display()))?;
            event::bundle_ref_from_event(&raw)
        }
        (Some(bucket), Some(key), None) => Ok(BundleRef {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version_id.map(str::to_string),
        }),
        _ => bail!("provide either --event-file or --bucket and --key"),
    }
}

async fn run(
    cli: &Cli,
    bucket: Option<&str>,
    key: Option<&str>,
    version_id: Option<&str>,
    event_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let reference = resolve_bundle_ref(bucket, key, version_id, event_file)?;

    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let region = aws
        .region()
        .map(|r| r.to_string())
        .context("no AWS region configured; set AWS_REGION")?;

    let loader = S3BundleLoader::new(aws_sdk_s3::Client::new(&aws));
    // Bundle load failure is the only error that aborts the run as a whole.
    let bundle = loader.load(&reference).await?;

    let broker = StsBroker::new(
        aws_sdk_sts::Client::new(&aws),
        config.workflow_role_name.clone(),
        config.credential_margin,
    );
    let reader = CfnStateReader::new(region.clone(), config.clone());
    let executor = CfnExecutor::new(region, config.clone());

    let engine = Engine::new(
        Arc::new(broker),
        Arc::new(reader),
        Arc::new(executor),
        config,
    );
    let report = engine.run(bundle).await;

    // Partial failure is still a completed run; the report is the surface.
    output::print_report(&report, cli.json)
}

fn validate(path: &std::path::Path, json: bool) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading bundle {}", path.display()))?;
    let reference = BundleRef {
        bucket: "local".into(),
        key: path.display().to_string(),
        version_id: None,
    };
    let bundle = Bundle::from_zip_bytes(reference, &bytes)?;

    if json {
        output::print_json(&serde_json::json!({
            "valid": true,
            "accounts": bundle.accounts.len(),
            "roles": bundle.accounts.iter().map(|a| a.roles.len()).sum::<usize>(),
        }))
    } else {
        println!(
            "bundle ok: {} accounts, {} roles",
            bundle.accounts.len(),
            bundle.accounts.iter().map(|a| a.roles.len()).sum::<usize>()
        );
        Ok(())
    }
}
