use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use invoice_relay::{
    classify, config, init_telemetry, shutdown_telemetry, HttpTransport, InvoiceDocument,
    Stage, WorkflowOrchestrator,
};

#[derive(Parser)]
#[command(name = "invoice-relay")]
#[command(about = "Drives invoice submissions through a remote automation workflow")]
#[command(long_about = "Invoice Relay triggers the remote automation workflow, uploads an \
                       invoice document to the resume address the engine returns, follows \
                       the asynchronous replies and reports the terminal outcome.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full submission: trigger, upload, await resolution
    Run {
        /// Path to the invoice file to submit
        file: PathBuf,
        /// Send the completion webhook once the submission resolves
        #[arg(long, help = "Call the completion webhook after resolution")]
        finalize: bool,
        /// Override the configured trigger address
        #[arg(long, help = "Trigger URL of the remote workflow")]
        trigger_url: Option<String>,
        /// How long to wait for the submission to resolve
        #[arg(long, default_value = "60", help = "Seconds to wait for resolution")]
        wait_seconds: u64,
    },
    /// Trigger the workflow and print the resume address it returns
    Trigger {
        /// Override the configured trigger address
        #[arg(long, help = "Trigger URL of the remote workflow")]
        trigger_url: Option<String>,
    },
    /// Classify a saved engine reply body (debugging aid)
    Classify {
        /// Path to a JSON file holding the reply body
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            finalize,
            trigger_url,
            wait_seconds,
        } => tokio::runtime::Runtime::new()?.block_on(async {
            run_submission(&file, finalize, trigger_url, wait_seconds).await
        }),
        Commands::Trigger { trigger_url } => tokio::runtime::Runtime::new()?
            .block_on(async { trigger_only(trigger_url).await }),
        Commands::Classify { file } => classify_file(&file),
    }
}

async fn run_submission(
    file: &Path,
    finalize: bool,
    trigger_url: Option<String>,
    wait_seconds: u64,
) -> Result<()> {
    let orchestrator = build_orchestrator(trigger_url)?;

    orchestrator.start().await?;
    if orchestrator.stage().await == Stage::Start {
        print_log(&orchestrator).await;
        orchestrator.teardown().await;
        anyhow::bail!("workflow could not be triggered, see log above");
    }

    let document = load_document(file).await?;
    orchestrator.set_document(Some(document)).await?;
    orchestrator.submit().await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_seconds);
    while orchestrator.stage().await != Stage::Resolved && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    if finalize {
        orchestrator.finalize().await?;
    }

    print_steps(&orchestrator).await;
    print_log(&orchestrator).await;

    let session = orchestrator.snapshot().await;
    orchestrator.teardown().await;
    shutdown_telemetry();

    match session.stage {
        Stage::Resolved if session.errored => {
            anyhow::bail!("invoice processing finished with errors")
        }
        Stage::Resolved => {
            println!("Invoice processed successfully");
            Ok(())
        }
        stage => anyhow::bail!(
            "submission did not resolve within {wait_seconds}s (stage: {})",
            stage.as_str()
        ),
    }
}

async fn trigger_only(trigger_url: Option<String>) -> Result<()> {
    let orchestrator = build_orchestrator(trigger_url)?;
    orchestrator.start().await?;

    let session = orchestrator.snapshot().await;
    print_log(&orchestrator).await;
    orchestrator.teardown().await;
    shutdown_telemetry();

    match session.resume_url {
        Some(url) => {
            println!("Resume URL: {url}");
            Ok(())
        }
        None => anyhow::bail!("no resume URL received"),
    }
}

fn classify_file(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let body: serde_json::Value =
        serde_json::from_str(&text).with_context(|| "reply body is not valid JSON")?;

    let result = classify(&body);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn build_orchestrator(trigger_url: Option<String>) -> Result<WorkflowOrchestrator> {
    let cfg = config()?;
    if cfg.observability.tracing_enabled {
        init_telemetry()?;
    }

    let transport = HttpTransport::new(Duration::from_secs(cfg.workflow.request_timeout_seconds))
        .map_err(|e| anyhow::anyhow!("failed to build transport: {e}"))?;
    let trigger_url = trigger_url.unwrap_or_else(|| cfg.workflow.trigger_url.clone());

    Ok(WorkflowOrchestrator::new(Arc::new(transport), trigger_url)
        .with_stage_pacing(Duration::from_millis(cfg.workflow.stage_pacing_ms))
        .with_poll_interval(Duration::from_millis(cfg.workflow.status_poll_interval_ms)))
}

async fn load_document(file: &Path) -> Result<InvoiceDocument> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "invoice.xml".to_string());
    let content_type = match file.extension().and_then(|e| e.to_str()) {
        Some("xml") => "text/xml",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    };
    Ok(InvoiceDocument::new(name, content_type, bytes))
}

async fn print_steps(orchestrator: &WorkflowOrchestrator) {
    println!("Steps:");
    for step in orchestrator.step_report().await {
        println!(
            "  [{:>9}] {} - {}",
            step.status.as_str(),
            step.title,
            step.description
        );
    }
}

async fn print_log(orchestrator: &WorkflowOrchestrator) {
    println!("System log:");
    for entry in orchestrator.log_entries().await {
        println!(
            "  {} [{:?}] {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.severity,
            entry.message
        );
    }
}
