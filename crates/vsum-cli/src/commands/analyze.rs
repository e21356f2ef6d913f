//! `vsum analyze`

use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::warn;
use vsum_models::{format_duration, Language, ModelName, Provider};
use vsum_pipeline::{AnalysisOrchestrator, AnalyzeRequest, IntervalChoice, PipelineConfig, RunReport};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Video file path or URL
    pub source: String,

    /// Seconds between frames, or "auto"
    #[arg(long)]
    pub interval: Option<IntervalChoice>,

    /// AI provider (gemini, claude)
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Model name passed to the provider CLI ("auto" lets the CLI choose)
    #[arg(long)]
    pub model: Option<String>,

    /// Output language (english, korean, japanese, chinese, auto)
    #[arg(long)]
    pub language: Option<Language>,

    /// Extra instructions appended to the analysis prompt
    #[arg(long)]
    pub prompt: Option<String>,

    /// Do not write <video>.analysis.json
    #[arg(long)]
    pub no_sidecar: bool,

    /// Do not append to the history
    #[arg(long)]
    pub no_history: bool,

    /// Keep extracted frames after a successful run
    #[arg(long)]
    pub keep_cache: bool,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl AnalyzeArgs {
    fn to_request(&self) -> AnalyzeRequest {
        AnalyzeRequest {
            source: self.source.clone(),
            interval: self.interval,
            provider: self.provider,
            model: self.model.as_deref().map(ModelName::new),
            language: self.language,
            custom_prompt: self.prompt.clone(),
            write_sidecar: !self.no_sidecar,
            write_history: !self.no_history,
            keep_cache: self.keep_cache,
        }
    }
}

pub async fn run(args: AnalyzeArgs, config: PipelineConfig) -> Result<ExitCode> {
    let orchestrator = AnalysisOrchestrator::open(config).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });

    let report = orchestrator.run(args.to_request(), cancel_rx).await;

    if args.json {
        print_report_json(&report)?;
    } else {
        print_report(&report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report_json(report: &RunReport) -> Result<()> {
    let value = json!({
        "status": report.record.status,
        "stage": report.final_stage(),
        "trace": report.trace,
        "error_kind": report.failure.as_ref().map(|f| f.error.kind()),
        "error": report.failure.as_ref().map(|f| f.error.to_string()),
        "cache_hit": report.cache_hit,
        "estimated_tokens": report.estimated_tokens,
        "cleaned": report.cleaned,
        "sidecar_path": report.sidecar_path,
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "sections": report.analysis.as_ref().map(|a| &a.text),
        "record": report.record,
    });
    super::print_json(&value)
}

fn print_report(report: &RunReport) {
    let record = &report.record;

    if let Some(failure) = &report.failure {
        eprintln!("Analysis failed during {}: {}", failure.stage, failure.error);
        eprintln!("Record: {}", record.id);
        return;
    }

    let duration = record
        .duration_seconds
        .map(format_duration)
        .unwrap_or_else(|| "?".to_string());
    println!("{}", record.video_name);
    let tokens = report
        .estimated_tokens
        .map(|t| format!(" (~{} tokens)", t))
        .unwrap_or_default();
    println!(
        "  {} | {} frames{}{} | {}/{}",
        duration,
        record.frame_count,
        if report.cache_hit { " (cached)" } else { "" },
        tokens,
        record.provider,
        record.model
    );
    println!();
    println!("{}", record.summary_text);
    println!();
    println!("Record: {}", record.id);
    if let Some(path) = &report.sidecar_path {
        println!("Sidecar: {}", path.display());
    }
}
