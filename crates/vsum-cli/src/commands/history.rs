//! `vsum history`

use anyhow::Result;
use clap::Args;
use std::process::ExitCode;
use vsum_models::{format_duration, AnalysisRecord, RecordSummary};
use vsum_pipeline::{MetadataStore, PipelineConfig};

/// Characters of summary shown in JSON listings.
const JSON_PREVIEW_CHARS: usize = 200;
const TEXT_PREVIEW_CHARS: usize = 100;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of records to list
    #[arg(long, short, default_value_t = 10)]
    pub limit: usize,

    /// Show the record whose ID starts with this prefix
    #[arg(long)]
    pub id: Option<String>,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: HistoryArgs, config: &PipelineConfig) -> Result<ExitCode> {
    let store = MetadataStore::new(config.history_path());

    if let Some(prefix) = &args.id {
        let record = store.find_by_id_prefix(prefix).await?;
        if args.json {
            super::print_json(&record)?;
        } else {
            print_record(&record);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let records = store.list(Some(args.limit)).await?;
    if args.json {
        let summaries: Vec<RecordSummary> = records.iter().map(|r| r.summary(JSON_PREVIEW_CHARS)).collect();
        super::print_json(&summaries)?;
        return Ok(ExitCode::SUCCESS);
    }

    if records.is_empty() {
        println!("No analyses yet.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Analysis history (latest {})", records.len());
    println!("{}", "=".repeat(70));
    for (i, record) in records.iter().enumerate() {
        println!();
        println!("{}. [{}] {}", i + 1, record.id.short(), record.video_name);
        println!(
            "   {} | {} | {} frames | {} | {}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.duration_seconds.map(format_duration).unwrap_or_else(|| "?".into()),
            record.frame_count,
            record.model,
            record.status.as_str()
        );
        let preview = record.preview(TEXT_PREVIEW_CHARS).replace('\n', " ");
        if !preview.is_empty() {
            println!("   {}", preview);
        }
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

fn print_record(record: &AnalysisRecord) {
    println!("ID:         {}", record.id);
    println!("Video:      {}", record.video_name);
    println!("Source:     {}", record.source_reference);
    if let Some(duration) = record.duration_seconds {
        println!("Duration:   {}", format_duration(duration));
    }
    if let Some((w, h)) = record.resolution {
        println!("Resolution: {}x{}", w, h);
    }
    if let Some(plan) = &record.plan {
        println!("Plan:       {}", plan.describe());
    }
    println!("Frames:     {}", record.frame_count);
    println!("AI:         {}/{}", record.provider, record.model);
    println!("Language:   {}", record.language);
    println!("Created:    {}", record.timestamp.to_rfc3339());
    println!("Status:     {}", record.status.as_str());
    if let Some(stage) = &record.failed_stage {
        println!("Failed at:  {}", stage);
    }
    if let Some(error) = &record.error {
        println!("Error:      {}", error);
    }
    println!("\n--- Summary ---\n");
    println!("{}", record.summary_text);
}
