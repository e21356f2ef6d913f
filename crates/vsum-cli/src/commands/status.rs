//! `vsum status`

use anyhow::Result;
use serde::Serialize;
use std::process::ExitCode;
use vsum_models::Provider;
use vsum_pipeline::PipelineConfig;

#[derive(Debug, Serialize)]
struct Dependency {
    name: &'static str,
    installed: bool,
    required: bool,
    path: Option<String>,
}

fn dependencies(config: &PipelineConfig) -> Vec<Dependency> {
    let mut tools: Vec<(&'static str, bool)> = vec![("ffmpeg", true), ("ffprobe", true)];
    for provider in Provider::ALL {
        tools.push((provider.command_name(), provider == config.default_provider));
    }
    tools.push(("yt-dlp", false));

    tools
        .into_iter()
        .map(|(name, required)| {
            let path = which::which(name).ok();
            Dependency {
                name,
                installed: path.is_some(),
                required,
                path: path.map(|p| p.display().to_string()),
            }
        })
        .collect()
}

pub fn run(as_json: bool, config: &PipelineConfig) -> Result<ExitCode> {
    let deps = dependencies(config);
    let ready = deps.iter().all(|d| d.installed || !d.required);

    if as_json {
        super::print_json(&serde_json::json!({ "ready": ready, "dependencies": deps }))?;
    } else {
        println!("Dependencies");
        println!("{}", "=".repeat(50));
        for dep in &deps {
            println!(
                "  {:<8} {:<13} {}",
                dep.name,
                if dep.installed { "installed" } else { "missing" },
                if dep.required { "(required)" } else { "(optional)" }
            );
        }
        println!();
        println!("Data directory: {}", config.data_dir.display());
    }

    Ok(if ready { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
