use super::commands::{Cli, Commands};
use crate::config::KernelConfig;
use crate::core::memory::{EpisodeEntry, EpisodeQuery, WriteRequest, write_gate};
use crate::core::preference;
use crate::core::signals::SignalEngine;
use crate::core::turn::TurnInput;
use crate::kernel::GovernanceKernel;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;

pub async fn dispatch(cli: Cli, config: KernelConfig) -> Result<()> {
    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Classify { statement, source } => {
            let verdict = preference::classify(&statement, source);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Commands::Signals { turn } => {
            let raw = fs::read_to_string(&turn)
                .with_context(|| format!("Failed to read turn file {}", turn.display()))?;
            let input: TurnInput =
                serde_json::from_str(&raw).context("Failed to parse turn JSON")?;
            let signals = SignalEngine::new(config.signals.clone()).deterministic(&input);
            let write = input.context.write_target.map(|target| {
                write_gate::evaluate(&WriteRequest::new(
                    target,
                    json!(input.text),
                    signals.clone(),
                ))
            });
            let report = json!({ "signals": signals, "write": write });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Trace {
            problem,
            entry_type,
            tag,
            limit,
        } => {
            let kernel = GovernanceKernel::from_config(config).await?;
            let query = EpisodeQuery {
                problem_id: problem,
                entry_type,
                tag,
                limit: Some(limit),
                ..EpisodeQuery::default()
            };
            let entries = kernel.bus().query_episodes(&query).await?;
            if entries.is_empty() {
                println!("No trace entries.");
            }
            for entry in &entries {
                println!("{}", render_entry(entry));
            }
            Ok(())
        }
        Commands::Evidence { pattern_id } => {
            let kernel = GovernanceKernel::from_config(config).await?;
            let pattern = kernel
                .bus()
                .get_pattern(&pattern_id)
                .await?
                .with_context(|| format!("Unknown pattern {pattern_id}"))?;
            println!(
                "{} [{}] confidence {:.2}: {}",
                pattern.id, pattern.pattern_type, pattern.confidence, pattern.recommended_action
            );
            for entry in kernel.bus().get_evidence_chain(&pattern_id).await? {
                println!("  {}", render_entry(&entry));
            }
            Ok(())
        }
    }
}

fn render_entry(entry: &EpisodeEntry) -> String {
    let tags = entry.tags.iter().cloned().collect::<Vec<_>>().join(",");
    format!(
        "{} {} {:<20} problem={} tags=[{}] {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.id,
        entry.entry_type,
        entry.problem_id.as_deref().unwrap_or("-"),
        tags,
        entry.payload
    )
}
