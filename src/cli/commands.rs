use crate::core::turn::TurnSource;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `iris-kernel` - inspect and exercise the governance kernel.
#[derive(Parser, Debug)]
#[command(name = "iris-kernel")]
#[command(version)]
#[command(about = "Governance kernel for a single-process assistant.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.iris-kernel/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the validated effective configuration
    Config,

    /// Classify a preference statement
    Classify {
        statement: String,

        /// Who said it (user, assistant, agent, tool, system, observation)
        #[arg(long, default_value = "user")]
        source: TurnSource,
    },

    /// Derive signals for a turn read from a JSON file
    Signals {
        /// Path to a `TurnInput` JSON document
        turn: PathBuf,
    },

    /// Show recent episodic trace entries
    Trace {
        /// Only entries for this problem
        #[arg(long)]
        problem: Option<String>,

        /// Only entries of this type
        #[arg(long = "type")]
        entry_type: Option<String>,

        /// Only entries carrying this tag
        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Resolve the evidence chain behind a synthesized pattern
    Evidence { pattern_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn classify_parses_source() {
        let cli = Cli::parse_from([
            "iris-kernel",
            "classify",
            "I prefer tabs",
            "--source",
            "observation",
        ]);
        match cli.command {
            Commands::Classify { statement, source } => {
                assert_eq!(statement, "I prefer tabs");
                assert_eq!(source, TurnSource::Observation);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn trace_defaults_limit() {
        let cli = Cli::parse_from(["iris-kernel", "trace", "--problem", "p1"]);
        assert!(matches!(
            cli.command,
            Commands::Trace { limit: 20, problem: Some(ref p), .. } if p == "p1"
        ));
    }
}
