//! CLI command definitions

use clap::{Args, Parser, Subcommand};
use parley_domain::{RecomputeStep, TurnOptions};
use std::path::PathBuf;

/// CLI arguments for parley
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about = "Ask several providers at once, map and merge their answers")]
#[command(long_about = r#"
parley sends one prompt to several providers in parallel, optionally maps
where they agree and disagree, and synthesizes a merged answer. Every turn is
stored so a conversation can be continued, and past mappings or syntheses can
be recomputed by another provider without touching the timeline.

Configuration files are loaded from (in priority order):
1. PARLEY_<SECTION>__<KEY>   Environment variables
2. --config <path>           Explicit config file
3. ./parley.toml             Project-level config
4. ~/.config/parley/config.toml   Global config

Example:
  parley ask -p claude -p gemini -s claude "How do lifetimes work?"
  parley continue session-1a2b "And with async?"
  parley recompute session-1a2b ai-turn-3c4d synthesis gemini
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Override the conversation store file
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Keep conversations in memory only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Print the final result as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Print every workflow event as a JSON line while running
    #[arg(long, global = true)]
    pub events: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new conversation
    Ask {
        /// The prompt
        message: String,

        #[command(flatten)]
        turn: TurnArgs,
    },

    /// Continue an existing conversation
    Continue {
        /// Session to continue
        session: String,

        /// The prompt
        message: String,

        #[command(flatten)]
        turn: TurnArgs,

        /// Providers that start a fresh exchange instead of resuming
        #[arg(long = "reset", value_name = "PROVIDER")]
        reset: Vec<String>,
    },

    /// Re-derive the mapping or synthesis of a past turn with another provider
    Recompute {
        session: String,

        /// AI turn to re-derive from
        turn: String,

        /// Step to re-derive (mapping or synthesis)
        step: RecomputeStep,

        /// Provider writing the new output
        provider: String,

        /// Use this prompt instead of the turn's original one
        #[arg(long, value_name = "TEXT")]
        message: Option<String>,

        #[arg(long)]
        thinking: bool,
    },

    /// List sessions, or show the turns of one session
    Show {
        session: Option<String>,
    },

    /// Show the effective configuration and where it was loaded from
    Config,
}

/// Options for turns that ask providers.
#[derive(Args, Debug, Default)]
pub struct TurnArgs {
    /// Provider answering the prompt (can be specified multiple times)
    #[arg(short, long = "provider", value_name = "PROVIDER")]
    pub providers: Vec<String>,

    /// Map agreements and tensions between the answers
    #[arg(long)]
    pub map: bool,

    /// Provider writing the map (implies --map)
    #[arg(long, value_name = "PROVIDER")]
    pub mapper: Option<String>,

    /// Provider merging the answers
    #[arg(short, long, value_name = "PROVIDER")]
    pub synthesizer: Option<String>,

    #[arg(long)]
    pub thinking: bool,

    /// Hold back the individual answers until the synthesis is ready
    #[arg(long)]
    pub synthesis_first: bool,
}

impl TurnArgs {
    /// Turn options from the command line, falling back to `defaults` for
    /// whatever was not given.
    pub fn into_options(self, defaults: TurnOptions) -> TurnOptions {
        let explicit = !self.providers.is_empty();
        TurnOptions {
            providers: if explicit {
                self.providers
            } else {
                defaults.providers
            },
            include_mapping: self.map || self.mapper.is_some() || defaults.include_mapping,
            mapper: self.mapper.or(defaults.mapper),
            synthesizer: self.synthesizer.or(defaults.synthesizer),
            use_thinking: self.thinking || defaults.use_thinking,
            synthesis_first: self.synthesis_first || defaults.synthesis_first,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "parley", "ask", "-p", "a", "-p", "b", "-s", "a", "--map", "hello",
        ])
        .unwrap();
        let Command::Ask { message, turn } = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(message, "hello");
        assert_eq!(turn.providers, vec!["a", "b"]);
        assert!(turn.map);
    }

    #[test]
    fn test_parse_recompute_step() {
        let cli = Cli::try_parse_from([
            "parley", "-vv", "recompute", "s-1", "ai-1", "mapping", "b",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Recompute {
                step: RecomputeStep::Mapping,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["parley", "recompute", "s", "t", "batch", "b"]).is_err());
    }

    #[test]
    fn test_turn_args_fall_back_to_defaults() {
        let defaults = TurnOptions {
            providers: vec!["a".to_string(), "b".to_string()],
            synthesizer: Some("a".to_string()),
            ..Default::default()
        };

        let options = TurnArgs::default().into_options(defaults.clone());
        assert_eq!(options.providers, vec!["a", "b"]);
        assert_eq!(options.synthesizer.as_deref(), Some("a"));
        assert!(!options.include_mapping);

        let args = TurnArgs {
            providers: vec!["c".to_string()],
            mapper: Some("c".to_string()),
            ..Default::default()
        };
        let options = args.into_options(defaults);
        assert_eq!(options.providers, vec!["c"]);
        assert!(options.include_mapping);
        assert_eq!(options.effective_mapper(), Some("c"));
    }
}
