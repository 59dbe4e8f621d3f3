//! CLI interface for Lexis
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::classifier::ResearchMode;

/// Lexis legal research engine
///
/// Classifies legal questions, researches them against a search API in
/// bounded rounds and streams a grounded answer from the configured model.
#[derive(Parser, Debug)]
#[command(name = "lexis")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a question with research and a streamed model response
    Ask {
        /// The question to answer
        query: String,

        /// Conversation to continue
        #[arg(long, default_value = "cli")]
        conversation: String,

        /// User the conversation belongs to
        #[arg(long, default_value = "local")]
        user: String,

        /// Research mode (deep, lightweight)
        #[arg(long)]
        mode: Option<ResearchMode>,

        /// Case whose documents should be consulted
        #[arg(long)]
        process: Option<String>,

        /// Keep the conversation in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show how a query is classified and scored
    Classify {
        /// The query to classify
        query: String,

        /// Rule set to classify with (deep, lightweight)
        #[arg(long)]
        mode: Option<ResearchMode>,
    },

    /// Run the research loop only and show the assembled context
    Research {
        /// The query to research
        query: String,

        /// Research mode (deep, lightweight)
        #[arg(long)]
        mode: Option<ResearchMode>,
    },

    /// Show stored messages of a conversation
    History {
        /// Conversation ID
        #[arg(long)]
        conversation: String,

        /// User ID
        #[arg(long, default_value = "local")]
        user: String,

        /// Number of messages to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Detect the document kind of a drafting request and show its checklist
    Checklist {
        /// The drafting request, optionally with "field: value" lines
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["lexis", "classify", "Hola"]);
        assert!(matches!(cli.command, Command::Classify { .. }));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["lexis", "--json", "--log", "debug", "classify", "Hola"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_ask_command() {
        let cli = Cli::parse_from([
            "lexis",
            "ask",
            "¿Qué dice el artículo 15?",
            "--conversation",
            "c-1",
            "--mode",
            "lightweight",
            "--ephemeral",
        ]);
        if let Command::Ask {
            query,
            conversation,
            user,
            mode,
            process,
            ephemeral,
        } = cli.command
        {
            assert_eq!(query, "¿Qué dice el artículo 15?");
            assert_eq!(conversation, "c-1");
            assert_eq!(user, "local");
            assert_eq!(mode, Some(ResearchMode::Lightweight));
            assert!(process.is_none());
            assert!(ephemeral);
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_history_command() {
        let cli = Cli::parse_from(["lexis", "history", "--conversation", "c-1", "--limit", "20"]);
        if let Command::History {
            conversation,
            limit,
            ..
        } = cli.command
        {
            assert_eq!(conversation, "c-1");
            assert_eq!(limit, 20);
        } else {
            panic!("Expected History command");
        }
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = Cli::try_parse_from(["lexis", "research", "x", "--mode", "turbo"]);
        assert!(result.is_err());
    }
}
