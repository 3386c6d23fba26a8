use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types for completion generation
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

/// On/off switch for `repricer replace`
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "repricer")]
#[command(author, version, about = "Rewrites prices in HTML as hours of work, coffees, or any unit you like", long_about = None)]
#[command(after_help = r#"Examples:
  repricer init                              Write starter settings ($20/hour)
  repricer units set coffees 0.25            One dollar buys a quarter coffee
  repricer scan page.html -o out.html        Rewrite prices once
  repricer watch page.html -o out.html       Keep rewriting, re-run on settings change
  repricer detect '$12.50'                   Check what the detector sees

Quick Start:
  1. repricer init
  2. repricer units set hours 30
  3. repricer scan page.html
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rewrite the prices in an HTML file once
    #[command(after_help = r#"Examples:
  repricer scan page.html                    Print rewritten HTML
  repricer scan page.html -o out.html        Write it to a file
  repricer scan page.html --json             List matches as JSON
"#)]
    Scan {
        /// HTML file to read
        file: PathBuf,

        /// Where to write the rewritten HTML (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print matches as JSON instead of HTML
        #[arg(long)]
        json: bool,
    },

    /// Keep rewriting an HTML file, re-scanning with backoff
    #[command(after_help = r#"Examples:
  repricer watch page.html -o out.html
  repricer watch page.html -o out.html --max-passes 5

Press Enter to re-run immediately; settings changes re-run automatically.
A changed [backoff] factor or max_ms applies from the next scheduled pass.
"#)]
    Watch {
        /// HTML file to read
        file: PathBuf,

        /// Where to write the rewritten HTML after each pass
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many passes
        #[arg(long)]
        max_passes: Option<usize>,
    },

    /// Show what the detector finds in a piece of text
    Detect {
        /// Text to inspect
        text: String,

        /// Currency symbol (default: from settings)
        #[arg(long)]
        symbol: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage conversion units
    #[command(subcommand)]
    Units(UnitsCommands),

    /// Turn converted display on or off
    Replace {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Show the settings file location and contents
    Config,

    /// Write starter settings
    Init {
        /// Overwrite existing settings
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
pub enum UnitsCommands {
    /// List configured units
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add or change a unit
    #[command(after_help = r#"Examples:
  repricer units set coffees 0.25     0.25 coffees per dollar
  repricer units set hours 30         $30 per hour of work
"#)]
    Set {
        /// Unit name
        name: String,

        /// Units per dollar (for `hours`: dollars per hour)
        value: f64,
    },

    /// Remove a unit
    Remove {
        /// Unit name
        name: String,
    },
}
