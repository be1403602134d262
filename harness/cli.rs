//! Command line interface of the `jam-harness` binary.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Parsed command line flags; every value overrides the settings layers below it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// TOML settings file
    pub config: Option<PathBuf>,
    /// Target node public key (hex)
    pub target: Option<String>,
    /// Alias of the target's peer
    pub peer_alias: Option<String>,
    /// Protected jam strategy
    pub strategy: Option<String>,
    /// Close attacker channels after the run
    pub cleanup: bool,
    /// Force-close instead of cooperative close
    pub force_close: bool,
    /// Log filter directive, overriding `RUST_LOG`
    pub log_level: Option<String>,
    /// Print the resolved settings as TOML and exit
    pub print_settings: bool,
}

pub fn command() -> Command {
    Command::new("jam-harness")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run a reputation jamming attack against a simulated target channel")
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .help("TOML settings file")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("target")
            .short('t')
            .long("target")
            .value_name("HEX")
            .help("Public key of the target node"))
        .arg(Arg::new("peer-alias")
            .short('p')
            .long("peer-alias")
            .value_name("ALIAS")
            .help("Alias of the target's peer"))
        .arg(Arg::new("strategy")
            .short('s')
            .long("strategy")
            .value_name("STRATEGY")
            .help("Protected slot jam strategy (slow, fast)")
            .value_parser(["slow", "fast"]))
        .arg(Arg::new("cleanup")
            .long("cleanup")
            .help("Close all attacker channels after the run")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("force-close")
            .long("force-close")
            .help("Force-close channels during cleanup")
            .requires("cleanup")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("log-level")
            .long("log-level")
            .value_name("FILTER")
            .help("Log filter, e.g. debug or jamming_attack=trace"))
        .arg(Arg::new("print-settings")
            .long("print-settings")
            .help("Print the resolved settings as TOML and exit")
            .action(ArgAction::SetTrue))
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config: matches.get_one::<PathBuf>("config").cloned(),
            target: matches.get_one::<String>("target").cloned(),
            peer_alias: matches.get_one::<String>("peer-alias").cloned(),
            strategy: matches.get_one::<String>("strategy").cloned(),
            cleanup: matches.get_flag("cleanup"),
            force_close: matches.get_flag("force-close"),
            log_level: matches.get_one::<String>("log-level").cloned(),
            print_settings: matches.get_flag("print-settings"),
        }
    }

    /// Parse the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }
}
