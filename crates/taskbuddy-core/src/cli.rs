use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};

/// A `key=value` (or `key:value`) setting given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcOverride {
    pub key: String,
    pub value: String,
}

impl FromStr for RcOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix("rc.").unwrap_or(s);
        let (key, value) = body
            .split_once('=')
            .or_else(|| body.split_once(':'))
            .ok_or_else(|| anyhow!("expected key=value, got: {s}"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("setting name missing in: {s}"));
        }

        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl From<RcOverride> for (String, String) {
    fn from(o: RcOverride) -> Self {
        (o.key, o.value)
    }
}

fn rc_override_arg(s: &str) -> Result<RcOverride, String> {
    s.parse().map_err(|err: anyhow::Error| err.to_string())
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskbuddy",
    version,
    about = "TaskBuddy: personal task manager with list and board views",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    /// More logging on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Less logging on stderr (-q warn, -qq error).
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Override a setting for this run.
    #[arg(long = "rc", value_parser = rc_override_arg, action = ArgAction::Append)]
    pub rc_overrides: Vec<RcOverride>,

    /// Read settings from this file instead of ~/.taskbuddyrc.
    #[arg(long = "taskbuddyrc")]
    pub taskbuddyrc: Option<PathBuf>,

    /// Keep data in this directory instead of `data.location`.
    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

fn log_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        _ => "trace",
    }
}

/// Logs go to stderr so command output stays clean. `RUST_LOG` wins over
/// the flags.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level(verbose, quiet))
            .map_err(|e| anyhow!("invalid log filter: {e}"))?,
    };

    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init()
    {
        debug!(error = %err, "tracing already initialised");
    }

    Ok(())
}

/// Argv with positional `rc.key=value` settings taken out, so clap and
/// the command split never see them.
#[derive(Debug, Clone)]
pub struct SplitArgs {
    pub argv: Vec<OsString>,
    pub overrides: Vec<RcOverride>,
}

#[tracing::instrument(skip_all)]
pub fn take_rc_overrides(raw: &[OsString]) -> SplitArgs {
    let mut split = SplitArgs {
        argv: Vec::with_capacity(raw.len()),
        overrides: vec![],
    };

    for (idx, arg) in raw.iter().enumerate() {
        let parsed = arg
            .to_str()
            .filter(|s| idx > 0 && s.starts_with("rc."))
            .and_then(|s| s.parse::<RcOverride>().ok());
        match parsed {
            Some(rc) => {
                debug!(key = %rc.key, value = %rc.value, "positional setting");
                split.overrides.push(rc);
            }
            None => split.argv.push(arg.clone()),
        }
    }

    split
}

/// `[filter terms] command [command args]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub filter_terms: Vec<String>,
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    /// The first word naming a command (or a unique prefix of one) splits
    /// the line. With no such word everything filters `default_command`.
    #[tracing::instrument(skip(words))]
    pub fn parse(words: Vec<String>, default_command: &str) -> Self {
        let known = known_command_names();
        let found = words.iter().enumerate().find_map(|(idx, word)| {
            expand_command_abbrev(word, &known).map(|command| (idx, command.to_string()))
        });

        let Some((idx, command)) = found else {
            if !words.is_empty() {
                warn!(command = default_command, "no command word; all terms filter");
            }
            return Self {
                filter_terms: words,
                command: default_command.to_string(),
                command_args: vec![],
            };
        };

        debug!(word = %words[idx], command = %command, idx, "command word");
        let mut filter_terms = words;
        let command_args = filter_terms.split_off(idx + 1);
        filter_terms.truncate(idx);

        Self {
            filter_terms,
            command,
            command_args,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::{Invocation, RcOverride, log_level, take_rc_overrides};

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn words(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn positional_settings_leave_argv() {
        let argv = os(&["taskbuddy", "rc.color=off", "list", "rc.list.sort:desc"]);
        let split = take_rc_overrides(&argv);
        assert_eq!(split.argv, os(&["taskbuddy", "list"]));
        assert_eq!(
            split.overrides,
            vec![
                RcOverride {
                    key: "color".to_string(),
                    value: "off".to_string()
                },
                RcOverride {
                    key: "list.sort".to_string(),
                    value: "desc".to_string()
                }
            ]
        );
    }

    #[test]
    fn override_needs_a_key_and_separator() {
        assert!("color".parse::<RcOverride>().is_err());
        assert!("=on".parse::<RcOverride>().is_err());
        let rc: RcOverride = "default.view = board".parse().unwrap();
        assert_eq!(rc.key, "default.view");
        assert_eq!(rc.value, "board");
    }

    #[test]
    fn command_word_splits_filter_from_args() {
        let inv = Invocation::parse(words(&["category:work", "boa"]), "view");
        assert_eq!(inv.command, "board");
        assert_eq!(inv.filter_terms, words(&["category:work"]));
        assert!(inv.command_args.is_empty());

        let inv = Invocation::parse(words(&["add", "Buy", "milk", "due:today"]), "view");
        assert_eq!(inv.command, "add");
        assert_eq!(inv.command_args, words(&["Buy", "milk", "due:today"]));
    }

    #[test]
    fn no_command_word_uses_the_default() {
        let inv = Invocation::parse(words(&["groceries"]), "view");
        assert_eq!(inv.command, "view");
        assert_eq!(inv.filter_terms, words(&["groceries"]));

        let inv = Invocation::parse(vec![], "board");
        assert_eq!(inv.command, "board");
    }

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(log_level(0, 0), "warn");
        assert_eq!(log_level(2, 0), "debug");
        assert_eq!(log_level(5, 0), "trace");
        assert_eq!(log_level(3, 2), "error");
    }
}
