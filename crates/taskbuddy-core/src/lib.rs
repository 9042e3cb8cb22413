pub mod activity;
pub mod auth;
pub mod board;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod render;
pub mod state;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::cli::{
  GlobalCli,
  Invocation
};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::render::Renderer;

/// Entry point of the `taskbuddy`
/// binary.
#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let split =
    cli::take_rc_overrides(&raw_args);
  let cli =
    GlobalCli::parse_from(split.argv);
  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;
  debug!(overrides = ?split.overrides, "positional settings");

  let cfg = settings(
    &cli,
    split.overrides
  )?;
  let store = open_store(
    &cfg,
    &cli
  )?;
  let mut renderer =
    Renderer::new(cfg.color()?);

  let words = cli
    .rest
    .iter()
    .map(|arg| {
      arg.to_string_lossy().into_owned()
    })
    .collect();
  let inv = Invocation::parse(
    words,
    cfg.default_command()
  );
  info!(command = %inv.command, "running");

  commands::dispatch(
    &store,
    &cfg,
    &mut renderer,
    inv
  )
}

/// Rc file first, then positional
/// `rc.` settings, then `--rc` flags.
fn settings(
  cli: &GlobalCli,
  positional: Vec<cli::RcOverride>
) -> anyhow::Result<Config> {
  let mut cfg = Config::load(
    cli.taskbuddyrc.as_deref()
  )?;
  cfg.apply_overrides(
    positional
      .into_iter()
      .chain(
        cli.rc_overrides.iter().cloned()
      )
      .map(Into::into)
  );
  Ok(cfg)
}

fn open_store(
  cfg: &Config,
  cli: &GlobalCli
) -> anyhow::Result<DataStore> {
  let dir = cfg
    .data_dir(cli.data.as_deref())
    .context(
      "failed to resolve data \
       directory"
    )?;
  DataStore::open(&dir).with_context(
    || {
      format!(
        "failed to open datastore at \
         {}",
        dir.display()
      )
    }
  )
}
