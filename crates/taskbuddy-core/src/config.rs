use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::board::{
  SortOrder,
  ViewMode
};

const RC_FILE_NAME: &str =
  ".taskbuddyrc";
const RC_ENV_VAR: &str = "TASKBUDDYRC";

/// Every setting TaskBuddy reads, with
/// its default.
const DEFAULTS: [(&str, &str); 5] = [
  ("color", "on"),
  ("data.location", "~/.taskbuddy"),
  ("default.command", "view"),
  ("default.view", "list"),
  ("list.sort", "asc")
];

/// One meaningful rc-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RcLine {
  Setting(String, String),
  Include(PathBuf)
}

/// Effective settings: defaults, then
/// the rc file chain, then overrides.
#[derive(Debug, Clone)]
pub struct Config {
  settings:         BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      settings:     DEFAULTS
        .iter()
        .map(|(key, value)| {
          (
            key.to_string(),
            value.to_string()
          )
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Reads `rc_path`, else
  /// `$TASKBUDDYRC`, else
  /// `~/.taskbuddyrc`.
  #[tracing::instrument]
  pub fn load(
    rc_path: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();

    match locate_rc(rc_path) {
      | Some(path) => {
        info!(rc = %path.display(), "reading rc file");
        cfg.read_rc(&path, &mut vec![])?;
      }
      | None => {
        debug!("no rc file; defaults only");
      }
    }

    Ok(cfg)
  }

  /// `rc.` prefixes are optional on
  /// override keys.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      let key = key
        .strip_prefix("rc.")
        .map(str::to_string)
        .unwrap_or(key);
      debug!(%key, %value, "override");
      self.set(key, value);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<&str> {
    self
      .settings
      .get(key)
      .map(String::as_str)
  }

  /// Settings in key order.
  pub fn entries(
    &self
  ) -> impl Iterator<Item = (&str, &str)>
  {
    self.settings.iter().map(
      |(key, value)| {
        (key.as_str(), value.as_str())
      }
    )
  }

  pub fn color(
    &self
  ) -> anyhow::Result<bool> {
    let raw = self
      .get("color")
      .unwrap_or("on");
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "on" | "yes" | "true" | "1" => {
        Ok(true)
      }
      | "off" | "no" | "false" | "0" => {
        Ok(false)
      }
      | other => Err(anyhow!(
        "invalid color setting: {other} \
         (expected on or off)"
      ))
    }
  }

  pub fn default_command(
    &self
  ) -> &str {
    self
      .get("default.command")
      .unwrap_or("view")
  }

  pub fn default_view(
    &self
  ) -> anyhow::Result<ViewMode> {
    self
      .get("default.view")
      .unwrap_or("list")
      .parse()
      .context("invalid default.view")
  }

  pub fn sort_order(
    &self
  ) -> anyhow::Result<SortOrder> {
    self
      .get("list.sort")
      .unwrap_or("asc")
      .parse()
      .context("invalid list.sort")
  }

  /// The data directory, created when
  /// missing. `override_dir` wins over
  /// `data.location`.
  #[tracing::instrument(skip(self))]
  pub fn data_dir(
    &self,
    override_dir: Option<&Path>
  ) -> anyhow::Result<PathBuf> {
    let dir = match override_dir {
      | Some(path) => path.to_path_buf(),
      | None => {
        let location = self
          .get("data.location")
          .ok_or_else(|| {
            anyhow!(
              "data.location is not set"
            )
          })?;
        expand_tilde(Path::new(location))
      }
    };

    if !dir.exists() {
      info!(dir = %dir.display(), "creating data directory");
      fs::create_dir_all(&dir)
        .with_context(|| {
          format!(
            "failed to create {}",
            dir.display()
          )
        })?;
    }

    Ok(dir)
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !DEFAULTS
      .iter()
      .any(|(known, _)| *known == key)
    {
      warn!(%key, "unknown setting; kept but unused");
    }
    self.settings.insert(key, value);
  }

  /// `chain` holds the canonical paths
  /// of the files currently being read.
  fn read_rc(
    &mut self,
    path: &Path,
    chain: &mut Vec<PathBuf>
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let canonical = fs::canonicalize(
      &path
    )
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
    if chain.contains(&canonical) {
      return Err(anyhow!(
        "include cycle at {}",
        path.display()
      ));
    }

    let text = fs::read_to_string(
      &canonical
    )
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
    self
      .loaded_files
      .push(path.clone());

    chain.push(canonical.clone());
    for (idx, raw) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw)
        .with_context(|| {
          format!(
            "{}:{}",
            path.display(),
            idx + 1
          )
        })?;

      match parsed {
        | None => {}
        | Some(RcLine::Setting(
          key,
          value
        )) => {
          trace!(%key, %value, "rc setting");
          self.set(key, value);
        }
        | Some(RcLine::Include(
          target
        )) => {
          let target = relative_to(
            &canonical, &target
          );
          if target.exists() {
            self.read_rc(&target, chain)?;
          } else {
            warn!(include = %target.display(), "included rc file missing; skipped");
          }
        }
      }
    }
    chain.pop();

    Ok(())
  }
}

fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if let Some(target) =
    line.strip_prefix("include ")
  {
    let target = target.trim();
    if target.is_empty() {
      return Err(anyhow!(
        "include needs a path"
      ));
    }
    return Ok(Some(RcLine::Include(
      PathBuf::from(target)
    )));
  }

  match line.split_once('=') {
    | Some((key, value))
      if !key.trim().is_empty() =>
    {
      Ok(Some(RcLine::Setting(
        key.trim().to_string(),
        value.trim().to_string()
      )))
    }
    | _ => Err(anyhow!(
      "expected `key = value` or \
       `include <path>`, got: {raw}"
    ))
  }
}

fn locate_rc(
  explicit: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = explicit {
    return Some(path.to_path_buf());
  }

  if let Ok(from_env) =
    std::env::var(RC_ENV_VAR)
  {
    return (from_env != "/dev/null")
      .then(|| PathBuf::from(from_env));
  }

  dirs::home_dir()
    .map(|home| home.join(RC_FILE_NAME))
    .filter(|candidate| {
      candidate.exists()
    })
}

/// Resolves an include against the
/// directory of the including file.
fn relative_to(
  including: &Path,
  target: &Path
) -> PathBuf {
  let target = expand_tilde(target);
  if target.is_absolute() {
    return target;
  }
  including
    .parent()
    .map(|dir| dir.join(&target))
    .unwrap_or(target)
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  if let Ok(rest) =
    path.strip_prefix("~")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::Config;
  use crate::board::{
    SortOrder,
    ViewMode
  };

  #[test]
  fn rc_chain_then_overrides() {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("sort.rc"),
      "list.sort = desc\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# views\ndefault.view = board  # trailing\ninclude sort.rc\ncolor=off\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&rc))
      .expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.default_view().expect("view"),
      ViewMode::Board
    );
    assert_eq!(
      cfg.sort_order().expect("sort"),
      SortOrder::Descending
    );
    assert!(
      !cfg.color().expect("color")
    );
    assert_eq!(
      cfg.default_command(),
      "view"
    );

    cfg.apply_overrides(vec![
      (
        "rc.default.view".to_string(),
        "list".to_string()
      ),
      (
        "color".to_string(),
        "yes".to_string()
      ),
    ]);
    assert_eq!(
      cfg.default_view().expect("view"),
      ViewMode::List
    );
    assert!(cfg.color().expect("color"));
  }

  #[test]
  fn self_include_is_a_cycle() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("loop.rc");
    fs::write(&rc, "include loop.rc\n")
      .expect("write rc");

    let err = Config::load(Some(&rc))
      .expect_err("cycle");
    assert!(
      format!("{err:#}")
        .contains("include cycle")
    );
  }

  #[test]
  fn indirect_include_cycle_is_an_error()
  {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("a.rc"),
      "color = off\ninclude b.rc\n"
    )
    .expect("write a");
    fs::write(
      temp.path().join("b.rc"),
      "include a.rc\n"
    )
    .expect("write b");

    let err = Config::load(Some(
      &temp.path().join("a.rc")
    ))
    .expect_err("cycle");
    assert!(
      format!("{err:#}")
        .contains("include cycle")
    );
  }

  #[test]
  fn same_file_included_twice_is_not_a_cycle()
  {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("shared.rc"),
      "list.sort = desc\n"
    )
    .expect("write shared");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "include shared.rc\ninclude shared.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load");
    assert_eq!(cfg.loaded_files.len(), 3);
  }

  #[test]
  fn malformed_lines_and_values() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    let err = Config::load(Some(&rc))
      .expect_err("malformed");
    assert!(
      format!("{err:#}")
        .contains("bad.rc:1")
    );

    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "color".to_string(),
      "sometimes".to_string()
    )]);
    assert!(cfg.color().is_err());
  }

  #[test]
  fn entries_are_sorted_and_data_dir_is_created()
  {
    let cfg = Config::default();
    let keys: Vec<&str> = cfg
      .entries()
      .map(|(key, _)| key)
      .collect();
    assert_eq!(
      keys,
      vec![
        "color",
        "data.location",
        "default.command",
        "default.view",
        "list.sort"
      ]
    );

    let temp =
      tempdir().expect("tempdir");
    let wanted =
      temp.path().join("nested/data");
    let dir = cfg
      .data_dir(Some(&wanted))
      .expect("data dir");
    assert_eq!(dir, wanted);
    assert!(wanted.is_dir());
  }
}
