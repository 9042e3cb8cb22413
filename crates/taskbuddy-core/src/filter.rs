use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use tracing::{
  debug,
  trace
};

use crate::datetime::{
  parse_due_expr,
  to_project_date
};
use crate::task::{
  Category,
  Task
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum CategoryFilter {
  #[default]
  All,
  Only(Category)
}

impl CategoryFilter {
  pub fn parse(
    raw: &str
  ) -> anyhow::Result<Self> {
    if raw.trim().eq_ignore_ascii_case(
      "all"
    ) {
      return Ok(Self::All);
    }
    Ok(Self::Only(raw.parse()?))
  }

  fn admits(
    self,
    category: Category
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Only(wanted) => {
        wanted == category
      }
    }
  }
}

/// Client-side view filter, recomputed
/// over the full task set.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct FilterState {
  pub category:   CategoryFilter,
  pub due_cutoff: Option<NaiveDate>,
  pub search:     String
}

impl FilterState {
  /// `category:<c>` and `due:<expr>`
  /// select fields; every other term
  /// is part of the search string.
  #[tracing::instrument(skip(
    terms, now
  ))]
  pub fn parse(
    terms: &[String],
    now: DateTime<Utc>
  ) -> anyhow::Result<Self> {
    let mut state = Self::default();
    let mut words = Vec::new();

    for term in terms {
      if let Some((key, value)) =
        term.split_once(':')
      {
        match key
          .to_ascii_lowercase()
          .as_str()
        {
          | "category" | "cat" => {
            state.category =
              CategoryFilter::parse(
                value
              )?;
            continue;
          }
          | "due" => {
            let due = parse_due_expr(
              value, now
            )?;
            state.due_cutoff = Some(
              to_project_date(due)
            );
            continue;
          }
          | _ => {}
        }
      }
      words.push(term.as_str());
    }

    state.search = words.join(" ");
    debug!(?state, "parsed filter state");
    Ok(state)
  }

  pub fn is_active(&self) -> bool {
    self.category != CategoryFilter::All
      || self.due_cutoff.is_some()
      || !self.search.trim().is_empty()
  }

  pub fn is_searching(&self) -> bool {
    !self.search.trim().is_empty()
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    let category_ok =
      self.category.admits(task.category);

    let due_ok = match self.due_cutoff {
      | None => true,
      | Some(cutoff) => task
        .due
        .is_some_and(|due| {
          to_project_date(due) <= cutoff
        })
    };

    let needle =
      self.search.trim().to_lowercase();
    let search_ok = needle.is_empty()
      || task
        .title
        .to_lowercase()
        .contains(&needle);

    let ok =
      category_ok && due_ok && search_ok;
    trace!(id = %task.id, category_ok, due_ok, search_ok, "filter evaluation");
    ok
  }

  /// The tasks a view displays: the
  /// full set when no filter is active.
  pub fn apply<'a>(
    &self,
    tasks: &'a [Task]
  ) -> Vec<&'a Task> {
    if !self.is_active() {
      return tasks.iter().collect();
    }
    tasks
      .iter()
      .filter(|task| self.matches(task))
      .collect()
  }
}
