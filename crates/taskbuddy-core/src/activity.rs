use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::datetime::{format_project_date, start_of_day, timestamp_serde};
use crate::task::Task;

const DUE_DATE_KEY: &str = "dueDate";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Old and new value of one field, stored as a two-element array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange(pub Value, pub Value);

impl FieldChange {
    pub fn before(&self) -> &Value {
        &self.0
    }

    pub fn after(&self) -> &Value {
        &self.1
    }
}

pub type Changes = BTreeMap<String, FieldChange>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityLog {
    pub id: Uuid,
    #[serde(rename = "taskId")]
    pub task_id: Uuid,
    pub changes: Changes,
    #[serde(with = "timestamp_serde")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "isCreated")]
    pub is_created: bool,
}

impl ActivityLog {
    /// Returns `None` for an update that changes nothing once identical
    /// pairs are dropped. Creation entries are always produced.
    pub fn build(
        task_id: Uuid,
        changes: Changes,
        user_id: Uuid,
        is_created: bool,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if !is_created && changes.is_empty() {
            warn!(task = %task_id, "no changes detected");
            return None;
        }

        let processed: Changes = changes
            .into_iter()
            .filter_map(|(key, change)| {
                let change = if key == DUE_DATE_KEY {
                    FieldChange(normalize_due_value(change.0), normalize_due_value(change.1))
                } else {
                    change
                };
                if change.before() == change.after() {
                    trace!(field = %key, "identical values skipped");
                    None
                } else {
                    Some((key, change))
                }
            })
            .collect();

        if !is_created && processed.is_empty() {
            warn!(task = %task_id, "no valid changes detected");
            return None;
        }

        Some(Self {
            id: Uuid::new_v4(),
            task_id,
            changes: processed,
            timestamp: now,
            user_id,
            is_created,
        })
    }

    pub fn describe(&self) -> Vec<String> {
        if self.is_created {
            return vec!["You created this task".to_string()];
        }

        self.changes
            .iter()
            .map(|(key, change)| {
                format!(
                    "You changed {} from {} to {}",
                    field_label(key),
                    display_value(key, change.before()),
                    display_value(key, change.after())
                )
            })
            .collect()
    }
}

/// Field-level differences between two versions of a task.
pub fn diff_tasks(old: &Task, new: &Task) -> Changes {
    let before = task_fields(old);
    let after = task_fields(new);

    before
        .into_iter()
        .zip(after)
        .filter(|((_, old_value), (_, new_value))| old_value != new_value)
        .map(|((key, old_value), (_, new_value))| {
            (key.to_string(), FieldChange(old_value, new_value))
        })
        .collect()
}

/// Every populated field of a new task, recorded as changed from `null`.
pub fn creation_changes(task: &Task) -> Changes {
    task_fields(task)
        .into_iter()
        .filter(|(_, value)| !is_blank(value))
        .map(|(key, value)| (key.to_string(), FieldChange(Value::Null, value)))
        .collect()
}

fn task_fields(task: &Task) -> [(&'static str, Value); 6] {
    [
        ("title", Value::String(task.title.clone())),
        ("description", Value::String(task.description.clone())),
        ("category", Value::String(task.category.name().to_string())),
        (DUE_DATE_KEY, due_value(task.due)),
        ("status", Value::String(task.status.title().to_string())),
        (
            "attachment",
            task.attachment
                .as_ref()
                .map(|attachment| Value::String(attachment.file_name.clone()))
                .unwrap_or(Value::Null),
        ),
    ]
}

fn due_value(due: Option<DateTime<Utc>>) -> Value {
    due.map(|dt| Value::String(dt.format(TIMESTAMP_FORMAT).to_string()))
        .unwrap_or(Value::Null)
}

fn normalize_due_value(value: Value) -> Value {
    let Some(parsed) = value.as_str().and_then(parse_timestamp) else {
        return value;
    };
    match start_of_day(parsed) {
        Ok(day) => due_value(Some(day)),
        Err(err) => {
            warn!(error = %err, "could not normalize due date in activity log");
            value
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn field_label(key: &str) -> &str {
    match key {
        DUE_DATE_KEY => "due date",
        other => other,
    }
}

fn display_value(key: &str, value: &Value) -> String {
    match value {
        Value::Null => "none".to_string(),
        Value::String(s) if key == DUE_DATE_KEY => parse_timestamp(s)
            .map(format_project_date)
            .unwrap_or_else(|| s.clone()),
        Value::String(s) if s.is_empty() => "empty".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
