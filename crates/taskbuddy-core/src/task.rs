use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::{start_of_day, timestamp_serde, to_project_date};

pub const DESCRIPTION_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    #[serde(rename = "TODO")]
    Todo,
    #[serde(rename = "IN PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Todo, Status::InProgress, Status::Completed];

    pub fn title(self) -> &'static str {
        match self {
            Status::Todo => "TODO",
            Status::InProgress => "IN PROGRESS",
            Status::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" | "to-do" => Ok(Status::Todo),
            "in progress" | "in-progress" | "in_progress" | "inprogress" | "doing" => {
                Ok(Status::InProgress)
            }
            "completed" | "complete" | "done" => Ok(Status::Completed),
            other => Err(anyhow!(
                "unknown status: {other} (expected todo, in-progress, or completed)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Work,
    Personal,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Work, Category::Personal];

    pub fn name(self) -> &'static str {
        match self {
            Category::Work => "Work",
            Category::Personal => "Personal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(Category::Work),
            "personal" => Ok(Category::Personal),
            other => Err(anyhow!("unknown category: {other} (expected work or personal)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Attachment {
    /// Only images and PDFs are accepted, matched on the file extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("attachment path has no file name: {}", path.display()))?;
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let content_type = match extension.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            "bmp" => "image/bmp",
            "pdf" => "application/pdf",
            _ => {
                return Err(anyhow!(
                    "unsupported attachment {file_name}: only images and PDF files are accepted"
                ));
            }
        };

        Ok(Self {
            file_name,
            content_type: content_type.to_string(),
            url: None,
        })
    }

    pub fn is_accepted_type(&self) -> bool {
        self.content_type.starts_with("image/") || self.content_type == "application/pdf"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,

    #[serde(rename = "userId")]
    pub user_id: Uuid,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub category: Category,

    #[serde(rename = "dueDate", default, with = "timestamp_serde::option")]
    pub due: Option<DateTime<Utc>>,

    pub status: Status,

    #[serde(default)]
    pub attachment: Option<Attachment>,

    #[serde(with = "timestamp_serde")]
    pub created: DateTime<Utc>,

    #[serde(with = "timestamp_serde")]
    pub modified: DateTime<Utc>,
}

/// Form input for a new task. Everything but the description is required.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: Option<String>,
    pub description: String,
    pub category: Option<Category>,
    pub due: Option<DateTime<Utc>>,
    pub status: Option<Status>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub due: Option<DateTime<Utc>>,
    pub status: Option<Status>,
    pub attachment: Option<Option<Attachment>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.due.is_none()
            && self.status.is_none()
            && self.attachment.is_none()
    }

    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl TaskDraft {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.as_deref().is_none_or(|title| title.trim().is_empty()) {
            missing.push("Title");
        }
        if self.category.is_none() {
            missing.push("Category");
        }
        if self.due.is_none() {
            missing.push("Due Date");
        }
        if self.status.is_none() {
            missing.push("Status");
        }
        missing
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(anyhow!("missing required fields: {}", missing.join(", ")));
        }
        validate_description(&self.description)?;
        if let Some(attachment) = &self.attachment
            && !attachment.is_accepted_type()
        {
            return Err(anyhow!(
                "unsupported attachment type {}: only images and PDF files are accepted",
                attachment.content_type
            ));
        }
        Ok(())
    }
}

fn validate_description(description: &str) -> anyhow::Result<()> {
    let len = description.chars().count();
    if len > DESCRIPTION_MAX_CHARS {
        return Err(anyhow!(
            "description is {len} characters; the limit is {DESCRIPTION_MAX_CHARS}"
        ));
    }
    Ok(())
}

impl Task {
    pub fn from_draft(draft: TaskDraft, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<Self> {
        draft.validate()?;

        let (Some(title), Some(category), Some(due), Some(status)) =
            (draft.title, draft.category, draft.due, draft.status)
        else {
            return Err(anyhow!("task draft is incomplete"));
        };

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.trim().to_string(),
            description: draft.description,
            category,
            due: Some(start_of_day(due)?),
            status,
            attachment: draft.attachment,
            created: now,
            modified: now,
        })
    }

    pub fn apply_patch(&mut self, patch: TaskPatch, now: DateTime<Utc>) -> anyhow::Result<()> {
        let title = match patch.title {
            Some(title) => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(anyhow!("title cannot be empty"));
                }
                Some(title)
            }
            None => None,
        };
        if let Some(description) = &patch.description {
            validate_description(description)?;
        }
        let due = patch.due.map(start_of_day).transpose()?;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if due.is_some() {
            self.due = due;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(attachment) = patch.attachment {
            self.attachment = attachment;
        }
        self.modified = now;
        Ok(())
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != Status::Completed
            && self
                .due
                .is_some_and(|due| to_project_date(due) < to_project_date(now))
    }
}
