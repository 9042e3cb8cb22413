use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::auth::UserProfile;
use crate::task::{Attachment, Status, Task};

/// Document store backed by one JSON-lines file per collection.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub activity_path: PathBuf,
    pub users_path: PathBuf,
    pub session_path: PathBuf,
    pub attachments_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        let activity_path = data_dir.join("activity_logs.data");
        let users_path = data_dir.join("users.data");
        let session_path = data_dir.join("session.data");
        let attachments_dir = data_dir.join("attachments");

        for path in [&tasks_path, &activity_path, &users_path, &session_path] {
            if !path.exists() {
                fs::write(path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            activity = %activity_path.display(),
            users = %users_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            activity_path,
            users_path,
            session_path,
            attachments_dir,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_all_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    /// Tasks owned by `user_id`, in insertion order.
    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self, user_id: Uuid) -> anyhow::Result<Vec<Task>> {
        let tasks: Vec<Task> = self
            .load_all_tasks()?
            .into_iter()
            .filter(|task| task.user_id == user_id)
            .collect();
        debug!(count = tasks.len(), "loaded user tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, tasks))]
    fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn insert_task(&self, task: &Task) -> anyhow::Result<()> {
        let mut tasks = self.load_all_tasks()?;
        if tasks.iter().any(|existing| existing.id == task.id) {
            return Err(anyhow!("task already exists: {}", task.id));
        }
        tasks.push(task.clone());
        self.save_tasks(&tasks)?;
        info!(user = %task.user_id, "task inserted");
        Ok(())
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn replace_task(&self, task: &Task) -> anyhow::Result<()> {
        let mut tasks = self.load_all_tasks()?;
        let slot = tasks
            .iter_mut()
            .find(|existing| existing.id == task.id && existing.user_id == task.user_id)
            .ok_or_else(|| anyhow!("task not found: {}", task.id))?;
        *slot = task.clone();
        self.save_tasks(&tasks)?;
        info!("task replaced");
        Ok(())
    }

    /// Removes the task together with its activity log and stored attachment.
    #[tracing::instrument(skip(self))]
    pub fn delete_task(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<()> {
        self.delete_many(user_id, &[id])
    }

    /// Batch status write: every id is checked before the collection is
    /// written once.
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn set_status_many(
        &self,
        user_id: Uuid,
        ids: &[Uuid],
        status: Status,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tasks = self.load_all_tasks()?;
        ensure_all_owned(&tasks, user_id, ids)?;

        let wanted: BTreeSet<Uuid> = ids.iter().copied().collect();
        for task in tasks.iter_mut().filter(|task| wanted.contains(&task.id)) {
            task.status = status;
            task.modified = now;
        }
        self.save_tasks(&tasks)?;
        info!(%status, "batch status update written");
        Ok(())
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn delete_many(&self, user_id: Uuid, ids: &[Uuid]) -> anyhow::Result<()> {
        let tasks = self.load_all_tasks()?;
        ensure_all_owned(&tasks, user_id, ids)?;

        let doomed: BTreeSet<Uuid> = ids.iter().copied().collect();
        let before = tasks.len();
        let kept: Vec<Task> = tasks
            .into_iter()
            .filter(|task| !doomed.contains(&task.id))
            .collect();
        self.save_tasks(&kept)?;

        let logs: Vec<ActivityLog> = load_jsonl(&self.activity_path)?;
        let kept_logs: Vec<ActivityLog> = logs
            .into_iter()
            .filter(|log| !doomed.contains(&log.task_id))
            .collect();
        save_jsonl_atomic(&self.activity_path, &kept_logs)
            .context("failed to save activity_logs.data")?;

        for id in &doomed {
            self.remove_attachments(*id)?;
        }

        info!(before, after = kept.len(), "tasks deleted");
        Ok(())
    }

    /// Copies `source` under `attachments/<task-id>/` and returns the
    /// attachment record pointing at the copy.
    #[tracing::instrument(skip(self, source), fields(source = %source.display()))]
    pub fn store_attachment(&self, task_id: Uuid, source: &Path) -> anyhow::Result<Attachment> {
        let mut attachment = Attachment::from_path(source)?;
        let dir = self.attachments_dir.join(task_id.to_string());
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let target = dir.join(&attachment.file_name);
        fs::copy(source, &target).with_context(|| {
            format!("failed to copy {} to {}", source.display(), target.display())
        })?;

        attachment.url = Some(target.display().to_string());
        debug!(target = %target.display(), "attachment stored");
        Ok(attachment)
    }

    /// Drops every stored file of the task. Missing directories are fine.
    #[tracing::instrument(skip(self))]
    pub fn remove_attachments(&self, task_id: Uuid) -> anyhow::Result<()> {
        let dir = self.attachments_dir.join(task_id.to_string());
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
            debug!(dir = %dir.display(), "attachments removed");
        }
        Ok(())
    }

    /// Removes one stored copy. Only paths inside the attachment store are
    /// touched.
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub fn discard_attachment_file(&self, path: &Path) -> anyhow::Result<()> {
        if !path.starts_with(&self.attachments_dir) {
            return Err(anyhow!("not a stored attachment: {}", path.display()));
        }
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, log), fields(task = %log.task_id))]
    pub fn append_activity(&self, log: &ActivityLog) -> anyhow::Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.activity_path)
            .with_context(|| format!("failed to open {}", self.activity_path.display()))?;
        let serialized = serde_json::to_string(log)?;
        writeln!(file, "{serialized}")?;
        debug!(changes = log.changes.len(), "activity appended");
        Ok(())
    }

    /// Activity entries for one task, oldest first.
    #[tracing::instrument(skip(self))]
    pub fn load_activity(&self, task_id: Uuid) -> anyhow::Result<Vec<ActivityLog>> {
        let logs: Vec<ActivityLog> =
            load_jsonl(&self.activity_path).context("failed to load activity_logs.data")?;
        let mut logs: Vec<ActivityLog> =
            logs.into_iter().filter(|log| log.task_id == task_id).collect();
        logs.sort_by_key(|log| log.timestamp);
        Ok(logs)
    }

    #[tracing::instrument(skip(self))]
    pub fn find_user(&self, uid: Uuid) -> anyhow::Result<Option<UserProfile>> {
        let users: Vec<UserProfile> =
            load_jsonl(&self.users_path).context("failed to load users.data")?;
        Ok(users.into_iter().find(|user| user.uid == uid))
    }

    #[tracing::instrument(skip(self))]
    pub fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<UserProfile>> {
        let users: Vec<UserProfile> =
            load_jsonl(&self.users_path).context("failed to load users.data")?;
        Ok(users
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(email)))
    }

    #[tracing::instrument(skip(self, user), fields(uid = %user.uid))]
    pub fn insert_user(&self, user: &UserProfile) -> anyhow::Result<()> {
        let mut users: Vec<UserProfile> =
            load_jsonl(&self.users_path).context("failed to load users.data")?;
        if users.iter().any(|existing| existing.uid == user.uid) {
            return Err(anyhow!("user already exists: {}", user.uid));
        }
        users.push(user.clone());
        save_jsonl_atomic(&self.users_path, &users).context("failed to save users.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn read_session(&self) -> anyhow::Result<Option<Uuid>> {
        let raw = fs::read_to_string(&self.session_path)
            .with_context(|| format!("failed reading {}", self.session_path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let uid = Uuid::parse_str(trimmed)
            .with_context(|| format!("corrupt session in {}", self.session_path.display()))?;
        Ok(Some(uid))
    }

    #[tracing::instrument(skip(self))]
    pub fn write_session(&self, uid: Uuid) -> anyhow::Result<()> {
        fs::write(&self.session_path, uid.to_string())
            .with_context(|| format!("failed writing {}", self.session_path.display()))
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_session(&self) -> anyhow::Result<()> {
        fs::write(&self.session_path, "")
            .with_context(|| format!("failed writing {}", self.session_path.display()))
    }
}

fn ensure_all_owned(tasks: &[Task], user_id: Uuid, ids: &[Uuid]) -> anyhow::Result<()> {
    for id in ids {
        if !tasks
            .iter()
            .any(|task| task.id == *id && task.user_id == user_id)
        {
            return Err(anyhow!("task not found: {id}"));
        }
    }
    Ok(())
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
