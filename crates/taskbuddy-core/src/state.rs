use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{ActivityLog, Changes, creation_changes, diff_tasks};
use crate::auth::UserProfile;
use crate::board::{DragResult, resolve_drop};
use crate::datastore::DataStore;
use crate::filter::FilterState;
use crate::task::{Attachment, Status, Task, TaskDraft, TaskPatch};

/// In-memory task set of the signed-in user.
///
/// Mutations update memory first, then write the store; a failed write
/// restores the previous in-memory state before the error is returned.
#[derive(Debug)]
pub struct TaskState {
    user: UserProfile,
    tasks: Vec<Task>,
    filter: FilterState,
    current: Option<Uuid>,
}

impl TaskState {
    #[instrument(skip(store, user), fields(uid = %user.uid))]
    pub fn load(store: &DataStore, user: UserProfile) -> anyhow::Result<Self> {
        let tasks = store
            .load_tasks(user.uid)
            .context("failed to fetch tasks")?;
        debug!(count = tasks.len(), "task state loaded");
        Ok(Self {
            user,
            tasks,
            filter: FilterState::default(),
            current: None,
        })
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: FilterState) {
        debug!(?filter, "filter changed");
        self.filter = filter;
    }

    pub fn filtered(&self) -> Vec<&Task> {
        self.filter.apply(&self.tasks)
    }

    /// Looks a task up by its id or a unique prefix of it.
    pub fn find(&self, selector: &str) -> anyhow::Result<&Task> {
        let needle = selector.trim().replace('-', "").to_ascii_lowercase();
        if needle.is_empty() {
            return Err(anyhow!("empty task id"));
        }

        let mut hits = self
            .tasks
            .iter()
            .filter(|task| task.id.simple().to_string().starts_with(&needle));
        let first = hits.next().ok_or_else(|| anyhow!("no task matches id {selector}"))?;
        if hits.next().is_some() {
            return Err(anyhow!("task id {selector} is ambiguous; use more characters"));
        }
        Ok(first)
    }

    /// Resolves selectors to ids, dropping duplicates and keeping order.
    pub fn resolve_ids(&self, selectors: &[String]) -> anyhow::Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(selectors.len());
        for selector in selectors {
            let id = self.find(selector)?.id;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn current(&self) -> Option<&Task> {
        let id = self.current?;
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn set_current(&mut self, selector: &str) -> anyhow::Result<&Task> {
        let id = self.find(selector)?.id;
        self.current = Some(id);
        self.current()
            .ok_or_else(|| anyhow!("task disappeared while selecting: {id}"))
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    #[instrument(skip(self, store, draft, attachment_source, now))]
    pub fn add_task(
        &mut self,
        store: &DataStore,
        mut draft: TaskDraft,
        attachment_source: Option<&Path>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Task> {
        if let Some(source) = attachment_source {
            draft.attachment = Some(Attachment::from_path(source)?);
        }
        let mut task = Task::from_draft(draft, self.user.uid, now)?;
        if let Some(source) = attachment_source {
            task.attachment = Some(store.store_attachment(task.id, source)?);
        }

        self.tasks.push(task.clone());
        if let Err(err) = store.insert_task(&task) {
            self.tasks.pop();
            if task.attachment.is_some()
                && let Err(cleanup) = store.remove_attachments(task.id)
            {
                warn!(id = %task.id, error = %cleanup, "failed to drop orphaned attachment");
            }
            return Err(err.context("failed to add task"));
        }

        info!(id = %task.id, status = %task.status, "task added");
        self.record(store, task.id, creation_changes(&task), true, now);
        Ok(task)
    }

    #[instrument(skip(self, store, patch, now))]
    pub fn update_task(
        &mut self,
        store: &DataStore,
        id: Uuid,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Task> {
        let idx = self.index_of(id)?;
        let old = self.tasks[idx].clone();
        let mut updated = old.clone();
        updated.apply_patch(patch, now)?;

        let changes = diff_tasks(&old, &updated);
        if changes.is_empty() {
            debug!(%id, "update changes nothing");
            return Ok(old);
        }

        self.tasks[idx] = updated.clone();
        if let Err(err) = store.replace_task(&updated) {
            self.tasks[idx] = old;
            return Err(err.context("failed to update task"));
        }

        info!(%id, fields = changes.len(), "task updated");
        self.record(store, id, changes, false, now);
        Ok(updated)
    }

    /// Applies `patch` together with a new attachment copied from `source`,
    /// as one write and one activity entry.
    #[instrument(skip(self, store, patch, source, now))]
    pub fn update_with_attachment(
        &mut self,
        store: &DataStore,
        id: Uuid,
        mut patch: TaskPatch,
        source: &Path,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Task> {
        let idx = self.index_of(id)?;
        let previous_url = self.tasks[idx]
            .attachment
            .as_ref()
            .and_then(|attachment| attachment.url.clone());

        let attachment = store.store_attachment(id, source)?;
        let stored_url = attachment.url.clone();
        patch.attachment = Some(Some(attachment));

        match self.update_task(store, id, patch, now) {
            Ok(task) => Ok(task),
            Err(err) => {
                if stored_url != previous_url
                    && let Some(url) = stored_url
                    && let Err(cleanup) = store.discard_attachment_file(Path::new(&url))
                {
                    warn!(%id, error = %cleanup, "failed to drop unused attachment copy");
                }
                Err(err)
            }
        }
    }

    /// Applies a board drop. Drops that do not change the column return
    /// `Ok(None)` without touching the store.
    #[instrument(skip(self, store, now))]
    pub fn move_task(
        &mut self,
        store: &DataStore,
        drag: DragResult,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Task>> {
        let Some(destination) = resolve_drop(&drag) else {
            return Ok(None);
        };
        let idx = self.index_of(drag.task_id)?;
        if self.tasks[idx].status != drag.source {
            warn!(
                task = %drag.task_id,
                expected = %drag.source,
                actual = %self.tasks[idx].status,
                "drag source does not match task status"
            );
        }
        self.update_task(store, drag.task_id, TaskPatch::status(destination), now)
            .map(Some)
    }

    #[instrument(skip(self, store))]
    pub fn delete_task(&mut self, store: &DataStore, id: Uuid) -> anyhow::Result<Task> {
        let idx = self.index_of(id)?;
        let removed = self.tasks.remove(idx);
        if let Err(err) = store.delete_task(self.user.uid, id) {
            self.tasks.insert(idx, removed);
            return Err(err.context("failed to delete task"));
        }
        if self.current == Some(id) {
            self.current = None;
        }
        info!(%id, "task deleted");
        Ok(removed)
    }

    /// Moves every selected task to `status` in one batch write. Tasks
    /// already in that status are left alone. Returns how many changed.
    #[instrument(skip(self, store, ids, now), fields(count = ids.len()))]
    pub fn update_multiple_status(
        &mut self,
        store: &DataStore,
        ids: &[Uuid],
        status: Status,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let mut targets = Vec::new();
        for id in dedup_ids(ids) {
            let idx = self.index_of(id)?;
            if self.tasks[idx].status != status {
                targets.push(idx);
            }
        }
        if targets.is_empty() {
            debug!(%status, "batch status update has nothing to change");
            return Ok(0);
        }

        let before: Vec<Task> = targets.iter().map(|idx| self.tasks[*idx].clone()).collect();
        for idx in &targets {
            self.tasks[*idx].status = status;
            self.tasks[*idx].modified = now;
        }

        let changed_ids: Vec<Uuid> = before.iter().map(|task| task.id).collect();
        if let Err(err) = store.set_status_many(self.user.uid, &changed_ids, status, now) {
            for (idx, old) in targets.iter().zip(before) {
                self.tasks[*idx] = old;
            }
            return Err(err.context("failed to update task statuses"));
        }

        for (idx, old) in targets.iter().zip(&before) {
            let changes = diff_tasks(old, &self.tasks[*idx]);
            self.record(store, old.id, changes, false, now);
        }

        info!(%status, changed = targets.len(), "batch status update applied");
        Ok(targets.len())
    }

    #[instrument(skip(self, store, ids), fields(count = ids.len()))]
    pub fn delete_multiple(&mut self, store: &DataStore, ids: &[Uuid]) -> anyhow::Result<usize> {
        let ids = dedup_ids(ids);
        for id in &ids {
            self.index_of(*id)?;
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let snapshot = self.tasks.clone();
        self.tasks.retain(|task| !ids.contains(&task.id));
        if let Err(err) = store.delete_many(self.user.uid, &ids) {
            self.tasks = snapshot;
            return Err(err.context("failed to delete tasks"));
        }

        if self.current.is_some_and(|current| ids.contains(&current)) {
            self.current = None;
        }
        let removed = snapshot.len() - self.tasks.len();
        info!(removed, "batch delete applied");
        Ok(removed)
    }

    fn index_of(&self, id: Uuid) -> anyhow::Result<usize> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))
    }

    fn record(
        &self,
        store: &DataStore,
        task_id: Uuid,
        changes: Changes,
        is_created: bool,
        now: DateTime<Utc>,
    ) {
        let Some(log) = ActivityLog::build(task_id, changes, self.user.uid, is_created, now) else {
            return;
        };
        if let Err(err) = store.append_activity(&log) {
            warn!(task = %task_id, error = %err, "failed to record activity");
        }
    }
}

/// Keeps the first occurrence of each id, in order.
fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
