use std::cmp::Ordering;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::debug;
use uuid::Uuid;

use crate::task::{Status, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    List,
    Board,
}

impl FromStr for ViewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(ViewMode::List),
            "board" => Ok(ViewMode::Board),
            other => Err(anyhow!("unknown view: {other} (expected list or board)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => Err(anyhow!("unknown sort order: {other} (expected asc or desc)")),
        }
    }
}

/// One status column (board) or accordion section (list).
#[derive(Debug, Clone)]
pub struct Column<'a> {
    pub status: Status,
    pub tasks: Vec<&'a Task>,
}

impl Column<'_> {
    pub fn empty_message(&self) -> String {
        let name = match self.status {
            Status::Todo => "To Do",
            Status::InProgress => "Progress",
            Status::Completed => "Completed",
        };
        format!("No Tasks in {name}")
    }
}

/// Groups tasks by status in column order. Empty columns are kept.
pub fn columns<'a>(tasks: &[&'a Task], order: SortOrder) -> Vec<Column<'a>> {
    Status::ALL
        .iter()
        .map(|status| {
            let mut in_column: Vec<&'a Task> = tasks
                .iter()
                .copied()
                .filter(|task| task.status == *status)
                .collect();
            sort_by_due(&mut in_column, order);
            Column {
                status: *status,
                tasks: in_column,
            }
        })
        .collect()
}

/// Tasks without a due date sort last regardless of direction.
pub fn sort_by_due(tasks: &mut [&Task], order: SortOrder) {
    tasks.sort_by(|a, b| {
        let by_due = match (a.due, b.due) {
            (Some(x), Some(y)) => match order {
                SortOrder::Ascending => x.cmp(&y),
                SortOrder::Descending => y.cmp(&x),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_due.then_with(|| a.title.cmp(&b.title))
    });
}

/// Outcome of dragging a card. `destination` is `None` when the card was
/// dropped outside every column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragResult {
    pub task_id: Uuid,
    pub source: Status,
    pub destination: Option<Status>,
}

/// The new status a drop asks for, if any.
pub fn resolve_drop(drag: &DragResult) -> Option<Status> {
    match drag.destination {
        Some(destination) if destination != drag.source => {
            debug!(
                task = %drag.task_id,
                from = %drag.source,
                to = %destination,
                "drop changes status"
            );
            Some(destination)
        }
        _ => {
            debug!(task = %drag.task_id, "drop is a no-op");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{DragResult, SortOrder, ViewMode, columns, resolve_drop};
    use crate::task::{Category, Status, Task, TaskDraft};

    fn task(title: &str, status: Status, due_in_days: Option<i64>) -> Task {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let mut task = Task::from_draft(
            TaskDraft {
                title: Some(title.to_string()),
                description: String::new(),
                category: Some(Category::Work),
                due: Some(now),
                status: Some(status),
                attachment: None,
            },
            Uuid::new_v4(),
            now,
        )
        .unwrap();
        task.due = due_in_days.map(|days| now + Duration::days(days));
        task
    }

    #[test]
    fn columns_keep_status_order_and_empty_sections() {
        let tasks = [
            task("late", Status::Todo, Some(5)),
            task("soon", Status::Todo, Some(1)),
            task("undated", Status::Todo, None),
            task("done", Status::Completed, Some(2)),
        ];
        let refs: Vec<&Task> = tasks.iter().collect();

        let cols = columns(&refs, SortOrder::Ascending);
        assert_eq!(
            cols.iter().map(|c| c.status).collect::<Vec<_>>(),
            Status::ALL.to_vec()
        );
        let todo: Vec<&str> = cols[0].tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(todo, vec!["soon", "late", "undated"]);
        assert!(cols[1].tasks.is_empty());
        assert_eq!(cols[1].empty_message(), "No Tasks in Progress");

        let desc = columns(&refs, SortOrder::Descending);
        let todo: Vec<&str> = desc[0].tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(todo, vec!["late", "soon", "undated"]);
    }

    #[test]
    fn drop_into_same_or_no_column_is_a_no_op() {
        let id = Uuid::new_v4();
        let same = DragResult {
            task_id: id,
            source: Status::Todo,
            destination: Some(Status::Todo),
        };
        let outside = DragResult {
            destination: None,
            ..same
        };
        let moved = DragResult {
            destination: Some(Status::InProgress),
            ..same
        };

        assert_eq!(resolve_drop(&same), None);
        assert_eq!(resolve_drop(&outside), None);
        assert_eq!(resolve_drop(&moved), Some(Status::InProgress));
    }

    #[test]
    fn view_and_sort_parse() {
        assert_eq!("Board".parse::<ViewMode>().unwrap(), ViewMode::Board);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert!("grid".parse::<ViewMode>().is_err());
    }
}
