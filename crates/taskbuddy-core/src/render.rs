use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::activity::ActivityLog;
use crate::auth::UserProfile;
use crate::board::Column;
use crate::datetime::{format_due_label, format_project_date};
use crate::task::{Status, Task};

const NO_RESULTS: &str = "It looks like we can't find any results that match.";
const CARD_WIDTH: usize = 28;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Colour is used only when enabled and stdout is a terminal.
    pub fn new(color: bool) -> Self {
        Self {
            color: color && io::stdout().is_terminal(),
        }
    }

    pub fn print_no_results(&mut self) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{NO_RESULTS}")?;
        Ok(())
    }

    /// List view: one accordion section per status.
    #[tracing::instrument(skip(self, columns, now))]
    pub fn print_list(&mut self, columns: &[Column<'_>], now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        for column in columns {
            let header = format!("{} ({})", column.status, column.tasks.len());
            writeln!(out, "{}", self.paint(&header, status_color(column.status)))?;

            if column.tasks.is_empty() {
                writeln!(out, "  {}", column.empty_message())?;
                writeln!(out)?;
                continue;
            }

            let headers = vec![
                "ID".to_string(),
                "Task name".to_string(),
                "Due on".to_string(),
                "Task Status".to_string(),
                "Task Category".to_string(),
            ];
            let rows = column
                .tasks
                .iter()
                .map(|task| {
                    vec![
                        self.paint(&task.short_id(), "33"),
                        self.title_cell(task, None),
                        self.due_cell(task, now),
                        task.status.to_string(),
                        task.category.to_string(),
                    ]
                })
                .collect();

            write_table(&mut out, headers, rows)?;
            writeln!(out)?;
        }

        Ok(())
    }

    /// Board view: the three status columns side by side.
    #[tracing::instrument(skip(self, columns, now))]
    pub fn print_board(
        &mut self,
        columns: &[Column<'_>],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers: Vec<String> = columns
            .iter()
            .map(|column| self.paint(column.status.title(), status_color(column.status)))
            .collect();

        let depth = columns
            .iter()
            .map(|column| column.tasks.len().max(1))
            .max()
            .unwrap_or(1);

        let mut rows = Vec::with_capacity(depth * 2);
        for idx in 0..depth {
            let mut title_row = Vec::with_capacity(columns.len());
            let mut meta_row = Vec::with_capacity(columns.len());
            for column in columns {
                match column.tasks.get(idx) {
                    Some(task) => {
                        title_row.push(format!(
                            "{} {}",
                            self.paint(&task.short_id(), "33"),
                            self.title_cell(task, Some(CARD_WIDTH))
                        ));
                        meta_row.push(format!(
                            "  {} · {}",
                            task.category,
                            self.due_cell(task, now)
                        ));
                    }
                    None if idx == 0 => {
                        title_row.push(column.empty_message());
                        meta_row.push(String::new());
                    }
                    None => {
                        title_row.push(String::new());
                        meta_row.push(String::new());
                    }
                }
            }
            rows.push(title_row);
            rows.push(meta_row);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task, now))]
    pub fn print_task_info(&mut self, task: &Task, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "status      {}", task.status)?;
        writeln!(out, "category    {}", task.category)?;
        match task.due {
            Some(due) => writeln!(
                out,
                "due         {} ({})",
                format_project_date(due),
                format_due_label(due, now)
            )?,
            None => writeln!(out, "due         -")?,
        }
        if !task.description.is_empty() {
            writeln!(out, "description {}", task.description)?;
        }
        if let Some(attachment) = &task.attachment {
            writeln!(
                out,
                "attachment  {} ({}) {}",
                attachment.file_name,
                attachment.content_type,
                attachment.url.clone().unwrap_or_default()
            )?;
        }
        writeln!(out, "created     {}", task.created.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(out, "modified    {}", task.modified.format("%Y-%m-%d %H:%M:%S UTC"))?;

        Ok(())
    }

    pub fn print_activity(&mut self, logs: &[ActivityLog]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if logs.is_empty() {
            writeln!(out, "No activity recorded.")?;
            return Ok(());
        }

        for log in logs {
            let stamp = log.timestamp.format("%d %b %Y %H:%M").to_string();
            for line in log.describe() {
                writeln!(out, "{}  {}", self.paint(&stamp, "2"), line)?;
            }
        }
        Ok(())
    }

    pub fn print_user(&mut self, user: &UserProfile) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "Hi {}!", user.first_name())?;
        writeln!(out, "name   {}", user.name)?;
        writeln!(out, "email  {}", user.email)?;
        if let Some(photo) = &user.photo_url {
            writeln!(out, "photo  {photo}")?;
        }
        Ok(())
    }

    fn title_cell(&self, task: &Task, max_width: Option<usize>) -> String {
        let title = match max_width {
            Some(width) => truncate(&task.title, width),
            None => task.title.clone(),
        };
        if task.status == Status::Completed {
            self.paint(&title, "9")
        } else {
            title
        }
    }

    fn due_cell(&self, task: &Task, now: DateTime<Utc>) -> String {
        let Some(due) = task.due else {
            return String::new();
        };
        let label = format_due_label(due, now);
        if task.is_overdue(now) {
            self.paint(&label, "31")
        } else {
            label
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Todo => "35",
        Status::InProgress => "36",
        Status::Completed => "32",
    }
}

/// Cuts plain text to `max_width` columns, ending in an ellipsis.
fn truncate(text: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + 1 > max_width {
            break;
        }
        width += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        let visible_width = UnicodeWidthStr::width(strip_ansi(&headers[idx]).as_str());
        let padding = widths[idx].saturating_sub(visible_width);
        write!(writer, "{}{} ", headers[idx], " ".repeat(padding))?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
