use std::fs;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use taskbuddy_core::auth::{self, Identity};
use taskbuddy_core::board::{DragResult, SortOrder, columns};
use taskbuddy_core::datastore::DataStore;
use taskbuddy_core::datetime::parse_due_expr;
use taskbuddy_core::filter::FilterState;
use taskbuddy_core::state::TaskState;
use taskbuddy_core::task::{Category, Status, TaskDraft, TaskPatch};
use tempfile::tempdir;

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

fn signed_in(store: &DataStore, email: &str) -> TaskState {
    let user = auth::login(
        store,
        Identity {
            name: "Grace Hopper".to_string(),
            email: email.to_string(),
            photo_url: None,
        },
        noon(),
    )
    .expect("login");
    TaskState::load(store, user).expect("load state")
}

fn draft(title: &str, category: Category, due: &str, status: Status) -> TaskDraft {
    TaskDraft {
        title: Some(title.to_string()),
        category: Some(category),
        due: Some(parse_due_expr(due, noon()).expect("due")),
        status: Some(status),
        ..TaskDraft::default()
    }
}

#[test]
fn tasks_are_scoped_to_the_signed_in_user() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let mut grace = signed_in(&store, "grace@example.com");
    grace
        .add_task(
            &store,
            draft("Compile report", Category::Work, "today", Status::Todo),
            None,
            noon(),
        )
        .expect("add");

    let ada = signed_in(&store, "ada@example.com");
    assert!(ada.tasks().is_empty());

    let grace_again = signed_in(&store, "GRACE@example.com");
    assert_eq!(grace_again.tasks().len(), 1);
    assert_eq!(grace_again.user().uid, grace.user().uid);
}

#[test]
fn filter_and_search_narrow_the_view() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    for (title, category, due) in [
        ("Quarterly review", Category::Work, "today"),
        ("Buy groceries", Category::Personal, "tomorrow"),
        ("Plan offsite", Category::Work, "+7d"),
    ] {
        state
            .add_task(&store, draft(title, category, due, Status::Todo), None, noon())
            .expect("add");
    }

    assert_eq!(state.filtered().len(), 3);

    let terms = vec!["category:work".to_string(), "due:tomorrow".to_string()];
    state.set_filter(FilterState::parse(&terms, noon()).expect("filter"));
    let shown: Vec<&str> = state.filtered().iter().map(|task| task.title.as_str()).collect();
    assert_eq!(shown, vec!["Quarterly review"]);

    state.set_filter(FilterState::parse(&["GROCER".to_string()], noon()).expect("filter"));
    assert_eq!(state.filtered().len(), 1);
    assert!(state.filter().is_searching());

    let no_hits = FilterState::parse(&["nothing-like-this".to_string()], noon()).expect("filter");
    state.set_filter(no_hits);
    assert!(state.filtered().is_empty());
}

#[test]
fn dropping_a_card_moves_it_and_logs_the_change() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let task = state
        .add_task(&store, draft("Write tests", Category::Work, "today", Status::Todo), None, noon())
        .expect("add");

    let same_column = DragResult {
        task_id: task.id,
        source: Status::Todo,
        destination: Some(Status::Todo),
    };
    assert!(state.move_task(&store, same_column, noon()).expect("move").is_none());

    let outside = DragResult {
        task_id: task.id,
        source: Status::Todo,
        destination: None,
    };
    assert!(state.move_task(&store, outside, noon()).expect("move").is_none());

    let later = noon() + chrono::Duration::minutes(5);
    let moved = state
        .move_task(
            &store,
            DragResult {
                task_id: task.id,
                source: Status::Todo,
                destination: Some(Status::InProgress),
            },
            later,
        )
        .expect("move")
        .expect("status changed");
    assert_eq!(moved.status, Status::InProgress);

    let persisted = store.load_tasks(state.user().uid).expect("reload");
    assert_eq!(persisted[0].status, Status::InProgress);

    let logs = store.load_activity(task.id).expect("activity");
    assert_eq!(logs.len(), 2);
    assert!(logs[0].is_created);
    assert!(!logs[1].is_created);
    let change = logs[1].changes.get("status").expect("status change");
    assert_eq!(change.before(), &Value::String("TODO".to_string()));
    assert_eq!(change.after(), &Value::String("IN PROGRESS".to_string()));
    assert_eq!(
        logs[1].describe(),
        vec!["You changed status from TODO to IN PROGRESS".to_string()]
    );

    let tasks = state.filtered();
    let board = columns(&tasks, SortOrder::Ascending);
    assert!(board[0].tasks.is_empty());
    assert_eq!(board[1].tasks.len(), 1);
}

#[test]
fn batch_status_and_delete_touch_every_selected_task() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let mut ids = Vec::new();
    for title in ["One", "Two", "Three"] {
        let task = state
            .add_task(&store, draft(title, Category::Personal, "today", Status::Todo), None, noon())
            .expect("add");
        ids.push(task.id);
    }
    state
        .update_task(&store, ids[0], TaskPatch::status(Status::Completed), noon())
        .expect("complete first");

    let changed = state
        .update_multiple_status(&store, &ids, Status::Completed, noon())
        .expect("batch status");
    assert_eq!(changed, 2);
    assert!(
        store
            .load_tasks(state.user().uid)
            .expect("reload")
            .iter()
            .all(|task| task.status == Status::Completed)
    );

    let removed = state.delete_multiple(&store, &ids[..2]).expect("batch delete");
    assert_eq!(removed, 2);
    assert_eq!(state.tasks().len(), 1);
    assert_eq!(store.load_tasks(state.user().uid).expect("reload").len(), 1);
    assert!(store.load_activity(ids[0]).expect("activity").is_empty());
    assert_eq!(store.load_activity(ids[2]).expect("activity").len(), 2);
}

#[test]
fn failed_write_rolls_back_the_optimistic_update() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let task = state
        .add_task(&store, draft("Fragile", Category::Work, "today", Status::Todo), None, noon())
        .expect("add");

    fs::write(&store.tasks_path, "").expect("wipe tasks behind the state");

    let err = state
        .update_task(&store, task.id, TaskPatch::status(Status::Completed), noon())
        .expect_err("write must fail");
    assert!(format!("{err:#}").contains("failed to update task"));
    assert_eq!(state.tasks()[0].status, Status::Todo);

    assert!(state.delete_multiple(&store, &[task.id]).is_err());
    assert_eq!(state.tasks().len(), 1);
}

#[test]
fn attachments_are_copied_and_type_checked() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(&temp.path().join("data")).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let pdf = temp.path().join("brief.pdf");
    fs::write(&pdf, b"%PDF-1.4").expect("write pdf");
    let task = state
        .add_task(
            &store,
            draft("Read brief", Category::Work, "today", Status::Todo),
            Some(&pdf),
            noon(),
        )
        .expect("add with attachment");

    let attachment = task.attachment.expect("attachment");
    assert_eq!(attachment.content_type, "application/pdf");
    let stored = attachment.url.expect("stored copy");
    assert!(fs::metadata(&stored).is_ok());

    let script = temp.path().join("run.sh");
    fs::write(&script, b"echo hi").expect("write script");
    let err = state
        .add_task(
            &store,
            draft("Run script", Category::Work, "today", Status::Todo),
            Some(&script),
            noon(),
        )
        .expect_err("shell scripts are rejected");
    assert!(err.to_string().contains("only images and PDF files"));
    assert_eq!(state.tasks().len(), 1);
}

#[test]
fn incomplete_or_oversized_drafts_are_rejected() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let err = state
        .add_task(
            &store,
            TaskDraft {
                title: Some("No category".to_string()),
                ..TaskDraft::default()
            },
            None,
            noon(),
        )
        .expect_err("missing fields");
    assert!(err.to_string().contains("Category, Due Date, Status"));

    let mut long = draft("Long", Category::Work, "today", Status::Todo);
    long.description = "x".repeat(301);
    assert!(state.add_task(&store, long, None, noon()).is_err());

    let mut fits = draft("Fits", Category::Work, "today", Status::Todo);
    fits.description = "x".repeat(300);
    assert!(state.add_task(&store, fits, None, noon()).is_ok());
    assert_eq!(store.load_tasks(state.user().uid).expect("reload").len(), 1);
}

#[test]
fn signing_out_requires_a_new_login() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    signed_in(&store, "grace@example.com");

    auth::logout(&store).expect("logout");
    let err = auth::require_user(&store).expect_err("signed out");
    assert!(err.to_string().contains("not signed in"));
}

#[test]
fn tasks_are_selected_by_unique_id_prefix() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    for n in 0..17 {
        state
            .add_task(
                &store,
                draft(&format!("Task {n}"), Category::Work, "today", Status::Todo),
                None,
                noon(),
            )
            .expect("add");
    }
    let target = state.tasks()[0].clone();

    assert_eq!(state.find(&target.short_id()).expect("short id").id, target.id);
    assert_eq!(state.find(&target.id.to_string()).expect("dashed id").id, target.id);
    let dashed_prefix = &target.id.to_string()[..11];
    assert_eq!(state.find(dashed_prefix).expect("dashed prefix").id, target.id);
    let upper = target.short_id().to_uppercase();
    assert_eq!(state.find(&upper).expect("upper case").id, target.id);

    // 17 ids over 16 hex digits: at least two share a first character.
    let shared = state
        .tasks()
        .iter()
        .map(|task| task.short_id()[..1].to_string())
        .find(|first| {
            state
                .tasks()
                .iter()
                .filter(|task| task.short_id().starts_with(first.as_str()))
                .count()
                > 1
        })
        .expect("shared first digit");
    let err = state.find(&shared).expect_err("ambiguous");
    assert!(err.to_string().contains("ambiguous"));

    let err = state.find("zz").expect_err("unknown");
    assert!(err.to_string().contains("no task matches"));
    assert!(state.find(" - ").is_err());
}

#[test]
fn batch_ids_are_counted_once() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let task = state
        .add_task(&store, draft("Twice", Category::Work, "today", Status::Todo), None, noon())
        .expect("add");

    let changed = state
        .update_multiple_status(&store, &[task.id, task.id], Status::Completed, noon())
        .expect("batch status");
    assert_eq!(changed, 1);
    assert_eq!(store.load_activity(task.id).expect("activity").len(), 2);

    let removed = state
        .delete_multiple(&store, &[task.id, task.id])
        .expect("batch delete");
    assert_eq!(removed, 1);
    assert!(state.tasks().is_empty());
}

#[test]
fn failed_add_leaves_no_attachment_behind() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(&temp.path().join("data")).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let pdf = temp.path().join("plan.pdf");
    fs::write(&pdf, b"%PDF-1.4").expect("write pdf");
    fs::write(&store.tasks_path, "not json\n").expect("corrupt tasks");

    state
        .add_task(
            &store,
            draft("Plan", Category::Work, "today", Status::Todo),
            Some(&pdf),
            noon(),
        )
        .expect_err("insert fails");
    assert!(state.tasks().is_empty());
    let leftovers = fs::read_dir(&store.attachments_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn deleting_a_task_removes_its_stored_attachment() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(&temp.path().join("data")).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let png = temp.path().join("sketch.png");
    fs::write(&png, b"\x89PNG").expect("write png");
    let task = state
        .add_task(
            &store,
            draft("Sketch", Category::Personal, "today", Status::Todo),
            Some(&png),
            noon(),
        )
        .expect("add");
    let dir = store.attachments_dir.join(task.id.to_string());
    assert!(dir.is_dir());

    state.delete_task(&store, task.id).expect("delete");
    assert!(!dir.exists());
    assert!(store.load_activity(task.id).expect("activity").is_empty());
}

#[test]
fn edit_with_attachment_is_one_change() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(&temp.path().join("data")).expect("open datastore");
    let mut state = signed_in(&store, "grace@example.com");

    let task = state
        .add_task(&store, draft("Draft memo", Category::Work, "today", Status::Todo), None, noon())
        .expect("add");

    let pdf = temp.path().join("memo.pdf");
    fs::write(&pdf, b"%PDF-1.4").expect("write pdf");
    let patch = TaskPatch {
        title: Some("Final memo".to_string()),
        ..TaskPatch::default()
    };
    let updated = state
        .update_with_attachment(&store, task.id, patch, &pdf, noon())
        .expect("edit");
    assert_eq!(updated.title, "Final memo");
    assert_eq!(
        updated.attachment.map(|attachment| attachment.file_name),
        Some("memo.pdf".to_string())
    );

    let logs = store.load_activity(task.id).expect("activity");
    assert_eq!(logs.len(), 2);
    let keys: Vec<&str> = logs[1].changes.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["attachment", "title"]);
}
