use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::auth::{self, Identity};
use crate::board::{Column, DragResult, SortOrder, ViewMode, columns};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::parse_due_expr;
use crate::filter::FilterState;
use crate::render::Renderer;
use crate::state::TaskState;
use crate::task::{Category, Status, Task, TaskDraft, TaskPatch};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "login",
        "logout",
        "whoami",
        "add",
        "edit",
        "info",
        "log",
        "view",
        "list",
        "board",
        "move",
        "status",
        "delete",
        "categories",
        "show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "login" => cmd_login(store, renderer, &inv.command_args, now),
        "logout" => cmd_logout(store),
        "whoami" => cmd_whoami(store, renderer),
        "add" => cmd_add(store, &inv.command_args, now),
        "edit" => cmd_edit(store, &inv.command_args, now),
        "info" => cmd_info(store, renderer, &inv.command_args, now),
        "log" => cmd_log(store, renderer, &inv.command_args),
        "view" | "list" | "board" => {
            let mode = match command {
                "list" => ViewMode::List,
                "board" => ViewMode::Board,
                _ => cfg.default_view()?,
            };
            let terms: Vec<String> = inv
                .filter_terms
                .iter()
                .chain(inv.command_args.iter())
                .cloned()
                .collect();
            cmd_view(store, cfg, renderer, mode, &terms, now)
        }
        "move" => cmd_move(store, &inv.command_args, now),
        "status" => cmd_status(store, &inv.command_args, now),
        "delete" => cmd_delete(store, &inv.command_args),
        "categories" => cmd_categories(store),
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[derive(Debug, Clone)]
enum Mod {
    Category(Category),
    Due(DateTime<Utc>),
    Status(Status),
    Description(String),
    Attach(PathBuf),
}

/// Splits command arguments into free words and `key:value` modifiers.
#[instrument(skip(args, now))]
fn parse_words_and_mods(
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<(Vec<String>, Vec<Mod>)> {
    let mut words = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, now)? {
            mods.push(one_mod);
            continue;
        }

        words.push(arg.clone());
    }

    Ok((words, mods))
}

fn parse_one_mod(tok: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "category" | "cat" => Ok(Some(Mod::Category(value.parse()?))),
        "due" => Ok(Some(Mod::Due(parse_due_expr(value, now)?))),
        "status" => Ok(Some(Mod::Status(value.parse()?))),
        "desc" | "description" => Ok(Some(Mod::Description(value.to_string()))),
        "attach" | "attachment" => {
            if value.is_empty() {
                return Err(anyhow!("attach: requires a file path"));
            }
            Ok(Some(Mod::Attach(PathBuf::from(value))))
        }
        _ => Ok(None),
    }
}

fn open_state(store: &DataStore) -> anyhow::Result<TaskState> {
    let user = auth::require_user(store)?;
    TaskState::load(store, user)
}

#[instrument(skip(store, renderer, args, now))]
fn cmd_login(
    store: &DataStore,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command login");

    let (email, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("login requires an email address"))?;

    let mut name_parts = Vec::new();
    let mut photo_url = None;
    for arg in rest {
        if let Some(url) = arg.strip_prefix("photo:") {
            photo_url = Some(url.to_string());
        } else {
            name_parts.push(arg.as_str());
        }
    }

    let user = auth::login(
        store,
        Identity {
            name: name_parts.join(" "),
            email: email.clone(),
            photo_url,
        },
        now,
    )?;
    renderer.print_user(&user)?;
    Ok(())
}

#[instrument(skip(store))]
fn cmd_logout(store: &DataStore) -> anyhow::Result<()> {
    info!("command logout");
    auth::logout(store)?;
    println!("Signed out.");
    Ok(())
}

#[instrument(skip(store, renderer))]
fn cmd_whoami(store: &DataStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    match auth::current_user(store)? {
        Some(user) => renderer.print_user(&user),
        None => {
            println!("Not signed in.");
            Ok(())
        }
    }
}

#[instrument(skip(store, args, now))]
fn cmd_add(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let mut state = open_state(store)?;
    let (words, mods) = parse_words_and_mods(args, now)?;

    let mut draft = TaskDraft {
        title: (!words.is_empty()).then(|| words.join(" ")),
        ..TaskDraft::default()
    };
    let mut attachment = None;
    for one_mod in mods {
        match one_mod {
            Mod::Category(category) => draft.category = Some(category),
            Mod::Due(due) => draft.due = Some(due),
            Mod::Status(status) => draft.status = Some(status),
            Mod::Description(text) => draft.description = text,
            Mod::Attach(path) => attachment = Some(path),
        }
    }

    let task = state.add_task(store, draft, attachment.as_deref(), now)?;
    println!("Created task {}.", task.short_id());
    Ok(())
}

#[instrument(skip(store, args, now))]
fn cmd_edit(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command edit");

    let (selector, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("edit requires a task id"))?;
    let mut state = open_state(store)?;
    let id = state.find(selector)?.id;

    let (words, mods) = parse_words_and_mods(rest, now)?;
    let mut patch = TaskPatch {
        title: (!words.is_empty()).then(|| words.join(" ")),
        ..TaskPatch::default()
    };
    let mut attachment = None;
    for one_mod in mods {
        match one_mod {
            Mod::Category(category) => patch.category = Some(category),
            Mod::Due(due) => patch.due = Some(due),
            Mod::Status(status) => patch.status = Some(status),
            Mod::Description(text) => patch.description = Some(text),
            Mod::Attach(path) => attachment = Some(path),
        }
    }

    if patch.is_empty() && attachment.is_none() {
        return Err(anyhow!("edit: nothing to change"));
    }

    let task = match attachment {
        Some(path) => state.update_with_attachment(store, id, patch, &path, now)?,
        None => state.update_task(store, id, patch, now)?,
    };
    println!("Updated task {}.", task.short_id());
    Ok(())
}

#[instrument(skip(store, renderer, args, now))]
fn cmd_info(
    store: &DataStore,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command info");

    let selector = args.first().ok_or_else(|| anyhow!("info requires a task id"))?;
    let mut state = open_state(store)?;
    let task = state.set_current(selector)?.clone();

    renderer.print_task_info(&task, now)?;
    println!();
    println!("Activity");
    renderer.print_activity(&store.load_activity(task.id)?)?;
    Ok(())
}

#[instrument(skip(store, renderer, args))]
fn cmd_log(store: &DataStore, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command log");

    let selector = args.first().ok_or_else(|| anyhow!("log requires a task id"))?;
    let state = open_state(store)?;
    let task = state.find(selector)?;
    renderer.print_activity(&store.load_activity(task.id)?)
}

#[instrument(skip(store, cfg, renderer, terms, now))]
fn cmd_view(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    mode: ViewMode,
    terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(?mode, "command view");

    let mut state = open_state(store)?;
    state.set_filter(FilterState::parse(terms, now)?);

    let shown = state.filtered();
    let Some(cols) = view_columns(&state, &shown, cfg.sort_order()?) else {
        return renderer.print_no_results();
    };
    match mode {
        ViewMode::List => renderer.print_list(&cols, now),
        ViewMode::Board => renderer.print_board(&cols, now),
    }
}

/// `None` when a search matched nothing; the view then shows the
/// no-results notice instead of empty columns.
fn view_columns<'a>(
    state: &TaskState,
    shown: &[&'a Task],
    order: SortOrder,
) -> Option<Vec<Column<'a>>> {
    if state.filter().is_searching() && shown.is_empty() {
        debug!(search = %state.filter().search, "search has no hits");
        return None;
    }
    Some(columns(shown, order))
}

#[instrument(skip(store, args, now))]
fn cmd_move(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command move");

    let [selector, destination] = args else {
        return Err(anyhow!("move requires a task id and a status"));
    };
    let destination: Status = destination.parse()?;

    let mut state = open_state(store)?;
    let task = state.find(selector)?;
    let drag = DragResult {
        task_id: task.id,
        source: task.status,
        destination: Some(destination),
    };

    match state.move_task(store, drag, now)? {
        Some(task) => println!("Moved task {} to {}.", task.short_id(), task.status),
        None => println!("Task is already in {destination}."),
    }
    Ok(())
}

#[instrument(skip(store, args, now))]
fn cmd_status(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command status");

    let (status, selectors) = args
        .split_first()
        .ok_or_else(|| anyhow!("status requires a status and at least one task id"))?;
    if selectors.is_empty() {
        return Err(anyhow!("status requires at least one task id"));
    }
    let status: Status = status.parse()?;

    let mut state = open_state(store)?;
    let ids = state.resolve_ids(selectors)?;
    let changed = state.update_multiple_status(store, &ids, status, now)?;
    println!("Moved {changed} task(s) to {status}.");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_delete(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    info!("command delete");

    if args.is_empty() {
        return Err(anyhow!("delete requires at least one task id"));
    }

    let mut state = open_state(store)?;
    let ids = state.resolve_ids(args)?;
    if let [id] = ids.as_slice() {
        let task = state.delete_task(store, *id)?;
        println!("Deleted task {}.", task.short_id());
    } else {
        let removed = state.delete_multiple(store, &ids)?;
        println!("Deleted {removed} task(s).");
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_categories(store: &DataStore) -> anyhow::Result<()> {
    let state = open_state(store)?;
    let mut counts: BTreeMap<&str, usize> = Category::ALL
        .iter()
        .map(|category| (category.name(), 0))
        .collect();
    for task in state.tasks() {
        *counts.entry(task.category.name()).or_default() += 1;
    }
    for (name, count) in counts {
        println!("{name} {count}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for (key, value) in cfg.entries() {
        println!("{key}={value}");
    }
    if cfg.loaded_files.is_empty() {
        warn!("no rc file loaded; showing defaults");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("taskbuddy commands:");
    println!("  login <email> [name...] [photo:<url>]");
    println!("  logout | whoami");
    println!("  add <title...> category:<work|personal> due:<date> status:<status>");
    println!("      [desc:<text>] [attach:<file>]");
    println!("  edit <id> [title...] [category:..] [due:..] [status:..] [desc:..] [attach:..]");
    println!("  info <id> | log <id>");
    println!("  [filter] view|list|board [filter]");
    println!("      filter: category:<c|all> due:<date> search words");
    println!("  move <id> <status>");
    println!("  status <status> <id...>");
    println!("  delete <id...>");
    println!("  categories | show | help | version");
    Ok(())
}
