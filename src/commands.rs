//! CLI subcommands and their dispatch onto typed cache calls.

use campus_sync::cache::{CacheResult, CacheSource, CacheStorage, ListQuery, Patch, Scope};
use campus_sync::model::{
  Answer, Application, Board, Column, Entity, EntityKind, Expense, Income, Job, Question, Task,
};
use campus_sync::notify::Notifier;
use campus_sync::Campus;
use chrono::Utc;
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::process::ExitCode;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List one page of a collection
  List {
    /// expenses, incomes, jobs, applications, boards or questions
    kind: EntityKind,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = campus_sync::cache::DEFAULT_PAGE_SIZE)]
    limit: u32,
    /// Equality filter as field=value, e.g. status=PENDING (repeatable)
    #[arg(short, long = "filter", value_parser = parse_pair)]
    filters: Vec<(String, String)>,
    /// Server-side free text search
    #[arg(short, long)]
    search: Option<String>,
  },
  /// Show a single entity
  Show { kind: EntityKind, id: String },
  /// Create an entity from a JSON body
  Create {
    kind: EntityKind,
    /// JSON object with the new entity's fields
    #[arg(long)]
    json: String,
    /// Parent id: the column of a task, the board of a column, the question
    /// of an answer, optionally the job of an application
    #[arg(long)]
    parent: Option<String>,
  },
  /// Update fields of an entity
  Update {
    kind: EntityKind,
    id: String,
    /// JSON object with the fields to change
    #[arg(long)]
    json: String,
  },
  /// Delete an entity
  Delete {
    kind: EntityKind,
    id: String,
    /// Parent id of a task, column or answer, if known
    #[arg(long)]
    parent: Option<String>,
  },
  /// Move a task or column to another container
  Move {
    kind: EntityKind,
    id: String,
    /// Target container id
    #[arg(long)]
    to: String,
    /// Current container id, if known
    #[arg(long)]
    from: Option<String>,
  },
  /// Show the aggregate statistics of a collection
  Stats {
    kind: EntityKind,
    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,
  },
  /// Inspect or reset the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
  /// List cached entries
  Keys,
  /// Mark every entry of a kind stale
  Invalidate { kind: EntityKind },
  /// Drop everything
  Clear,
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
  match raw.split_once('=') {
    Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
    _ => Err(format!("expected key=value, got '{}'", raw)),
  }
}

/// Prints mutation outcomes for the terminal.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn success(&self, message: &str) {
    eprintln!("{}", message);
  }

  fn error(&self, message: &str) {
    eprintln!("error: {}", message);
  }
}

/// Expands `$top` with `$t` bound to the entity type of a top-level kind and
/// `$nested` with `$n` bound to a child type.
macro_rules! dispatch {
  ($kind:expr, $t:ident => $top:expr, $n:ident => $nested:expr) => {
    match $kind {
      EntityKind::Expense => {
        type $t = Expense;
        $top
      }
      EntityKind::Income => {
        type $t = Income;
        $top
      }
      EntityKind::Job => {
        type $t = Job;
        $top
      }
      EntityKind::Application => {
        type $t = Application;
        $top
      }
      EntityKind::Board => {
        type $t = Board;
        $top
      }
      EntityKind::Question => {
        type $t = Question;
        $top
      }
      EntityKind::Column => {
        type $n = Column;
        $nested
      }
      EntityKind::Task => {
        type $n = Task;
        $nested
      }
      EntityKind::Answer => {
        type $n = Answer;
        $nested
      }
    }
  };
}

pub async fn run<S: CacheStorage + 'static>(campus: &Campus<S>, command: Command) -> Result<ExitCode> {
  match command {
    Command::List {
      kind,
      page,
      limit,
      filters,
      search,
    } => {
      if page == 0 || limit == 0 {
        return Err(eyre!("--page and --limit start at 1"));
      }
      let mut query = ListQuery::new().page(page).limit(limit);
      for (field, value) in filters {
        query = query.filter(field, value);
      }
      if let Some(search) = search {
        query = query.search(search);
      }

      dispatch!(kind,
        T => show(campus.list::<T>(&query).await?),
        N => Err(not_standalone(N::KIND))
      )
    }

    Command::Show { kind, id } => dispatch!(kind,
      T => show(campus.get::<T>(&id).await?),
      N => Err(not_standalone(N::KIND))
    ),

    Command::Create { kind, json, parent } => {
      let body: Value = serde_json::from_str(&json)?;
      let outcome = dispatch!(kind,
        T => match parent.as_deref() {
          Some(parent) => print_outcome(campus.create_in::<T>(parent, &body).await),
          None => print_outcome(campus.create::<T>(&body).await),
        },
        N => match parent.as_deref() {
          Some(parent) => print_outcome(campus.create_child::<N>(parent, &body).await),
          None => return Err(eyre!("creating a {} needs --parent", N::KIND)),
        }
      );
      Ok(outcome)
    }

    Command::Update { kind, id, json } => {
      let patch = Patch::from_json(serde_json::from_str(&json)?)?;
      Ok(dispatch!(kind,
        T => print_outcome(campus.update::<T>(&id, &patch).await),
        N => print_outcome(campus.update_child::<N>(&id, &patch).await)
      ))
    }

    Command::Delete { kind, id, parent } => Ok(dispatch!(kind,
      T => exit_code(campus.delete::<T>(&id).await),
      N => exit_code(campus.delete_child::<N>(&id, parent.as_deref()).await)
    )),

    Command::Move { kind, id, to, from } => match kind {
      EntityKind::Task => Ok(print_outcome(
        campus.move_child::<Task>(&id, from.as_deref(), &to).await,
      )),
      EntityKind::Column => Ok(print_outcome(
        campus.move_child::<Column>(&id, from.as_deref(), &to).await,
      )),
      other => Err(eyre!("{} cannot be moved", other.collection())),
    },

    Command::Stats { kind, params } => show(campus.stats(kind, &params).await?),

    Command::Cache { action } => cache(campus, action),
  }
}

fn cache<S: CacheStorage + 'static>(campus: &Campus<S>, action: CacheAction) -> Result<ExitCode> {
  match action {
    CacheAction::Keys => {
      let mut entries = campus.cache().read(|store| store.entries())?;
      entries.sort_by(|a, b| a.key.description().cmp(&b.key.description()));
      for entry in entries {
        println!(
          "{}  {:<5}  {:>8}  {}",
          &entry.key.cache_hash()[..12],
          if entry.stale { "stale" } else { "ok" },
          age(entry.fetched_at),
          entry.key.description()
        );
      }
    }
    CacheAction::Invalidate { kind } => {
      let count = campus.invalidate(&Scope::Kind(kind))?;
      eprintln!("{} entries marked stale", count);
    }
    CacheAction::Clear => {
      campus.cache().clear()?;
      eprintln!("Cache cleared");
    }
  }
  Ok(ExitCode::SUCCESS)
}

fn not_standalone(kind: EntityKind) -> color_eyre::Report {
  eyre!(
    "{} are read through their {}; use `show {} <id>`",
    kind.collection(),
    kind.root(),
    kind.root()
  )
}

fn show<T: Serialize>(result: CacheResult<T>) -> Result<ExitCode> {
  println!("{}", serde_json::to_string_pretty(&result.data)?);

  let origin = match result.source {
    CacheSource::Network => None,
    CacheSource::CacheFresh => Some("cached"),
    CacheSource::CacheStale => Some("cached, stale"),
    CacheSource::Offline => Some("offline, showing cached copy"),
  };
  if let (Some(origin), Some(at)) = (origin, result.cached_at) {
    eprintln!("({}, fetched {} ago)", origin, age(at));
  }
  Ok(ExitCode::SUCCESS)
}

/// The notifier already reported the outcome; print the entity on success.
fn print_outcome<T: Serialize>(outcome: campus_sync::Result<T>) -> ExitCode {
  match outcome {
    Ok(entity) => match serde_json::to_string_pretty(&entity) {
      Ok(json) => {
        println!("{}", json);
        ExitCode::SUCCESS
      }
      Err(e) => {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
      }
    },
    Err(_) => ExitCode::FAILURE,
  }
}

fn exit_code(outcome: campus_sync::Result<()>) -> ExitCode {
  if outcome.is_ok() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  }
}

fn age(at: chrono::DateTime<Utc>) -> String {
  let secs = (Utc::now() - at).num_seconds().max(0);
  match secs {
    0..=59 => format!("{}s", secs),
    60..=3599 => format!("{}m", secs / 60),
    3600..=86399 => format!("{}h", secs / 3600),
    _ => format!("{}d", secs / 86400),
  }
}
