use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::Result;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tasklist::view::{self, Segment};
use tasklist::{Backend, Config, Storage, StoreState, Task, TaskFilter, TaskStore};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "tasklist")]
#[command(about = "Tasklist CLI - Add, complete, filter and search local tasks")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to a YAML config file (default: <config dir>/tasklist/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage backend, overriding the config file
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Data directory, overriding the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task
    Add {
        /// Task text; words are joined with spaces
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// List tasks
    List {
        /// Show only tasks with this status
        #[arg(short, long, value_enum, default_value_t = TaskFilter::All)]
        filter: TaskFilter,

        /// Only show tasks containing this text (case-insensitive)
        #[arg(short, long, default_value = "")]
        search: String,
    },

    /// Toggle a task between active and completed
    Toggle { id: String },

    /// Remove a task
    Remove { id: String },

    /// Remove all completed tasks
    ClearCompleted,

    /// Show task counts
    Stats,

    /// Interactive session that re-renders after every change
    Shell,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let level = match cli.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?.with_overrides(cli.backend, cli.data_dir);
    let storage = config.open_storage()?;
    let mut store = TaskStore::open_with_key(storage, &config.storage_key)?;

    match cli.command {
        Commands::Add { text } => match store.add_task(&text.join(" "))? {
            Some(id) => println!("Added {}", id.dimmed()),
            None => println!("Nothing to add: task text is blank"),
        },
        Commands::List { filter, search } => {
            store.set_filter(filter);
            store.set_search_query(search);
            render(store.state());
        }
        Commands::Toggle { id } => match store.toggle_task(&id)? {
            Some(true) => println!("Completed {}", id.dimmed()),
            Some(false) => println!("Reopened {}", id.dimmed()),
            None => println!("No task with id {}", id),
        },
        Commands::Remove { id } => {
            if store.remove_task(&id)? {
                println!("Removed {}", id.dimmed());
            } else {
                println!("No task with id {}", id);
            }
        }
        Commands::ClearCompleted => {
            let removed = store.clear_completed()?;
            println!("Cleared {} completed task(s)", removed);
        }
        Commands::Stats => {
            let stats = store.stats();
            println!(
                "total: {}  active: {}  completed: {}",
                stats.total, stats.active, stats.completed
            );
        }
        Commands::Shell => run_shell(&mut store, io::stdin().lock())?,
    }

    Ok(())
}

const SHELL_HELP: &str = "\
commands:
  add <text>        add a task
  toggle <id>       complete or reopen a task
  rm <id>           remove a task
  clear             remove completed tasks
  filter <name>     all | active | completed
  search [text]     search tasks (empty clears)
  help              show this help
  quit              leave the shell";

enum ShellAction {
    Continue,
    Quit,
}

/// Read commands until `quit` or end of input
///
/// A failing command (e.g. a write the storage rejected) is reported and the
/// session goes on; only terminal I/O errors end it.
fn run_shell<S: Storage, R: BufRead>(store: &mut TaskStore<S>, mut input: R) -> Result<()> {
    store.subscribe(render);
    render(store.state());
    println!("{}", "type `help` for commands".dimmed());

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        match shell_command(store, &line) {
            Ok(ShellAction::Continue) => {}
            Ok(ShellAction::Quit) => break,
            Err(e) => eprintln!("{} {:#}", "error:".red(), e),
        }
    }

    Ok(())
}

fn shell_command<S: Storage>(store: &mut TaskStore<S>, line: &str) -> Result<ShellAction> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (command, arg) = match line.trim_start().split_once(' ') {
        Some((command, arg)) => (command, arg),
        None => (line.trim(), ""),
    };

    match command {
        "" => {}
        "add" => {
            if store.add_task(arg)?.is_none() {
                println!("Nothing to add: task text is blank");
            }
        }
        "toggle" => {
            if store.toggle_task(arg.trim())?.is_none() {
                println!("No task with id {}", arg.trim());
            }
        }
        "rm" | "remove" => {
            if !store.remove_task(arg.trim())? {
                println!("No task with id {}", arg.trim());
            }
        }
        "clear" => {
            store.clear_completed()?;
        }
        "filter" => match arg.parse::<TaskFilter>() {
            Ok(filter) => store.set_filter(filter),
            Err(e) => println!("{}", e),
        },
        "search" => store.set_search_query(arg),
        "help" => println!("{}", SHELL_HELP),
        "quit" | "exit" => return Ok(ShellAction::Quit),
        other => println!("Unknown command: {} (try `help`)", other),
    }

    Ok(ShellAction::Continue)
}

/// Print the visible tasks and a stats/filter bar
fn render(state: &StoreState) {
    let tasks = view::filtered_tasks(&state.tasks, state.filter, &state.search_query);
    let searching = !state.search_query.trim().is_empty();

    println!();
    if tasks.is_empty() {
        if searching {
            println!("{}", format!("Nothing found for \"{}\"", state.search_query).dimmed());
        } else {
            println!("{}", "no tasks".dimmed());
        }
    } else {
        if searching {
            println!("{}", format!("Found {} task(s)", tasks.len()).dimmed());
        }
        for task in tasks {
            println!("{}", render_task(task, &state.search_query));
        }
    }

    let stats = view::stats(&state.tasks);
    let filters: Vec<String> = TaskFilter::ALL
        .iter()
        .map(|&filter| {
            let count = match filter {
                TaskFilter::All => stats.total,
                TaskFilter::Active => stats.active,
                TaskFilter::Completed => stats.completed,
            };
            let label = format!("{} ({})", filter, count);
            if filter == state.filter {
                label.bold().underline().to_string()
            } else {
                label
            }
        })
        .collect();

    let mut bar = format!("{} items left | {}", stats.active, filters.join("  "));
    if view::has_completed(&state.tasks) {
        bar.push_str(&format!(" | {}", "clear-completed available".dimmed()));
    }
    println!("{}", bar);
}

fn render_task(task: &Task, search_query: &str) -> String {
    let mark = if task.completed {
        "[x]".green().to_string()
    } else {
        "[ ]".to_string()
    };

    let text: String = view::highlight(&task.text, search_query)
        .into_iter()
        .map(|Segment { text, matched }| {
            let piece = if matched {
                text.yellow().bold()
            } else {
                text.normal()
            };
            if task.completed {
                piece.strikethrough().to_string()
            } else {
                piece.to_string()
            }
        })
        .collect();

    format!(
        "{} {}  {}  {}",
        mark,
        text,
        task.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        task.id.dimmed()
    )
}
