use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod display;
pub mod list;
pub mod note;
pub mod session;
pub mod todo;
pub mod ui;
pub mod watch;

pub use list::run_list;
pub use note::{run_delete, run_edit, run_new, run_show};
pub use session::Session;
pub use todo::run_todo;
pub use watch::{run_refresh, run_relay, run_watch};

#[derive(Parser)]
#[command(name = "notepad")]
#[command(about = "Notes with todo lists, kept in sync across windows")]
#[command(version)]
pub struct Cli {
    /// Path to the notes database
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,
    /// Address of the sync relay
    #[arg(long, global = true, value_name = "ADDR")]
    pub relay: Option<SocketAddr>,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List notes, most recently updated first
    List(ListArgs),
    /// Show a note with its todos
    Show(ShowArgs),
    /// Create a note
    New(NewArgs),
    /// Change a note's title or content
    Edit(EditArgs),
    /// Delete a note
    Delete(DeleteArgs),
    /// Manage the todo list of a note
    Todo(TodoArgs),
    /// Reload from disk and tell other windows to do the same
    Refresh,
    /// Follow changes made in other windows
    Watch,
    /// Run the loopback sync relay
    Relay,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only notes whose title, content or todos contain this text
    #[arg(short, long)]
    pub search: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Note id or unique prefix (defaults to the most recent note)
    pub id: Option<String>,
}

#[derive(Args)]
pub struct NewArgs {
    #[arg(short, long)]
    pub title: Option<String>,
    #[arg(short, long)]
    pub content: Option<String>,
}

#[derive(Args)]
pub struct EditArgs {
    /// Note id or unique prefix
    pub id: String,
    #[arg(short, long)]
    pub title: Option<String>,
    #[arg(short, long)]
    pub content: Option<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Note id or unique prefix
    pub id: String,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct TodoArgs {
    #[command(subcommand)]
    pub command: TodoCommands,
}

#[derive(Subcommand)]
pub enum TodoCommands {
    /// Append a todo to a note
    Add { note: String, text: String },
    /// Mark a todo as done
    Done { note: String, todo: String },
    /// Mark a todo as not done
    Undo { note: String, todo: String },
    /// Change a todo's text (blank text removes it)
    Edit {
        note: String,
        todo: String,
        text: String,
    },
    /// Remove a todo
    Rm { note: String, todo: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "notepad",
            "list",
            "--search",
            "milk",
            "--db",
            "/tmp/n.db",
            "--relay",
            "127.0.0.1:7000",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/n.db")));
        assert_eq!(cli.relay.map(|a| a.port()), Some(7000));
        match cli.command {
            Some(Commands::List(args)) => assert_eq!(args.search.as_deref(), Some("milk")),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_todo_subcommands() {
        let cli = Cli::try_parse_from(["notepad", "todo", "edit", "ab12", "cd", "new text"]).unwrap();
        match cli.command {
            Some(Commands::Todo(TodoArgs {
                command: TodoCommands::Edit { note, todo, text },
            })) => {
                assert_eq!(note, "ab12");
                assert_eq!(todo, "cd");
                assert_eq!(text, "new text");
            }
            _ => panic!("expected todo edit"),
        }
    }

    #[test]
    fn test_bad_relay_flag_rejected() {
        assert!(Cli::try_parse_from(["notepad", "--relay", "nowhere", "list"]).is_err());
    }
}
