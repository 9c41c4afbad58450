use clap::Parser;
use notepad::cli::{
    run_delete, run_edit, run_list, run_new, run_refresh, run_relay, run_show, run_todo,
    run_watch, Cli, Commands, Session,
};
use notepad::config::Config;
use notepad::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load()?
        .with_db_path(cli.db)
        .with_relay(cli.relay);

    // The relay does not touch the notes database
    if let Some(Commands::Relay) = cli.command {
        return run_relay(&config).await;
    }

    let mut session = Session::open(&config).await?;

    let result = match cli.command {
        None => run_list(&session, None),
        Some(Commands::List(args)) => run_list(&session, args.search.as_deref()),
        Some(Commands::Show(args)) => run_show(&session, args.id.as_deref()),
        Some(Commands::New(args)) => run_new(&mut session, args.title, args.content).await,
        Some(Commands::Edit(args)) => {
            run_edit(&mut session, &args.id, args.title, args.content).await
        }
        Some(Commands::Delete(args)) => run_delete(&mut session, &args.id, args.yes).await,
        Some(Commands::Todo(args)) => run_todo(&mut session, args.command).await,
        Some(Commands::Refresh) => run_refresh(&mut session).await,
        Some(Commands::Watch) => run_watch(&mut session, &config).await,
        Some(Commands::Relay) => Ok(()),
    };

    session.close().await;
    result
}
