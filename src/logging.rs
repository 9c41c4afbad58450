use env_logger::Env;

/// Log to stderr, filtered by `RUST_LOG` (warnings only by default).
pub fn init_logging(verbose: bool) {
    let default = if verbose { "notepad=debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .try_init();
}
