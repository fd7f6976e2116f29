use env_logger::Env;

/// Initialise `env_logger`; `RUST_LOG` wins over `default_level`.
/// Calling it twice is harmless.
pub fn init_logger(default_level: &str) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .try_init();
}
