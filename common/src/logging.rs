//! Logger bootstrap for binaries and benches

use env_logger::Env;

/// Initialise `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let result = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();

    if result.is_ok() {
        log::debug!("logger initialised");
    }
}
