// Logging setup for hosts embedding the playback core

use tracing::Level;

/// Install a fmt subscriber writing to stderr.
///
/// Returns false if a global subscriber is already set, which is the case when
/// the host application configured its own.
pub fn init_logging(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}
