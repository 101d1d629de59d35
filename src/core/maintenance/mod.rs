//! Housekeeping passes run from the CLI: pruning old agent conversations and
//! opening a diagnostic conversation about recently failed runs.

mod cleanup;
mod troubleshoot;

pub use cleanup::{CleanupOptions, CleanupReport, cleanup};
pub use troubleshoot::{TroubleshootOptions, TroubleshootReport, build_troubleshoot_prompt, troubleshoot};

pub const DEFAULT_CLEANUP_MAX_AGE_HOURS: i64 = 48;
pub const DEFAULT_TROUBLESHOOT_LOOKBACK_HOURS: i64 = 24;
