//! Verbosity flag system bridging the daemon's `--verbose`/`--silent` CLI
//! flags to [`tracing`] subscriber configuration.
//!
//! ## Overview
//!
//! Every binary in this workspace (`syncd-primary`, `syncd-replica`,
//! `syncctl`) accepts repeatable `--verbose` flags and a `--silent` flag.
//! This crate turns that pair into a [`tracing_subscriber::EnvFilter`] level
//! and installs a global subscriber, so that the rest of the workspace only
//! ever needs to depend on `tracing` itself.
//!
//! ## Design
//!
//! `RUST_LOG` always wins when set, matching the convention of every other
//! `tracing`-based binary; the verbosity flags only supply the default when
//! it is absent.
//!
//! ## Examples
//!
//! ```no_run
//! use logging::Verbosity;
//!
//! let verbosity = Verbosity::from_flags(2, false);
//! logging::init(verbosity);
//! tracing::info!("started");
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use tracing_subscriber::EnvFilter;

/// A resolved verbosity level, derived from `--verbose`/`--silent` flags.
///
/// # Invariants
///
/// `Silent` always wins over any count of `--verbose` flags, short-circuiting
/// status output entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// `--silent`: only warnings and errors.
    Silent,
    /// No flags: informational messages and above.
    Normal,
    /// One `--verbose`: debug messages and above.
    Verbose,
    /// Two or more `--verbose`: trace messages and above.
    Trace,
}

impl Verbosity {
    /// Derives a verbosity level from a `--verbose` repeat count and a
    /// `--silent` flag, the way the primary/replica/control CLIs parse them.
    #[must_use]
    pub fn from_flags(verbose_count: u8, silent: bool) -> Self {
        if silent {
            return Self::Silent;
        }
        match verbose_count {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Trace,
        }
    }

    fn filter_directive(self) -> &'static str {
        match self {
            Self::Silent => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Installs a global `tracing` subscriber at the given verbosity.
///
/// `RUST_LOG`, if set, overrides the verbosity-derived filter. Safe to call
/// once per process; a second call is a no-op (the global subscriber can
/// only be set once, and we don't treat that as fatal).
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_wins_over_verbose_count() {
        assert_eq!(Verbosity::from_flags(5, true), Verbosity::Silent);
    }

    #[test]
    fn verbose_count_escalates() {
        assert_eq!(Verbosity::from_flags(0, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(1, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(2, false), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(9, false), Verbosity::Trace);
    }
}
