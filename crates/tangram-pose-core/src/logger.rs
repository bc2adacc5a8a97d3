//! Minimal stderr logger.
//!
//! Lines look like `[   0.042s  WARN track::solver] message`. Records from the
//! `tangram_pose*` crates follow the requested level; everything else is
//! capped at `warn`. With the `tracing` feature, [`init_tracing`] installs a
//! `tracing-subscriber` formatter with the same default filtering.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_TARGET_PREFIX: &str = "tangram_pose";

/// `tangram_pose_track::solver` -> `track::solver`.
fn short_target(target: &str) -> &str {
    match target.strip_prefix(OWN_TARGET_PREFIX) {
        Some("") => "pipeline",
        Some(rest) => rest.trim_start_matches(['_', ':']),
        None => target,
    }
}

fn target_enabled(level: LevelFilter, target: &str, record_level: Level) -> bool {
    let cap = if target.starts_with(OWN_TARGET_PREFIX) {
        level
    } else {
        level.min(LevelFilter::Warn)
    };
    record_level <= cap
}

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        target_enabled(self.level, metadata.target(), metadata.level())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            short_target(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger; `level` applies to the workspace crates.
///
/// Later calls are no-ops once a logger from this crate is installed.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber. `RUST_LOG` wins over the default
/// `warn,tangram_pose=info`; span close events carry stage durations.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{OWN_TARGET_PREFIX}=info")));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
