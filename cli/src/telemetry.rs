use std::{fs::File, path::Path};

use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialise tracing output and, when a flamegraph is wanted, start a CPU profiler.
pub fn init_telemetry(profile: bool) -> Option<ProfilerGuard<'static>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false);
    // A subscriber may already be installed when commands run in-process.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();

    if !profile {
        return None;
    }
    ProfilerGuardBuilder::default()
        .frequency(1000)
        .blocklist(&["libc", "libpthread", "libgcc", "libm"])
        .build()
        .map_err(|err| warn!(%err, "cpu profiler unavailable"))
        .ok()
}

/// Persist the collected CPU profile if profiling was active.
pub fn write_profile(guard: ProfilerGuard<'_>, output_path: impl AsRef<Path>) {
    let output_path = output_path.as_ref();
    let report = match guard.report().build() {
        Ok(report) => report,
        Err(err) => {
            warn!(%err, "failed to build cpu profile");
            return;
        }
    };
    match File::create(output_path) {
        Ok(mut file) => {
            if let Err(err) = report.flamegraph(&mut file) {
                warn!(%err, path = %output_path.display(), "failed to render flamegraph");
            }
        }
        Err(err) => warn!(%err, path = %output_path.display(), "failed to create profile file"),
    }
}
