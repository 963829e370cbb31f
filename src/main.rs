// Purpose: Provide default binary entry for busybox-builder CLI execution.
// Inputs/Outputs: Reads process args and returns process exit code from CLI dispatcher.
// Invariants: Main must not bypass centralized CLI argument/diagnostic handling.
// Gotchas: Logging is initialized here once; library code only emits tracing events.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GSBOX_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let code = gsbox::cli::run_cli(std::env::args().skip(1));
    std::process::exit(code);
}
