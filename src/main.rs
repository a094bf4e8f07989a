//! Binary entrypoint for the companion engine server.

use std::process::ExitCode;

use companion_engine::start_companion_engine;

/// Start the engine server with configuration from the environment.
fn main() -> ExitCode {
    start_companion_engine::run()
}
