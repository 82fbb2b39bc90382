use slack_mcp_bridge::bootstrap::Bootstrap;
use slack_mcp_bridge::protocol;
use std::io::{self, BufReader};

/// Startup banner and every other diagnostic line go to stderr only.
/// Standard output is reserved exclusively for protocol frames (§5).
fn print_banner() {
    eprintln!("slack-mcp-bridge starting");
}

fn main() -> io::Result<()> {
    print_banner();

    let (bootstrap, handler) = match Bootstrap::run() {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::exit(1);
        }
    };

    eprintln!("bridge ready, error log at {}", bootstrap.error_log.path().display());

    let stdin = io::stdin();
    let stdout = io::stdout();
    protocol::serve(&handler, BufReader::new(stdin.lock()), stdout.lock())
}
