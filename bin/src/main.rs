use std::{
    io::{self, Write},
    process::exit,
};

use clap::Parser;
use imds_token::fetch_token;

/// Print an access token for the Azure managed identity of this virtual machine
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// URI of the application resource
    #[arg(long)]
    resource: String,
}

/// Writes the token or the diagnostic, returns the process exit code
fn report<O: Write, E: Write>(
    result: imds_token::Result<String>,
    stdout: &mut O,
    stderr: &mut E,
) -> i32 {
    match result {
        Ok(token) => {
            if let Err(e) = writeln!(stdout, "{}", token) {
                let _ = writeln!(stderr, "Error: failed to write token: {}", e);
                return 1;
            }
            0
        }
        Err(e) => {
            log::debug!("Token fetch failed: {:?}", e);
            let _ = writeln!(stderr, "Error: {}", e);
            1
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let code = report(
        fetch_token(&cli.resource),
        &mut io::stdout(),
        &mut io::stderr(),
    );
    exit(code);
}
