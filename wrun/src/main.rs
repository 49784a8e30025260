//! wrun client.
//!
//! Runs one executable on a remote `wrund` server, prints what it wrote and
//! exits with its return code. Communication failures exit with 1.

#![forbid(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use wrun_common::{
    AuthError, ClientTls, Command, ConnectionLimits, ErrorEntry, ExecResult, LogConfig, Proxy,
    ProxyError, SharedSecret, TlsError, init_logging,
};

/// Exit status when the remote result could not be obtained.
const COMMUNICATION_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "wrun")]
#[command(author, version, about = "wrun client - run an executable on a remote wrund server")]
struct Cli {
    /// Server host
    #[arg(long, env = "WRUN_HOST", default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, env = "WRUN_PORT", default_value_t = 3333)]
    port: u16,

    /// CA certificate (PEM) used to verify the server; enables TLS
    #[arg(long, value_name = "PATH")]
    ca_file: Option<PathBuf>,

    /// Name expected in the server certificate (defaults to --host)
    #[arg(long, requires = "ca_file")]
    server_name: Option<String>,

    /// Client certificate (PEM) for mutual TLS
    #[arg(long, value_name = "PATH", requires_all = ["key", "ca_file"])]
    cert: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS
    #[arg(long, value_name = "PATH", requires = "cert")]
    key: Option<PathBuf>,

    /// Shared secret used to sign requests and verify responses
    #[arg(long, env = "WRUN_SHARED_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Text passed to the remote process on standard input
    #[arg(long, conflicts_with = "stdin_file")]
    stdin: Option<String>,

    /// File whose contents are passed on standard input
    #[arg(long, value_name = "PATH")]
    stdin_file: Option<PathBuf>,

    /// Timeout for connecting, the TLS handshake and sending the request (e.g. "30s")
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Give up waiting for the result after this long (default: wait until the job ends)
    #[arg(long, value_parser = humantime::parse_duration)]
    response_timeout: Option<Duration>,

    /// Print the result as JSON instead of the remote output
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Executable name inside the server's base directory
    executable: String,

    /// Arguments passed to the executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("warn");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let logging_guards = match init_logging(&log_config) {
        Ok(guards) => Some(guards),
        Err(e) => {
            eprintln!("wrun: logging disabled: {e}");
            None
        }
    };

    let code = match run(&cli).await {
        Ok(result) => match report(&result, cli.json) {
            Ok(()) => result.returncode,
            Err(e) => {
                eprintln!("wrun: {e:#}");
                COMMUNICATION_FAILURE
            }
        },
        Err(e) => {
            eprintln!("wrun: {e:#}");
            if let Some(entry) = catalog_entry(&e) {
                eprint!("{}", entry.format_full());
            }
            COMMUNICATION_FAILURE
        }
    };

    drop(logging_guards);
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<ExecResult> {
    let proxy = build_proxy(cli)?;
    let command = Command::new(&cli.executable)
        .with_args(cli.args.iter().cloned())
        .with_stdin(read_stdin(cli)?);
    debug!(addr = %proxy.addr(), executable = %command.executable, "sending request");

    proxy.run_command(&command).await.map_err(|e| {
        let code = e.code().code_string();
        anyhow::Error::new(e).context(code)
    })
}

fn build_proxy(cli: &Cli) -> Result<Proxy> {
    let mut proxy = Proxy::new(&cli.host, cli.port).with_limits(
        ConnectionLimits::default()
            .with_io_timeout(cli.timeout)
            .with_response_timeout(cli.response_timeout),
    );

    if let Some(ca_file) = &cli.ca_file {
        let identity = cli.cert.as_deref().zip(cli.key.as_deref());
        let mut tls = ClientTls::from_files(ca_file, identity)
            .with_context(|| format!("Failed to load TLS material from {}", ca_file.display()))?;
        if let Some(name) = &cli.server_name {
            tls = tls.with_server_name(name);
        }
        proxy = proxy.with_tls(tls);
    }

    if let Some(secret) = &cli.secret {
        proxy = proxy.with_secret(SharedSecret::new(secret)?);
    }
    Ok(proxy)
}

/// Catalog entry for failures that carry an error code.
fn catalog_entry(error: &anyhow::Error) -> Option<ErrorEntry> {
    let code = if let Some(e) = error.downcast_ref::<ProxyError>() {
        e.code()
    } else if let Some(e) = error.downcast_ref::<TlsError>() {
        e.code()
    } else if let Some(e) = error.downcast_ref::<AuthError>() {
        e.code()
    } else {
        return None;
    };
    Some(code.entry())
}

fn read_stdin(cli: &Cli) -> Result<String> {
    match (&cli.stdin, &cli.stdin_file) {
        (Some(text), _) => Ok(text.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => Ok(String::new()),
    }
}

fn report(result: &ExecResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;
    if let Some(stderr) = &result.stderr {
        let mut err = std::io::stderr().lock();
        err.write_all(stderr.as_bytes())?;
        err.flush()?;
    }
    Ok(())
}
