use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::credentials::{CredentialProvider, TerminalPrompt};
use crate::error::{Error, RouterError};
use crate::mac::MacAddress;
use crate::router::{HttpsTransport, Router, Transport};

mod config;
mod credentials;
mod error;
mod mac;
mod router;

/// Wake a device through the FRITZ!Box web interface.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Device name from the config file.
    #[arg(default_value = "default")]
    device: String,

    /// Configuration file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Skip TLS certificate verification (not recommended).
    #[arg(short = 'k', long)]
    ssl_no_verify: bool,

    /// Log more; repeat for debug output.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// What got woken, for the confirmation line.
#[derive(Debug)]
struct Woken {
    device: String,
    mac: MacAddress,
}

impl fmt::Display for Woken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device, self.mac)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config, logs in and asks the router to wake the device.
/// `connect` builds the transport once everything local has checked out;
/// progress lines go to `out`.
fn run<P, T, C>(args: &Args, prompt: &P, connect: C, out: &mut impl Write) -> Result<Woken, Error>
where
    P: CredentialProvider,
    T: Transport,
    C: FnOnce(bool) -> Result<T, RouterError>,
{
    let config = Config::load(&args.config)?;
    let mac = config.device(&args.device)?;
    debug!(device = %args.device, %mac, "resolved device");

    let password = credentials::resolve(&config, prompt)?;

    let router = Router::new(&config.host, config.port, connect(!args.ssl_no_verify)?);
    // progress output is best effort
    let _ = writeln!(out, "Connecting to FRITZ!Box at {}...", router.base_url());
    let session = router.login(&config.username, &password)?;

    let _ = writeln!(out, "Sending wake-up packet to {} ({mac})...", args.device);
    router.wake(&session, mac)?;

    Ok(Woken {
        device: args.device.clone(),
        mac,
    })
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args, &TerminalPrompt, HttpsTransport::new, &mut io::stdout()) {
        Ok(woken) => {
            println!("✓ Wake-up packet sent to {woken}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("✗ {} error: {err}", err.category());
            ExitCode::from(err.exit_code())
        }
    }
}

#[cfg(test)]
use crate::credentials::{Fixed, NoTerminal};
#[cfg(test)]
use crate::router::fake::{host_listing, overview, session_info, ScriptedRouter};

#[cfg(test)]
const SID: &str = "a1b2c3d4e5f60718";

#[cfg(test)]
fn write_config(dir: &tempfile::TempDir, password: Option<&str>) -> PathBuf {
    let path = dir.path().join("wakeup.json");
    let config = serde_json::json!({
        "host": "fritz.box",
        "port": 443,
        "username": "admin",
        "password": password,
        "devices": { "desktop": "aa:bb:cc:dd:ee:ff", "nas": "00-11-22-33-44-55" }
    });
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

#[cfg(test)]
fn no_connect(_verify_tls: bool) -> Result<&'static ScriptedRouter, RouterError> {
    panic!("connected although the run should have stopped earlier")
}

#[cfg(test)]
fn args(device: &str, config: &std::path::Path, extra: &[&str]) -> Args {
    let mut argv = vec!["fritz-wake", device, "--config", config.to_str().unwrap()];
    argv.extend_from_slice(extra);
    Args::parse_from(argv)
}

#[test]
fn test_args_defaults() {
    let args = Args::parse_from(["fritz-wake"]);
    assert_eq!(args.device, "default");
    assert_eq!(args.config, PathBuf::from("wakeup.json"));
    assert!(!args.ssl_no_verify);

    let args = Args::parse_from(["fritz-wake", "nas", "-c", "other.json", "-k", "-vv"]);
    assert_eq!(args.device, "nas");
    assert_eq!(args.config, PathBuf::from("other.json"));
    assert!(args.ssl_no_verify);
    assert_eq!(args.verbose, 2);
}

#[test]
fn test_wakes_configured_device() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, Some("secret"));
    let router = ScriptedRouter::new()
        .reply_xml(&session_info("0000000000000000", "1234567z", 0))
        .reply_xml(&session_info(SID, "1234567z", 0))
        .reply_json(host_listing())
        .reply_json(&overview("7.57"))
        .reply_json(r#"{"data":{"btn_wake":"ok"}}"#);

    let mut out = Vec::new();
    let woken = run(
        &args("Desktop", &path, &[]),
        &NoTerminal,
        |verify| {
            assert!(verify);
            Ok(&router)
        },
        &mut out,
    )
    .unwrap();

    assert!(woken.to_string().contains("Desktop"));
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Connecting to FRITZ!Box at https://fritz.box:443...\n\
         Sending wake-up packet to Desktop (AA:BB:CC:DD:EE:FF)...\n"
    );
    assert_eq!(woken.mac.to_string(), "AA:BB:CC:DD:EE:FF");
    assert_eq!(router.calls().len(), 5);
}

#[test]
fn test_prompts_when_password_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, None);
    let router = ScriptedRouter::new()
        .reply_xml(&session_info("0000000000000000", "1234567z", 0))
        .reply_xml(&session_info(SID, "1234567z", 0))
        .reply_json(host_listing())
        .reply_json(&overview("7.57"))
        .reply_json(r#"{"data":{"btn_wake":"ok"}}"#);

    run(
        &args("nas", &path, &["--ssl-no-verify"]),
        &Fixed("äbc"),
        |verify| {
            assert!(!verify);
            Ok(&router)
        },
        &mut io::sink(),
    )
    .unwrap();

    assert_eq!(
        router.calls()[1].param("response"),
        Some("1234567z-9e224a41eeefa284df7bb0f26c2913e2")
    );
}

#[test]
fn test_unknown_device_never_connects() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, Some("secret"));

    let err = run(&args("laptop", &path, &[]), &Fixed("x"), no_connect, &mut io::sink()).unwrap_err();

    assert!(matches!(err, Error::UnknownDevice { .. }));
    assert_ne!(err.exit_code(), 0);
    assert!(err.to_string().contains("desktop, nas"));
}

#[test]
fn test_rejected_login_never_wakes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, Some("wrong"));
    let router = ScriptedRouter::new()
        .reply_xml(&session_info("0000000000000000", "1234567z", 0))
        .reply_xml(&session_info("0000000000000000", "89abcdef", 1));

    let err = run(&args("desktop", &path, &[]), &NoTerminal, |_| Ok(&router), &mut io::sink()).unwrap_err();

    assert!(matches!(err, Error::Router(RouterError::Authentication)));
    assert_eq!(err.exit_code(), 7);
    assert!(router.calls().iter().all(|call| call.path() != "/data.lua"));
}

#[test]
fn test_connection_failure_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, Some("secret"));
    let router = ScriptedRouter::new().fail(RouterError::Connection("certificate verify failed".into()));

    let err = run(&args("desktop", &path, &[]), &NoTerminal, |_| Ok(&router), &mut io::sink()).unwrap_err();
    assert_eq!(err.exit_code(), 6);
    assert_eq!(err.category(), "Connection");
}

#[test]
fn test_missing_password_without_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, None);

    let err = run(&args("desktop", &path, &[]), &NoTerminal, no_connect, &mut io::sink()).unwrap_err();
    assert!(matches!(err, Error::Credential(_)));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(
        &args("desktop", &dir.path().join("absent.json"), &[]),
        &NoTerminal,
        no_connect,
        &mut io::sink(),
    )
    .unwrap_err();
    assert_eq!(err.exit_code(), 3);
}
