//! `ledgerlint` command line: argument parsing, config layering and output.
//!
//! Reports go to the supplied writer (stdout in the binary); logs go to
//! stderr through `tracing-subscriber`.

use std::io::Write;
use std::path::PathBuf;

use ledgerlint_core::{AuditConfig, Auditor, SearchKind, TransitionOutcome, render_text_report};
use ledgerlint_error::{AuditError, Result};
use ledgerlint_source::ChainFixture;
use ledgerlint_types::{AccountId, Cx};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Audit clean, every search conclusive.
pub const EXIT_CLEAN: u8 = 0;
/// Violations found or some search inconclusive.
pub const EXIT_FINDINGS: u8 = 1;
/// The run itself failed.
pub const EXIT_FAILURE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Audit,
    Search { account: AccountId, probe: SearchKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub command: Command,
    pub fixture: PathBuf,
    pub config_file: Option<PathBuf>,
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub check_locks: bool,
    pub timeout_secs: Option<u64>,
    pub json_output: bool,
    pub log_json: bool,
}

pub fn print_help() {
    let help = "\
ledgerlint - staking ledger integrity auditor

USAGE:
    ledgerlint audit  --fixture <PATH> [OPTIONS]
    ledgerlint search --fixture <PATH> --account <ID> --probe <KIND> [OPTIONS]

COMMANDS:
    audit                      Reconcile the latest block and date every finding
    search                     Bisect one account without a reconcile pass

OPTIONS:
    --fixture <PATH>           Chain fixture (JSON) to audit
    --config <PATH>            TOML audit config; flags below override it
    --workers <N>              Concurrent search workers
    --retries <N>              Attempts per source request, including the first
    --check-locks              Compare ledger totals against staking locks
    --timeout-secs <N>         Abort the run after N seconds
    --account <ID>             0x-prefixed 32-byte account id (search only)
    --probe <KIND>             deprecation|became-stash|became-controller (search only)
    --json                     Emit the report as JSON
    --log-json                 Emit logs as JSON lines on stderr (filter with RUST_LOG)
    -h, --help                 Show this help

EXIT STATUS:
    0 clean, 1 findings or inconclusive searches, 2 run failure
";
    println!("{help}");
}

fn take_value<'a>(
    args: &'a [String],
    index: &mut usize,
    flag: &str,
) -> std::result::Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> std::result::Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {flag} value: {raw}"))
}

/// Parse `args` (without the program name).
///
/// `Err` with an empty message means help was printed.
pub fn parse_args(args: &[String]) -> std::result::Result<CliConfig, String> {
    let Some(subcommand) = args.first() else {
        print_help();
        return Err("missing command (expected audit|search)".to_owned());
    };
    let is_search = match subcommand.as_str() {
        "audit" => false,
        "search" => true,
        "-h" | "--help" => {
            print_help();
            return Err(String::new());
        }
        unknown => return Err(format!("unknown command: {unknown}")),
    };

    let mut fixture = None;
    let mut account = None;
    let mut probe = None;
    let mut config = CliConfig {
        command: Command::Audit,
        fixture: PathBuf::new(),
        config_file: None,
        workers: None,
        retries: None,
        check_locks: false,
        timeout_secs: None,
        json_output: false,
        log_json: false,
    };

    let mut index = 1;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "--fixture" => fixture = Some(PathBuf::from(take_value(args, &mut index, flag)?)),
            "--config" => {
                config.config_file = Some(PathBuf::from(take_value(args, &mut index, flag)?));
            }
            "--workers" => {
                config.workers = Some(parse_number(take_value(args, &mut index, flag)?, flag)?);
            }
            "--retries" => {
                config.retries = Some(parse_number(take_value(args, &mut index, flag)?, flag)?);
            }
            "--timeout-secs" => {
                config.timeout_secs = Some(parse_number(take_value(args, &mut index, flag)?, flag)?);
            }
            "--account" if is_search => {
                let raw = take_value(args, &mut index, flag)?;
                account = Some(
                    raw.parse::<AccountId>()
                        .map_err(|err| format!("invalid --account value: {err}"))?,
                );
            }
            "--probe" if is_search => {
                let raw = take_value(args, &mut index, flag)?;
                probe = Some(raw.parse::<SearchKind>().map_err(|err| err.to_string())?);
            }
            "--check-locks" => config.check_locks = true,
            "--json" => config.json_output = true,
            "--log-json" => config.log_json = true,
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }

    config.fixture = fixture.ok_or("--fixture is required")?;
    if is_search {
        config.command = Command::Search {
            account: account.ok_or("search requires --account")?,
            probe: probe.ok_or("search requires --probe")?,
        };
    }
    Ok(config)
}

/// Config file (or defaults) with command-line overrides applied.
pub fn resolve_audit_config(config: &CliConfig) -> Result<AuditConfig> {
    let mut audit = match &config.config_file {
        Some(path) => AuditConfig::load(path)
            .map_err(|err| AuditError::config(format!("{}: {err}", path.display())))?,
        None => AuditConfig::default(),
    };
    if let Some(workers) = config.workers {
        audit.workers = workers;
    }
    if let Some(retries) = config.retries {
        audit.retry.max_attempts = retries;
    }
    if config.check_locks {
        audit.check_locks = true;
    }
    if config.timeout_secs.is_some() {
        audit.timeout_secs = config.timeout_secs;
    }
    audit.validate()?;
    Ok(audit)
}

/// Install the stderr subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(error) = installed {
        eprintln!("WARN ledgerlint: tracing subscriber not installed: {error}");
    }
}

/// Run the parsed command, writing the report to `out`. Returns the exit code.
pub fn execute(config: &CliConfig, out: &mut dyn Write) -> Result<u8> {
    let audit_config = resolve_audit_config(config)?;
    let chain = ChainFixture::load(&config.fixture)?.into_chain()?;
    info!(command = ?config.command, json = config.json_output, "running");
    let auditor = Auditor::new(&chain, audit_config)?;
    let cx = Cx::new();

    match &config.command {
        Command::Audit => {
            let report = auditor.run(&cx)?;
            if config.json_output {
                writeln!(out, "{}", report.to_json_pretty())?;
            } else {
                write!(out, "{}", render_text_report(&report))?;
            }
            let inconclusive = report.inconclusive().next().is_some();
            Ok(if report.has_violations() || inconclusive {
                EXIT_FINDINGS
            } else {
                EXIT_CLEAN
            })
        }
        Command::Search { account, probe } => {
            let outcome = auditor.search_account(&cx, account, *probe)?;
            if config.json_output {
                let json = serde_json::json!({
                    "account": account,
                    "search": probe,
                    "outcome": &outcome,
                });
                let rendered = serde_json::to_string_pretty(&json).map_err(|err| {
                    AuditError::internal(format!("search result json serialize failed: {err}"))
                })?;
                writeln!(out, "{rendered}")?;
            } else {
                let line = match &outcome {
                    TransitionOutcome::Found { height, block_hash } => {
                        format!("at block {height} ({block_hash})")
                    }
                    TransitionOutcome::NotTransitioned => "not transitioned".to_owned(),
                    TransitionOutcome::Error { detail } => format!("error: {detail}"),
                };
                writeln!(out, "{account} {probe}: {line}")?;
            }
            Ok(match outcome {
                TransitionOutcome::Error { .. } => EXIT_FINDINGS,
                _ => EXIT_CLEAN,
            })
        }
    }
}
