use std::io::Write as _;
use std::path::Path;

use ledgerlint_cli::{EXIT_CLEAN, EXIT_FINDINGS, execute, parse_args};
use ledgerlint_error::{AuditError, Result};
use tempfile::NamedTempFile;

fn hex(n: u8) -> String {
    format!("0x{}", format!("{n:02x}").repeat(32))
}

/// Controller 3 is claimed by stashes 1 and 2 from block 12 on; stash 1
/// holds a 100-unit ledger but only 60 is locked.
fn duplicate_fixture() -> String {
    format!(
        r#"{{
            "chain": "devnet",
            "latest": 40,
            "blocks": [
                {{ "height": 0,
                   "bond": [["{s1}", "{c}"]],
                   "ledger": [["{c}", {{ "stash": "{s1}", "total": 100, "active": 100 }}]],
                   "locks": [["{s1}", [{{ "id": "staking ", "amount": 60 }}]]] }},
                {{ "height": 12, "bond": [["{s2}", "{c}"]] }}
            ]
        }}"#,
        s1 = hex(1),
        s2 = hex(2),
        c = hex(3),
    )
}

fn clean_fixture() -> String {
    format!(
        r#"{{ "chain": "devnet", "blocks": [
            {{ "height": 4,
               "bond": [["{s}", "{c}"]],
               "ledger": [["{c}", {{ "stash": "{s}", "total": 5 }}]] }}
        ] }}"#,
        s = hex(1),
        c = hex(2),
    )
}

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn run(raw: &[&str]) -> (Result<u8>, String) {
    let args: Vec<String> = raw.iter().map(|s| (*s).to_owned()).collect();
    let config = parse_args(&args).unwrap();
    let mut out = Vec::new();
    let code = execute(&config, &mut out);
    (code, String::from_utf8(out).unwrap())
}

fn path(file: &NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

#[test]
fn audit_text_report_lists_findings() {
    let fixture = write_temp(&duplicate_fixture());
    let (code, text) = run(&["audit", "--fixture", path(&fixture), "--workers", "2"]);
    assert_eq!(code.unwrap(), EXIT_FINDINGS);
    assert!(text.contains("chain devnet at block #40"), "{text}");
    assert!(text.contains("duplicate controllers: 1"), "{text}");
    assert!(!text.contains("ledger/lock mismatches"), "{text}");
}

#[test]
fn audit_json_report_has_schema_and_lock_mismatch() {
    let fixture = write_temp(&duplicate_fixture());
    let (code, json) = run(&[
        "audit",
        "--fixture",
        path(&fixture),
        "--check-locks",
        "--json",
    ]);
    assert_eq!(code.unwrap(), EXIT_FINDINGS);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["schema_version"], "ledgerlint.report.v1");
    assert_eq!(value["block_height"], 40);
    assert_eq!(value["duplicates"][0]["controller"], hex(3));
    assert_eq!(value["lock_mismatches"][0]["locked"], 60);
    // Controller 3 is never self-bonded, so its deprecation has not happened.
    assert_eq!(
        value["transitions"][hex(3)]["controller_deprecated"]["status"],
        "not_transitioned"
    );
}

#[test]
fn clean_chain_exits_zero() {
    let fixture = write_temp(&clean_fixture());
    let (code, text) = run(&["audit", "--fixture", path(&fixture)]);
    assert_eq!(code.unwrap(), EXIT_CLEAN);
    assert!(text.contains("duplicate controllers: 0"));
}

#[test]
fn config_file_is_layered_under_flags() {
    let fixture = write_temp(&duplicate_fixture());
    let config = write_temp("workers = 0\n");
    let (code, _) = run(&["audit", "--fixture", path(&fixture), "--config", path(&config)]);
    let err = code.unwrap_err();
    assert!(matches!(err, AuditError::Config { .. }), "{err}");
    assert!(err.to_string().contains("workers"), "{err}");

    let (code, _) = run(&[
        "audit",
        "--fixture",
        path(&fixture),
        "--config",
        path(&config),
        "--workers",
        "3",
    ]);
    assert_eq!(code.unwrap(), EXIT_FINDINGS);
}

#[test]
fn search_command_bisects_one_account() {
    let fixture = write_temp(&duplicate_fixture());
    let stash = hex(2);
    let (code, text) = run(&[
        "search",
        "--fixture",
        path(&fixture),
        "--account",
        &stash,
        "--probe",
        "became-stash",
    ]);
    assert_eq!(code.unwrap(), EXIT_CLEAN);
    assert!(text.contains("became_stash: at block #12"), "{text}");
}

#[test]
fn unreadable_fixture_is_a_run_failure() {
    let fixture = write_temp("{ \"chain\": 7 }");
    let (code, _) = run(&["audit", "--fixture", path(&fixture)]);
    let err = code.unwrap_err();
    assert!(matches!(err, AuditError::Decode { .. }), "{err}");
    assert!(err.is_run_fatal());

    let missing = Path::new("/nonexistent/ledgerlint/fixture.json");
    let (code, _) = run(&["audit", "--fixture", missing.to_str().unwrap()]);
    assert!(code.is_err());
}
