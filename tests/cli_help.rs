use std::fmt::Write as _;

use anyhow::{Context, Result};
use assert_cmd::Command;
use tempfile::tempdir;

struct HelpCase {
    path: &'static [&'static str],
    expected_snippet: &'static str,
}

const HELP_CASES: &[HelpCase] = &[
    HelpCase {
        path: &[],
        expected_snippet: "Request workflow server CLI",
    },
    HelpCase {
        path: &["start"],
        expected_snippet: "Start the reqflow server in the foreground",
    },
    HelpCase {
        path: &["config"],
        expected_snippet: "Update system configuration",
    },
    HelpCase {
        path: &["token"],
        expected_snippet: "Issue access tokens",
    },
    HelpCase {
        path: &["token", "issue"],
        expected_snippet: "Issue a signed access token",
    },
    HelpCase {
        path: &["types"],
        expected_snippet: "Inspect registered request types",
    },
    HelpCase {
        path: &["types", "show"],
        expected_snippet: "Show statuses, actions and payload fields",
    },
];

#[test]
fn cli_help_regressions() -> Result<()> {
    for case in HELP_CASES {
        let stdout = run(case.path, &["--help"])
            .with_context(|| format!("command {:?} --help failed", case.path))?;
        assert!(
            stdout.contains(case.expected_snippet),
            "expected help for {:?} to contain {:?}\nstdout:\n{}",
            case.path,
            case.expected_snippet,
            indent_output(&stdout)
        );
    }
    Ok(())
}

#[test]
fn types_list_names_builtin_kinds() -> Result<()> {
    let stdout = run(&["types", "list"], &[])?;
    for type_id in ["reqflow.request", "reqflow.access-request", "reqflow.invitation"] {
        assert!(
            stdout.contains(type_id),
            "expected {type_id} in listing\nstdout:\n{}",
            indent_output(&stdout)
        );
    }
    Ok(())
}

#[test]
fn types_show_prints_payload_fields_as_json() -> Result<()> {
    let stdout = run(&["types", "show", "reqflow.invitation"], &["--json"])?;
    let described: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!(described["type_id"], "reqflow.invitation");
    assert_eq!(described["payload"]["role"]["required"], true);
    assert_eq!(described["statuses"]["open"], true);
    assert_eq!(described["statuses"]["accepted"], false);
    Ok(())
}

#[test]
fn token_issue_uses_configured_secret() -> Result<()> {
    let temp = tempdir()?;
    let config_path = temp.path().join("config.toml");
    let mut config = reqflow::config::Config::default();
    config.data_dir = temp.path().join("data");
    config.save(&config_path)?;

    let mut cmd = Command::cargo_bin("reqflow")?;
    cmd.arg("--config")
        .arg(&config_path)
        .args(["token", "issue", "--subject", "7", "--grant", "read", "--json"]);
    let output = cmd.output()?;
    assert!(output.status.success(), "token issue failed: {output:?}");
    let issued: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    let manager = reqflow::token::TokenManager::new(config.token_manager_config()?)?;
    let token = issued["token"].as_str().context("token missing from output")?;
    let claims = manager.verify(token)?;
    assert_eq!(claims.sub, "7");
    assert_eq!(claims.grants, vec!["read".to_string()]);
    Ok(())
}

fn run(path: &[&str], extra: &[&str]) -> Result<String> {
    let temp_log = tempdir()?;
    let mut cmd = Command::cargo_bin("reqflow")?;
    cmd.args(path);
    cmd.args(extra);
    cmd.env("REQFLOW_LOG_DIR", temp_log.path());
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "reqflow {:?} {:?} exited with {}: {}",
            path,
            extra,
            output.status,
            stderr
        );
    }
    let stdout = String::from_utf8(output.stdout)?.replace("\r\n", "\n");
    Ok(stdout)
}

fn indent_output(output: &str) -> String {
    let mut indented = String::new();
    for line in output.lines() {
        let _ = writeln!(&mut indented, "    {}", line);
    }
    indented
}
