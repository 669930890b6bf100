//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("scanflash");
    cmd.env_remove("SCANFLASH_PORT")
        .env_remove("SCANFLASH_BAUD")
        .env_remove("RUST_LOG");
    cmd
}

/// Write a hex image of `len` bytes and return its path.
fn hex_image(dir: &Path, len: usize) -> std::path::PathBuf {
    let path = dir.join("keyscanner.hex");
    let text: String = (0..len)
        .map(|i| format!("{:02x}", i % 256))
        .collect();
    fs::write(&path, text + "\n").expect("write image");
    path
}

/// Write an empty config file so no user configuration leaks in.
fn empty_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("empty.toml");
    fs::write(&path, "").expect("write config");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scanflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scanflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn upgrade_help_lists_options() {
    let mut cmd = cli_cmd();
    cmd.args(["upgrade", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--side"))
        .stdout(predicate::str::contains("--strict-acks"))
        .stdout(predicate::str::contains("--button-window"));
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("scanflash"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_image_argument() {
    let mut cmd = cli_cmd();
    cmd.arg("upgrade")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("IMAGE"));
}

#[test]
fn exit_code_two_for_invalid_side() {
    let mut cmd = cli_cmd();
    cmd.args(["upgrade", "fw.hex", "--side", "middle"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_when_no_port_is_configured() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 600);
    let config = empty_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("--non-interactive")
        .arg("upgrade")
        .arg(&image)
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("no serial port"));
}

/// Exit code 1: runtime failure
#[test]
fn exit_code_one_for_missing_image_file() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["--port", "/dev/scanflash-test-none", "upgrade", "--yes"])
        .arg(dir.path().join("missing.hex"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to load image"));
}

#[test]
fn exit_code_one_for_malformed_hex() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("bad.hex");
    fs::write(&image, "00zz\n").expect("write image");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("offset 2"));
}

#[test]
fn exit_code_one_when_port_cannot_be_opened() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 16);
    let config = empty_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["--port", "/dev/scanflash-test-none", "upgrade", "--yes"])
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to open"));
}

// ============================================================================
// info
// ============================================================================

#[test]
fn info_json_describes_chunk_layout() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 600);
    let config = empty_config(dir.path());

    let output = cli_cmd()
        .arg("--config")
        .arg(&config)
        .arg("info")
        .arg("--json")
        .arg(&image)
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be a single JSON document");
    assert_eq!(value["ok"], true);
    assert_eq!(value["data"]["size"], 600);
    assert_eq!(value["data"]["chunk_size"], 256);
    assert_eq!(value["data"]["chunks"], 3);
    assert_eq!(value["data"]["first_address"], 0x5000);
    assert_eq!(value["data"]["last_address"], 0x5200);
    assert!(value["data"]["seal"].is_object());
}

#[test]
fn info_json_honours_flash_start() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 300);

    let output = cli_cmd()
        .arg("info")
        .arg("--json")
        .args(["--flash-start", "0x6000"])
        .arg(&image)
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(value["data"]["first_address"], 0x6000);
    assert_eq!(value["data"]["last_address"], 0x6100);
}

#[test]
fn info_uses_local_config_file() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 16);
    fs::write(
        dir.path().join("scanflash.toml"),
        "[device]\nflash_start = 32768\n",
    )
    .expect("write config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("info")
        .arg("--json")
        .arg(&image)
        .output()
        .expect("command should execute");

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(value["data"]["first_address"], 32768);
}

#[test]
fn invalid_config_warns_but_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 16);
    fs::write(dir.path().join("scanflash.toml"), "invalid toml [[[").expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .arg("info")
        .arg(&image)
        .assert()
        .success()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.hex");

    cli_cmd()
        .arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn info_rejects_empty_image() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("empty.bin");
    fs::write(&image, b"").expect("write image");

    cli_cmd()
        .arg("info")
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn info_text_goes_to_stderr_without_colors_when_not_tty() {
    let dir = tempdir().expect("tempdir should be created");
    let image = hex_image(dir.path(), 600);

    let output = cli_cmd()
        .arg("info")
        .arg(&image)
        .output()
        .expect("command should execute");
    assert!(output.status.success());
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("600 bytes"));
    assert!(stderr.contains("0x00005000"));
    assert!(!stderr.contains('\u{1b}'), "no ANSI escapes expected");
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("SCANFLASH_NON_INTERACTIVE", "true")
        .args(["completions", "zsh"])
        .assert()
        .success();
}
