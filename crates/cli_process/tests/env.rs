use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cli_process::{login_shell_path, EnvResolver, PATH_ENV_VAR};

fn fake_shell(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-shell");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake shell");
    let mut permissions = fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("chmod");
    path
}

#[test]
fn resolved_path_replaces_only_path_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shell = fake_shell(dir.path(), "echo 'Welcome banner'\necho /opt/fake/bin:/usr/bin");

    let env = EnvResolver::with_shell(&shell).resolve();

    assert_eq!(env.get(PATH_ENV_VAR).map(String::as_str), Some("/opt/fake/bin:/usr/bin"));
    if let Ok(home) = std::env::var("HOME") {
        assert_eq!(env.get("HOME"), Some(&home));
    }
}

#[test]
fn failing_shell_keeps_inherited_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shell = fake_shell(dir.path(), "echo /should/not/apply\nexit 3");

    let env = EnvResolver::with_shell(&shell).resolve();
    assert_eq!(env.get(PATH_ENV_VAR).cloned(), std::env::var(PATH_ENV_VAR).ok());
}

#[test]
fn missing_shell_keeps_inherited_path() {
    let env = EnvResolver::with_shell("/nonexistent/bin/zsh").resolve();
    assert_eq!(env.get(PATH_ENV_VAR).cloned(), std::env::var(PATH_ENV_VAR).ok());
}

#[test]
fn hanging_shell_is_abandoned_after_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shell = fake_shell(dir.path(), "exec sleep 30");

    let started = Instant::now();
    let env = EnvResolver::with_shell(&shell)
        .with_timeout(Duration::from_millis(200))
        .resolve();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(env.get(PATH_ENV_VAR).cloned(), std::env::var(PATH_ENV_VAR).ok());
}

#[test]
fn empty_output_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shell = fake_shell(dir.path(), "echo");

    let error = login_shell_path(&shell, Duration::from_secs(5)).expect_err("empty PATH");
    assert!(error.to_string().contains("empty PATH"));
}

#[test]
fn large_login_banner_does_not_stall_resolution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shell = fake_shell(dir.path(), "yes 'welcome to the login banner' | head -n 20000\necho /opt/fake/bin");

    let started = Instant::now();
    let path = login_shell_path(&shell, Duration::from_secs(5)).expect("PATH resolved");

    assert_eq!(path, "/opt/fake/bin");
    assert!(started.elapsed() < Duration::from_secs(4));
}
