//! CLI integration tests for spadock admin commands.
//!
//! Each test uses an isolated temp directory for the database, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::Path;

use assert_cmd::Command;
use assert_fs::TempDir;
use predicates::prelude::*;
use serde_json::Value;
use spadock::store::{SqliteStore, Store};

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn data_dir_str(&self) -> String {
        self.data_dir().to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("spadock").expect("failed to find binary");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args([
                "admin",
                "init",
                "--data-dir",
                &self.data_dir_str(),
                "--non-interactive",
            ])
            .assert()
    }

    fn admin(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        let data_dir = self.data_dir_str();
        let mut full = vec!["admin"];
        full.extend_from_slice(args);
        full.extend_from_slice(&["--data-dir", &data_dir]);
        self.cmd().args(&full).assert()
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.admin(args).success().get_output().stdout.clone();
        serde_json::from_slice(&output).expect("failed to parse JSON")
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::new(self.data_dir().join("spadock.db")).expect("open store")
    }
}

#[test]
fn test_init_creates_database_tenant_and_token() {
    let ctx = TestContext::new();
    ctx.init()
        .success()
        .stdout(predicate::str::contains("Admin token"))
        .stdout(predicate::str::contains("spadock_"));

    let token = std::fs::read_to_string(ctx.data_dir().join(".admin_token")).unwrap();
    assert!(token.trim().starts_with("spadock_"));
    assert!(ctx.data_dir().join("settings.toml").is_file());

    let store = ctx.store();
    assert!(store.has_admin_token().unwrap());
    assert!(store.get_tenant_by_name("default").unwrap().is_some());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(ctx.data_dir().join(".admin_token"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn test_init_twice_fails() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.init()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn test_commands_before_init_fail() {
    let ctx = TestContext::new();
    ctx.admin(&["info"])
        .failure()
        .stderr(predicate::str::contains("spadock admin init"));
}

#[test]
fn test_info_json() {
    let ctx = TestContext::new();
    ctx.init().success();

    let info = ctx.json(&["info", "--json"]);
    assert_eq!(info["tenants"], 1);
    assert_eq!(info["tokens"], 1);
    assert_eq!(info["admin_tokens"], 1);
    assert_eq!(info["projects"], 0);
    assert_eq!(info["tenants_detail"][0]["name"], "default");
}

#[test]
fn test_info_text() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.admin(&["info"])
        .success()
        .stdout(predicate::str::contains("Spadock Server Status"))
        .stdout(predicate::str::contains("Tenants:   1"));
}

#[test]
fn test_tenant_add_and_list() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.admin(&["tenant", "add", "acme", "--create-token"])
        .success()
        .stdout(predicate::str::contains("Tenant 'acme' created"))
        .stdout(predicate::str::contains("Token: spadock_"));

    let tenants = ctx.json(&["tenant", "list", "--json"]);
    let names: Vec<&str> = tenants
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"acme"));
    assert!(names.contains(&"default"));
}

#[test]
fn test_tenant_add_rejects_duplicates_and_bad_names() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.admin(&["tenant", "add", "acme"]).success();
    ctx.admin(&["tenant", "add", "acme"])
        .failure()
        .stderr(predicate::str::contains("already exists"));
    ctx.admin(&["tenant", "add", "Bad Name"]).failure();
}

#[test]
fn test_token_create_for_tenant() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.admin(&["token", "create", "--tenant", "default"])
        .success()
        .stdout(predicate::str::contains("Token created for tenant 'default'"));

    let tokens = ctx.json(&["token", "list", "--json"]);
    let tokens = tokens.as_array().unwrap();
    assert_eq!(tokens.len(), 2);
    let scoped = tokens.iter().find(|t| t["is_admin"] == false).unwrap();
    assert_eq!(scoped["tenant"], "default");
}

#[test]
fn test_token_create_unknown_tenant_fails() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.admin(&["token", "create", "--tenant", "nobody"])
        .failure()
        .stderr(predicate::str::contains("Tenant not found"));
}

#[test]
fn test_token_revoke() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.admin(&["token", "create", "--tenant", "default"]).success();

    let tokens = ctx.json(&["token", "list", "--json"]);
    let tokens = tokens.as_array().unwrap();
    let scoped_id = tokens
        .iter()
        .find(|t| t["is_admin"] == false)
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    let admin_id = tokens
        .iter()
        .find(|t| t["is_admin"] == true)
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    ctx.admin(&["token", "revoke", &scoped_id, "--yes"])
        .success()
        .stdout(predicate::str::contains("Token revoked"));
    ctx.admin(&["token", "revoke", &admin_id, "--yes"])
        .failure()
        .stderr(predicate::str::contains("last admin token"));

    let tokens = ctx.json(&["token", "list", "--json"]);
    assert_eq!(tokens.as_array().unwrap().len(), 1);
}

#[test]
fn test_project_commands_require_token() {
    let ctx = TestContext::new();
    ctx.cmd()
        .env_remove("SPADOCK_TOKEN")
        .args(["project", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--token"));
}

#[test]
fn test_project_upload_missing_archive() {
    let ctx = TestContext::new();
    let missing = ctx.data_dir().join("missing.zip");
    ctx.cmd()
        .args(["project", "upload", "--token", "spadock_x_y", "--slug", "demo"])
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Archive not found"));
}
