// tests/test_cli.rs
//! Binary-level tests driving the CLI end to end.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn estatesync() -> Command {
    Command::cargo_bin("estatesync").unwrap()
}

#[test]
fn help_lists_the_subcommands() {
    estatesync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("kill"));
}

#[test]
fn generate_config_emits_parseable_toml() {
    let output = estatesync()
        .arg("--generate-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("state_dir"))
        .stdout(predicate::str::contains("[budgets]"))
        .get_output()
        .clone();
    let text = String::from_utf8(output.stdout).unwrap();
    toml::from_str::<toml::Value>(&text).unwrap();
}

#[test]
fn missing_mapping_table_fails_with_usage_code() {
    estatesync()
        .env("ESTATESYNC_MAPPING_TABLE", "/nonexistent/mapping.csv")
        .args(["status", "/tmp/feed.xml"])
        .assert()
        .failure()
        .code(64)
        .stderr(predicate::str::contains("Failed to create service container"));
}

struct Env {
    _root: TempDir,
    state_dir: PathBuf,
    media_dir: PathBuf,
    mapping: PathBuf,
    feed: PathBuf,
}

fn environment() -> Env {
    let root = tempfile::tempdir().unwrap();
    let state_dir = root.path().join("state");
    let media_dir = root.path().join("media");
    let feed_dir = root.path().join("acme");
    fs::create_dir_all(&feed_dir).unwrap();

    let mapping = root.path().join("mapping.csv");
    fs::write(
        &mapping,
        "kind,source,destination,transform,transform_args,title:en,parent:en\n\
         field,texts->name,title,,,,\n\
         field,geo->postcode,postcode,,,,\n",
    )
    .unwrap();

    let photo = root.path().join("photo.jpg");
    fs::write(&photo, b"not really a jpeg").unwrap();

    let feed = feed_dir.join("feed.xml");
    fs::write(
        &feed,
        format!(
            r#"<feed scope="full"><provider><name>Acme</name>
                <property action="CHANGE">
                    <id>CLI-1</id>
                    <lang>en</lang>
                    <lastmod>2024-01-01</lastmod>
                    <texts><name>Loft with a view</name></texts>
                    <geo><postcode>81667</postcode></geo>
                    <attachments>
                        <attachment><path>{}</path><size>17</size></attachment>
                    </attachments>
                </property>
            </provider></feed>"#,
            photo.display()
        ),
    )
    .unwrap();

    Env {
        _root: root,
        state_dir,
        media_dir,
        mapping,
        feed,
    }
}

fn configured(env: &Env) -> Command {
    let mut cmd = estatesync();
    cmd.env("ESTATESYNC_STATE_DIR", &env.state_dir)
        .env("ESTATESYNC_MEDIA_DIR", &env.media_dir)
        .env("ESTATESYNC_MAPPING_TABLE", &env.mapping);
    cmd
}

#[test]
fn import_runs_to_completion_and_clears_its_state() {
    let env = environment();

    configured(&env)
        .args(["import", env.feed.to_str().unwrap(), "--follow"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Import completed"))
        .stderr(predicate::str::contains("1 inserted"));

    // The destination holds the record, the media dir the attachment.
    let content = fs::read_to_string(env.state_dir.join("content.json")).unwrap();
    assert!(content.contains("CLI-1"));
    assert!(content.contains("Loft with a view"));
    assert!(fs::read_dir(&env.media_dir).unwrap().count() >= 1);

    configured(&env)
        .args(["status", env.feed.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("No import job in flight"));

    // A second pass finds nothing to do.
    configured(&env)
        .args(["import", env.feed.to_str().unwrap(), "--follow"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 skipped"));
}

#[test]
fn engaged_kill_switch_blocks_imports() {
    let env = environment();

    configured(&env)
        .args(["kill", "-m", "5"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Kill switch engaged"));

    configured(&env)
        .args(["import", env.feed.to_str().unwrap()])
        .assert()
        .failure()
        .code(70);

    configured(&env)
        .args(["kill", "--clear"])
        .assert()
        .success();

    configured(&env)
        .args(["import", env.feed.to_str().unwrap(), "--follow"])
        .assert()
        .success();
}

#[test]
fn reset_discards_a_running_job() {
    let env = environment();

    // Without --follow the first invocation yields and prints the token.
    configured(&env)
        .args(["import", env.feed.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("Resume with:"));

    configured(&env)
        .args(["status", env.feed.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("token:"));

    configured(&env)
        .args(["reset", env.feed.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("Import state discarded"));
}

#[test]
fn resume_with_wrong_token_is_rejected() {
    let env = environment();

    configured(&env)
        .args(["import", env.feed.to_str().unwrap()])
        .assert()
        .success();

    configured(&env)
        .args(["resume", env.feed.to_str().unwrap(), "bogus-token"])
        .assert()
        .failure();
}
