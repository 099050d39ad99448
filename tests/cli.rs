mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

#[test]
fn help_lists_both_commands() {
    let mut cmd = Command::cargo_bin("code-bundle").expect("Binary exists");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve").and(predicate::str::contains("bundle")));
}

#[test]
fn bundle_with_missing_config_fails() {
    let mut cmd = Command::cargo_bin("code-bundle").expect("Binary exists");
    cmd.args([
        "bundle",
        "--config",
        "/nonexistent/code-bundle.yaml",
        "--archive",
        "upload.zip",
        "--team",
        "team",
        "--out",
        "team.pdf",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to read config file"));
}

/// Runs `bundle` end to end, with a stand-in for wkhtmltopdf that prints a fixed PDF.
#[cfg(unix)]
#[test]
fn bundle_writes_the_merged_pdf() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let rendered = dir.path().join("rendered.pdf");
    write(&rendered, common::one_page_pdf(595)).unwrap();
    let fake_renderer = dir.path().join("fake-wkhtmltopdf");
    write(
        &fake_renderer,
        format!("#!/bin/sh\ncat > /dev/null\ncat '{}'\n", rendered.display()),
    )
    .unwrap();
    std::fs::set_permissions(&fake_renderer, std::fs::Permissions::from_mode(0o755)).unwrap();

    let attachment = common::one_page_pdf(420);
    let archive = dir.path().join("upload.zip");
    write(
        &archive,
        common::zip_bytes(&[
            ("src/Main.java", "class Main {}".as_bytes()),
            ("brief.pdf", attachment.as_slice()),
        ]),
    )
    .unwrap();

    let config = NamedTempFile::new().unwrap();
    write(
        config.path(),
        format!(
            "storage:\n  storage_root: {}\nrender:\n  backend: wkhtmltopdf\n  wkhtmltopdf: {}\n",
            dir.path().join("storage").display(),
            fake_renderer.display()
        ),
    )
    .unwrap();

    let out = dir.path().join("Team Rocket.pdf");
    let mut cmd = Command::cargo_bin("code-bundle").expect("Binary exists");
    cmd.arg("bundle")
        .arg("--config")
        .arg(config.path())
        .arg("--archive")
        .arg(&archive)
        .arg("--team")
        .arg("Team Rocket")
        .arg("--out")
        .arg(&out)
        .env_remove("DRIVE_KEY_FILE")
        .env_remove("DRIVE_FOLDER_ID");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Bundle complete"));

    let pdf = std::fs::read(&out).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert_eq!(common::page_count(&pdf), 2);
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use code_bundle::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Bundle {
            config: std::path::PathBuf::from("dummy.yaml"),
            archive: std::path::PathBuf::from("dummy.zip"),
            team: "team".to_string(),
            out: std::path::PathBuf::from("dummy.pdf"),
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
