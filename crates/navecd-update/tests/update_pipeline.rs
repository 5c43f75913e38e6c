//! End-to-end update pipeline: a scheduled scan discovers a newer image
//! version and the updater commits the bump back to the working tree.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use navecd_registry::MockRegistryClient;
use navecd_update::{
    MockVcsRepository, ScheduleRequest, Scanner, UpdateInstruction, UpdateIntegration,
    UpdateScheduler, UpdateStrategy, UpdateTarget, Updater,
};

fn write_config(temp: &TempDir) {
    std::fs::create_dir_all(temp.path().join("apps")).unwrap();
    std::fs::write(
        temp.path().join("apps").join("app.cue"),
        "package apps\n\nimage: \"ghcr.io/org/app:1.0.0\"\n",
    )
    .unwrap();
}

fn registry_with_update() -> MockRegistryClient {
    let registry = MockRegistryClient::new();
    registry.put_tags("ghcr.io/org/app", &["0.9.0", "1.0.0", "1.2.0", "nightly"]);
    registry.put_image(
        "ghcr.io/org/app",
        "1.2.0",
        "application/vnd.oci.image.config.v1+json",
        "application/vnd.oci.image.layer.v1.tar+gzip",
        b"layer".to_vec(),
    );
    registry
}

#[tokio::test]
async fn scheduled_scan_commits_version_bump() {
    let temp = TempDir::new().unwrap();
    write_config(&temp);

    let repository = Arc::new(MockVcsRepository::new(temp.path()));
    let update_tx = Updater {
        repository: repository.clone(),
    }
    .listen();

    let scanner = Arc::new(Scanner {
        registry: Arc::new(registry_with_update()),
        http: reqwest::Client::new(),
        credentials: None,
    });
    let scheduler = UpdateScheduler::new(scanner, update_tx);

    let instruction = UpdateInstruction {
        strategy: UpdateStrategy::SemVer,
        constraint: "<2.0.0".to_string(),
        integration: UpdateIntegration::DirectPush,
        // Seconds-resolution so the job fires right away.
        schedule: "* * * * * *".to_string(),
        file: "apps/app.cue".to_string(),
        line: 3,
        target: UpdateTarget::Container {
            image: "ghcr.io/org/app:1.0.0".to_string(),
        },
        auth: None,
    };

    scheduler
        .schedule(ScheduleRequest {
            project_uid: "uid-1".to_string(),
            branch: "main".to_string(),
            instructions: vec![instruction],
        })
        .await;

    // Wait for the job to fire and the updater to drain the channel.
    let mut committed = false;
    for _ in 0..100 {
        if !repository.commits().is_empty() {
            committed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    scheduler.shutdown().await;

    assert!(committed, "the scheduled scan should produce a commit");
    let commits = repository.commits();
    assert_eq!(
        commits[0].message,
        "chore(update): bump ghcr.io/org/app to 1.2.0"
    );
    assert_eq!(commits[0].branch, "main");

    let rewritten = std::fs::read_to_string(temp.path().join("apps").join("app.cue")).unwrap();
    assert!(rewritten.contains("ghcr.io/org/app:1.2.0"));
}
