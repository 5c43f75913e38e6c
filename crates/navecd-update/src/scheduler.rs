//! Update scheduler
//!
//! One scheduler per process. Every project tick reconciles the
//! scheduler's job set against the project's current update instructions:
//! jobs of dropped instructions are removed, new instructions get jobs,
//! and jobs whose cron or task changed are replaced in place. Job identity
//! is `(target name, file, line)`; the project UID prefixes the job name.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, UpdateError};
use crate::instruction::UpdateInstruction;
use crate::scan::Scanner;
use crate::updater::AvailableUpdate;

/// Reconciliation request for one project's jobs.
pub struct ScheduleRequest {
    pub project_uid: String,

    /// Branch accepted updates are pushed to.
    pub branch: String,

    pub instructions: Vec<UpdateInstruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JobIdentity {
    file: String,
    line: usize,
}

struct Job {
    identity: JobIdentity,
    schedule: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Job {
    fn stop(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Cron-driven version scans, process-wide.
pub struct UpdateScheduler {
    scanner: Arc<Scanner>,
    update_tx: mpsc::Sender<AvailableUpdate>,
    jobs: Mutex<HashMap<String, Job>>,
    cancel: CancellationToken,
}

impl UpdateScheduler {
    pub fn new(scanner: Arc<Scanner>, update_tx: mpsc::Sender<AvailableUpdate>) -> Self {
        Self {
            scanner,
            update_tx,
            jobs: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Reconciles the job set for a project. Returns the total number of
    /// jobs after reconciliation.
    pub async fn schedule(&self, request: ScheduleRequest) -> usize {
        let prefix = format!("{}-", request.project_uid);
        let mut jobs = self.jobs.lock().await;

        // Remove jobs whose instruction is gone or moved.
        let stale: Vec<String> = jobs
            .iter()
            .filter(|(name, job)| {
                name.starts_with(&prefix)
                    && !request.instructions.iter().any(|instruction| {
                        instruction.is_scheduled()
                            && **name == job_name(&request.project_uid, instruction)
                            && job.identity == identity_of(instruction)
                    })
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in stale {
            if let Some(job) = jobs.remove(&name) {
                info!(job = %name, "Removing cron job");
                job.stop();
            }
        }

        for instruction in &request.instructions {
            if !instruction.is_scheduled() {
                continue;
            }

            let name = job_name(&request.project_uid, instruction);
            let identity = identity_of(instruction);

            if let Some(existing) = jobs.get(&name) {
                if existing.identity == identity && existing.schedule == instruction.schedule {
                    debug!(job = %name, "Cron job unchanged");
                    continue;
                }
                info!(job = %name, "Updating cron job");
                if let Some(previous) = jobs.remove(&name) {
                    previous.stop();
                }
            } else {
                info!(job = %name, schedule = %instruction.schedule, "Adding cron job");
            }

            match self.spawn_job(instruction.clone(), request.branch.clone()) {
                Ok(job) => {
                    jobs.insert(name, job);
                }
                Err(err) => {
                    error!(job = %name, error = %err, "Unable to upsert job");
                }
            }
        }

        jobs.len()
    }

    fn spawn_job(&self, instruction: UpdateInstruction, branch: String) -> Result<Job> {
        let schedule = parse_cron(&instruction.schedule)?;
        let cancel = self.cancel.child_token();
        let job_cancel = cancel.clone();
        let scanner = self.scanner.clone();
        let update_tx = self.update_tx.clone();
        let identity = identity_of(&instruction);
        let cron_expr = instruction.schedule.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let delay = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);

                tokio::select! {
                    _ = job_cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                scan_once(&scanner, &instruction, &branch, &update_tx).await;
            }
        });

        Ok(Job {
            identity,
            schedule: cron_expr,
            cancel,
            handle,
        })
    }

    /// Names of all jobs currently scheduled, sorted.
    pub async fn job_names(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops every job.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.stop();
        }
    }
}

async fn scan_once(
    scanner: &Scanner,
    instruction: &UpdateInstruction,
    branch: &str,
    update_tx: &mpsc::Sender<AvailableUpdate>,
) {
    let target = instruction.target.name();
    debug!(target = %target, "Scanning for version updates");

    match scanner.scan(instruction).await {
        Ok(Some(image_scan)) => {
            let update = AvailableUpdate {
                image_scan,
                integration: instruction.integration,
                file: instruction.file.clone(),
                line: instruction.line,
                target_name: target,
                branch: branch.to_string(),
            };
            if update_tx.send(update).await.is_err() {
                debug!("Update consumer is gone");
            }
        }
        Ok(None) => {}
        // Upstream unavailability never fails the job; the next firing
        // retries.
        Err(err) => error!(target = %target, error = %err, "Unable to scan for version updates"),
    }
}

fn job_name(project_uid: &str, instruction: &UpdateInstruction) -> String {
    format!("{project_uid}-{}", instruction.target.name())
}

fn identity_of(instruction: &UpdateInstruction) -> JobIdentity {
    JobIdentity {
        file: instruction.file.clone(),
        line: instruction.line,
    }
}

/// Parses a cron expression, accepting the classic 5-field form by
/// prepending a seconds field.
fn parse_cron(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|err| UpdateError::InvalidSchedule {
        schedule: expression.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{UpdateIntegration, UpdateStrategy, UpdateTarget};
    use navecd_registry::MockRegistryClient;

    fn scanner(registry: MockRegistryClient) -> Arc<Scanner> {
        Arc::new(Scanner {
            registry: Arc::new(registry),
            http: reqwest::Client::new(),
            credentials: None,
        })
    }

    fn instruction(image: &str, file: &str, line: usize, schedule: &str) -> UpdateInstruction {
        UpdateInstruction {
            strategy: UpdateStrategy::SemVer,
            constraint: String::new(),
            integration: UpdateIntegration::DirectPush,
            schedule: schedule.to_string(),
            file: file.to_string(),
            line,
            target: UpdateTarget::Container {
                image: image.to_string(),
            },
            auth: None,
        }
    }

    fn request(uid: &str, instructions: Vec<UpdateInstruction>) -> ScheduleRequest {
        ScheduleRequest {
            project_uid: uid.to_string(),
            branch: "main".to_string(),
            instructions,
        }
    }

    fn scheduler() -> (UpdateScheduler, mpsc::Receiver<AvailableUpdate>) {
        let (tx, rx) = mpsc::channel(16);
        (UpdateScheduler::new(scanner(MockRegistryClient::new()), tx), rx)
    }

    #[tokio::test]
    async fn test_schedule_adds_jobs() {
        let (scheduler, _rx) = scheduler();

        let count = scheduler
            .schedule(request(
                "uid-1",
                vec![
                    instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "0 * * * *"),
                    instruction("ghcr.io/org/db:2.0.0", "apps/db.cue", 7, "30 4 * * *"),
                ],
            ))
            .await;

        assert_eq!(count, 2);
        assert_eq!(
            scheduler.job_names().await,
            vec!["uid-1-ghcr.io/org/app", "uid-1-ghcr.io/org/db"]
        );
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let (scheduler, _rx) = scheduler();
        let instructions =
            vec![instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "0 * * * *")];

        scheduler
            .schedule(request("uid-1", instructions.clone()))
            .await;
        let before = scheduler.job_names().await;

        scheduler.schedule(request("uid-1", instructions)).await;
        let after = scheduler.job_names().await;

        assert_eq!(before, after);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_instruction_removes_job() {
        let (scheduler, _rx) = scheduler();
        scheduler
            .schedule(request(
                "uid-1",
                vec![
                    instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "0 * * * *"),
                    instruction("ghcr.io/org/db:2.0.0", "apps/db.cue", 7, "0 * * * *"),
                ],
            ))
            .await;

        let count = scheduler
            .schedule(request(
                "uid-1",
                vec![instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "0 * * * *")],
            ))
            .await;

        assert_eq!(count, 1);
        assert_eq!(scheduler.job_names().await, vec!["uid-1-ghcr.io/org/app"]);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_moved_instruction_is_replaced() {
        let (scheduler, _rx) = scheduler();
        scheduler
            .schedule(request(
                "uid-1",
                vec![instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "0 * * * *")],
            ))
            .await;

        // Same target, new file location: the old job is removed and a
        // fresh one added under the same name.
        let count = scheduler
            .schedule(request(
                "uid-1",
                vec![instruction("ghcr.io/org/app:1.0.0", "apps/moved.cue", 9, "0 * * * *")],
            ))
            .await;

        assert_eq!(count, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_projects_are_untouched() {
        let (scheduler, _rx) = scheduler();
        scheduler
            .schedule(request(
                "uid-1",
                vec![instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "0 * * * *")],
            ))
            .await;
        scheduler
            .schedule(request(
                "uid-2",
                vec![instruction("ghcr.io/org/db:1.0.0", "apps/db.cue", 4, "0 * * * *")],
            ))
            .await;

        // Reconciling uid-1 with nothing leaves uid-2 alone.
        let count = scheduler.schedule(request("uid-1", vec![])).await;
        assert_eq!(count, 1);
        assert_eq!(scheduler.job_names().await, vec!["uid-2-ghcr.io/org/db"]);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unscheduled_instruction_gets_no_job() {
        let (scheduler, _rx) = scheduler();
        let count = scheduler
            .schedule(request(
                "uid-1",
                vec![instruction("ghcr.io/org/app:1.0.0", "apps/app.cue", 3, "")],
            ))
            .await;

        assert_eq!(count, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_fired_job_emits_available_update() {
        let registry = MockRegistryClient::new();
        registry.put_tags("ghcr.io/org/app", &["1.0.0", "1.2.0"]);
        registry.put_image(
            "ghcr.io/org/app",
            "1.2.0",
            "application/vnd.oci.image.config.v1+json",
            "application/vnd.oci.image.layer.v1.tar+gzip",
            b"layer".to_vec(),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = UpdateScheduler::new(scanner(registry), tx);

        // Seconds-resolution schedule so the job fires immediately.
        scheduler
            .schedule(request(
                "uid-1",
                vec![instruction(
                    "ghcr.io/org/app:1.0.0",
                    "apps/app.cue",
                    3,
                    "* * * * * *",
                )],
            ))
            .await;

        let update = tokio::time::timeout(std::time::Duration::from_secs(3), rx.recv())
            .await
            .expect("job should fire within the timeout")
            .expect("channel open");

        assert_eq!(update.image_scan.new_version, "1.2.0");
        assert_eq!(update.target_name, "ghcr.io/org/app");
        scheduler.shutdown().await;
    }

    #[test]
    fn test_parse_cron_five_fields() {
        assert!(parse_cron("0 * * * *").is_ok());
        assert!(parse_cron("*/5 2 * * 1").is_ok());
    }

    #[test]
    fn test_parse_cron_with_seconds() {
        assert!(parse_cron("*/10 * * * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(matches!(
            parse_cron("not a cron"),
            Err(UpdateError::InvalidSchedule { .. })
        ));
    }
}
