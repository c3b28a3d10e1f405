use dealdesk_agent::{
    JobError, JobOutcome, JobStatus, MediaKind, OrchestratorOptions, StatusLevel, StatusSink,
    TaskOrchestrator,
};
use dealdesk_sdk::{
    sdk_test::MockTaskApi,
    task::{DownloadedFile, FileDescriptor, JobSnapshot, TaskNode},
    TaskApiError,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn orchestrator(api: &Arc<MockTaskApi>, max_attempts: u32) -> TaskOrchestrator {
    TaskOrchestrator::new(api.clone(), StatusSink::new()).with_options(OrchestratorOptions {
        poll_interval: Duration::ZERO,
        max_attempts,
    })
}

fn csv_file(id: &str, filename: &str) -> FileDescriptor {
    FileDescriptor {
        id: id.to_string(),
        filename: filename.to_string(),
        file_type: "csv".to_string(),
    }
}

fn downloaded(body: &str) -> DownloadedFile {
    DownloadedFile {
        bytes: body.as_bytes().to_vec(),
        content_type: Some("text/csv".to_string()),
    }
}

#[tokio::test]
async fn completed_job_carries_downloaded_artifacts() {
    let api = Arc::new(MockTaskApi::new());
    api.enqueue_accepted("e1")
        .enqueue_status(JobSnapshot::new("processing"))
        .enqueue_status(JobSnapshot::new("processing"))
        .enqueue_status(JobSnapshot::new("processing"))
        .enqueue_status(JobSnapshot::new("completed").with_files(vec![csv_file("f1", "out.csv")]))
        .enqueue_download(Ok(downloaded("name,revenue\nAcme,10\n")));

    let payload = json!({ "event_type": "get_company_targets", "data": { "name": "Acme" } });
    let outcome = orchestrator(&api, 60).run(payload.clone()).await;

    let JobOutcome::Completed(completed) = outcome else {
        panic!("expected a completed job");
    };
    assert_eq!(completed.attempts, 4);
    assert_eq!(completed.job.status, JobStatus::Completed);
    assert_eq!(completed.job.event_id.as_deref(), Some("e1"));
    assert_eq!(completed.job.payload, payload);
    assert_eq!(completed.job.artifacts.len(), 1);
    assert_eq!(completed.job.artifacts[0].filename, "out.csv");
    assert_eq!(completed.job.artifacts[0].media_kind, MediaKind::Csv);
    assert_eq!(completed.job.artifacts[0].bytes, b"name,revenue\nAcme,10\n");
    assert_eq!(completed.snapshot.files.len(), 1);
    assert!(completed.warnings.is_empty());

    assert_eq!(api.tracked_payloads(), vec![payload]);
    assert_eq!(api.tracked_status_checks().len(), 4);
    assert_eq!(api.tracked_downloads(), vec!["f1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn huge_poll_interval_reports_progress_without_overflow() {
    let api = Arc::new(MockTaskApi::new());
    api.enqueue_accepted("e9")
        .enqueue_status(JobSnapshot::new("processing"))
        .enqueue_status(JobSnapshot::new("completed"));

    let orchestrator = TaskOrchestrator::new(api.clone(), StatusSink::new()).with_options(
        OrchestratorOptions {
            poll_interval: Duration::from_secs(u64::MAX / 2),
            max_attempts: 60,
        },
    );
    let outcome = orchestrator.run(json!({})).await;

    assert_eq!(outcome.status(), JobStatus::Completed);
    assert_eq!(outcome.attempts(), 2);
    assert_eq!(api.tracked_status_checks().len(), 2);
}

#[tokio::test]
async fn rejected_submission_fails_without_polling() {
    let api = Arc::new(MockTaskApi::new());
    let details = r#"{"detail":[{"loc":["body","data","name"],"msg":"field required"}]}"#;
    api.enqueue_submit(Err(TaskApiError::Validation(details.to_string())));

    let orchestrator = orchestrator(&api, 60);
    let outcome = orchestrator.run(json!({ "event_type": "unknown" })).await;

    assert_eq!(outcome.status(), JobStatus::Failed);
    assert_eq!(outcome.attempts(), 0);
    let JobOutcome::Failed(failed) = outcome else {
        panic!("expected a failed job");
    };
    assert!(matches!(failed.error, JobError::Submission(ref e) if e.is_validation()));
    assert_eq!(failed.error.details(), Some(details));
    assert_eq!(failed.job.event_id, None);
    assert!(api.tracked_status_checks().is_empty());

    let status = orchestrator.status_sink().current().expect("status shown");
    assert_eq!(status.level, StatusLevel::Error);
}

#[tokio::test]
async fn job_times_out_after_the_attempt_budget() {
    let api = Arc::new(MockTaskApi::new());
    api.enqueue_accepted("e2")
        .enqueue_status_results((0..60).map(|_| Ok(JobSnapshot::new("processing"))));

    let outcome = orchestrator(&api, 60).run(json!({})).await;

    assert_eq!(outcome.status(), JobStatus::TimedOut);
    assert_eq!(outcome.attempts(), 60);
    assert!(outcome.job().artifacts.is_empty());
    assert_eq!(api.tracked_status_checks().len(), 60);
    assert!(api.tracked_downloads().is_empty());
}

#[tokio::test]
async fn transient_check_failures_and_unknown_statuses_keep_polling() {
    let api = Arc::new(MockTaskApi::new());
    api.enqueue_accepted("e3").enqueue_status_results(vec![
        Err(TaskApiError::Invariant("connection reset".to_string())),
        Ok(JobSnapshot::new("queued")),
        Ok(JobSnapshot::new("processing").with_nodes(vec![TaskNode {
            name: Some("Search".to_string()),
            status: Some("running".to_string()),
        }])),
        Ok(JobSnapshot::new("completed")),
    ]);

    let outcome = orchestrator(&api, 10).run(json!({})).await;

    assert_eq!(outcome.status(), JobStatus::Completed);
    assert_eq!(outcome.attempts(), 4);
    assert_eq!(outcome.warnings().len(), 2);
    assert!(outcome.warnings()[0].starts_with("Status check failed"));
    assert_eq!(outcome.warnings()[1], "Unexpected status: queued");
}

#[tokio::test]
async fn failed_download_is_skipped() {
    let api = Arc::new(MockTaskApi::new());
    api.enqueue_accepted("e4")
        .enqueue_status(JobSnapshot::new("completed").with_files(vec![
            csv_file("f1", "broken.csv"),
            csv_file("f2", "ok.csv"),
        ]))
        .enqueue_download(Err(TaskApiError::Invariant("gone".to_string())))
        .enqueue_download(Ok(downloaded("a,b\n")));

    let orchestrator = orchestrator(&api, 5);
    let outcome = orchestrator.run(json!({})).await;

    let JobOutcome::Completed(completed) = outcome else {
        panic!("expected a completed job");
    };
    assert_eq!(completed.job.artifacts.len(), 1);
    assert_eq!(completed.job.artifacts[0].id, "f2");
    assert_eq!(completed.warnings.len(), 1);
    assert!(completed.warnings[0].contains("broken.csv"));
    assert_eq!(api.tracked_downloads(), vec!["f1".to_string(), "f2".to_string()]);
    assert_eq!(orchestrator.status_sink().current(), None);
}

#[tokio::test]
async fn task_reported_failure_is_terminal() {
    let api = Arc::new(MockTaskApi::new());
    api.enqueue_accepted("e5")
        .enqueue_status(JobSnapshot::new("processing"))
        .enqueue_status(JobSnapshot::new("failed"));

    let outcome = orchestrator(&api, 60).run(json!({})).await;

    let JobOutcome::Failed(failed) = outcome else {
        panic!("expected a failed job");
    };
    assert_eq!(failed.attempts, 2);
    assert!(matches!(
        failed.error,
        JobError::Rejected { ref event_id, attempts: 2 } if event_id == "e5"
    ));
    assert_eq!(failed.error.details(), None);
    assert_eq!(api.tracked_status_checks().len(), 2);
}
