//! System control API: the in-process entry point for ingress
//! adapters shares every invariant with the wire paths.

mod common;

use std::time::Duration;

use synapse_core::{AgentId, JobStatus};

use common::{agent, exchange};

#[tokio::test]
async fn test_ensure_account_is_idempotent_and_allows_zero_grant() {
    let exchange = exchange();
    let synthetic = AgentId::from_string("agent_github_ingress");

    let credits = exchange.system_ensure_account(&synthetic, "github-ingress", None, Some(0));
    assert_eq!(credits, 0);

    // A second call with a different grant changes nothing.
    let credits = exchange.system_ensure_account(&synthetic, "github-ingress", None, Some(500));
    assert_eq!(credits, 0);
    assert_eq!(
        exchange.account_of(&synthetic).expect("account").credits,
        0
    );
}

#[tokio::test]
async fn test_system_contract_lifecycle() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let worker = agent(&exchange, "worker");

    let job_id = exchange
        .system_create_job(&requester, "triage issue", None, 30, "github", None)
        .expect("create");
    // System awards do not require a bid on the book.
    exchange
        .system_award_job(&job_id, &worker)
        .expect("award");
    assert!(exchange.deadline_armed(&job_id));

    exchange
        .system_complete_job(&job_id, &worker, Some("merged".into()))
        .expect("complete from awarded");

    let job = exchange.job_of(&job_id).expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.payload.last_submission.expect("submission").result,
        "merged"
    );
    assert!(!exchange.deadline_armed(&job_id));

    let requester_account = exchange.account_of(&requester).expect("account");
    let worker_account = exchange.account_of(&worker).expect("account");
    assert_eq!(requester_account.credits, 970);
    assert_eq!(worker_account.credits, 1030);
    assert_eq!(requester_account.locked, 0);
    assert_eq!(worker_account.locked, 0);
}

#[tokio::test]
async fn test_system_fail_then_reopen() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let worker = agent(&exchange, "worker");

    let job_id = exchange
        .system_create_job(&requester, "fix ci", None, 100, "github", None)
        .expect("create");
    exchange.system_award_job(&job_id, &worker).expect("award");
    exchange
        .system_fail_job(&job_id, &worker, "checks_failed")
        .expect("fail");

    let job = exchange.job_of(&job_id).expect("job");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(exchange.reputation_of(&worker).expect("rep").failed, 1);

    exchange.system_reopen_job(&job_id).expect("reopen");
    let job = exchange.job_of(&job_id).expect("job");
    assert_eq!(job.status, JobStatus::Open);
    assert!(job.worker_id.is_none());

    // All reservations are unwound.
    assert_eq!(exchange.account_of(&requester).expect("account").locked, 0);
    assert_eq!(exchange.account_of(&worker).expect("account").locked, 0);
    assert_eq!(exchange.total_credits(), 2000);
}

#[tokio::test]
async fn test_reopen_on_terminal_job_is_a_no_op() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let worker = agent(&exchange, "worker");

    let job_id = exchange
        .system_create_job(&requester, "done deal", None, 10, "simple", None)
        .expect("create");
    exchange.system_award_job(&job_id, &worker).expect("award");
    exchange
        .system_complete_job(&job_id, &worker, None)
        .expect("complete");

    let before = exchange.job_of(&job_id).expect("job");
    exchange.system_reopen_job(&job_id).expect("no-op reopen");
    let after = exchange.job_of(&job_id).expect("job");

    // Status closure: a completed job's ledger-affecting fields never
    // change again.
    assert_eq!(before, after);
    assert_eq!(after.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_system_add_evidence_requires_the_job() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let job_id = exchange
        .system_create_job(&requester, "audit me", None, 10, "simple", None)
        .expect("create");

    exchange
        .system_add_evidence(&job_id, "ingress", "webhook received", None)
        .expect("attach evidence");
    assert!(exchange
        .evidence_of(&job_id)
        .iter()
        .any(|item| item.kind == "ingress"));

    let missing = synapse_core::JobId::from_string("job_missing");
    let err = exchange
        .system_add_evidence(&missing, "ingress", "orphan", None)
        .expect_err("unknown job");
    assert_eq!(err.code(), "job_not_found");
}

#[tokio::test]
async fn test_demo_timeout_seeds_and_expires() {
    let exchange = exchange();
    let job_id = exchange.demo_timeout().expect("seed demo");

    let job = exchange.job_of(&job_id).expect("job");
    assert_eq!(job.status, JobStatus::Awarded);
    assert!(exchange.deadline_armed(&job_id));

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let job = exchange.job_of(&job_id).expect("job");
    assert_eq!(job.status, JobStatus::Open);
    assert!(exchange
        .evidence_of(&job_id)
        .iter()
        .any(|item| item.kind == "settlement"));
}
