//! Negotiation edge cases beyond the happy paths.

mod common;

use synapse_core::negotiation::NegotiationStatus;
use synapse_core::wire::{CounterOfferMsg, OfferDecision, OfferDecisionMsg, WorkerCounterMsg};
use synapse_core::{ExchangeConfig, JobStatus, Terms};

use common::{agent, exchange, exchange_with, place_bid, post_job};

fn terms() -> Terms {
    Terms {
        upfront_pct: 0.0,
        deadline_seconds: 8.0,
        max_revisions: 1,
    }
}

#[tokio::test]
async fn test_single_active_negotiation_per_job() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let first = agent(&exchange, "first");
    let second = agent(&exchange, "second");

    let job_id = post_job(&exchange, &requester, 100);
    place_bid(&exchange, &first, &job_id, 80, None);
    place_bid(&exchange, &second, &job_id, 70, None);

    exchange
        .counter_offer(
            &requester,
            &CounterOfferMsg {
                job_id: job_id.clone(),
                worker_id: first.clone(),
                price: 60,
                terms: terms(),
                notes: None,
            },
        )
        .expect("open with first");

    let err = exchange
        .counter_offer(
            &requester,
            &CounterOfferMsg {
                job_id: job_id.clone(),
                worker_id: second.clone(),
                price: 55,
                terms: terms(),
                notes: None,
            },
        )
        .expect_err("second worker blocked while pending");
    assert_eq!(err.code(), "negotiation_in_progress");
}

#[tokio::test]
async fn test_rejection_frees_the_job_for_a_new_negotiation() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let first = agent(&exchange, "first");
    let second = agent(&exchange, "second");

    let job_id = post_job(&exchange, &requester, 100);
    place_bid(&exchange, &first, &job_id, 80, None);
    place_bid(&exchange, &second, &job_id, 70, None);

    exchange
        .counter_offer(
            &requester,
            &CounterOfferMsg {
                job_id: job_id.clone(),
                worker_id: first.clone(),
                price: 60,
                terms: terms(),
                notes: None,
            },
        )
        .expect("open with first");
    exchange
        .offer_decision(
            &first,
            &OfferDecisionMsg {
                job_id: job_id.clone(),
                decision: OfferDecision::Reject,
                notes: None,
            },
        )
        .expect("first rejects");

    // The concluded negotiation no longer blocks the second worker.
    exchange
        .counter_offer(
            &requester,
            &CounterOfferMsg {
                job_id: job_id.clone(),
                worker_id: second.clone(),
                price: 55,
                terms: terms(),
                notes: None,
            },
        )
        .expect("open with second");

    let job = exchange.job_of(&job_id).expect("job");
    let negotiation = job.payload.negotiation.expect("negotiation");
    assert_eq!(negotiation.worker_id, second);
    assert_eq!(negotiation.round, 1);
    assert_eq!(negotiation.status, NegotiationStatus::Pending);
}

#[tokio::test]
async fn test_only_the_target_worker_may_counter_or_decide() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let target = agent(&exchange, "target");
    let lurker = agent(&exchange, "lurker");

    let job_id = post_job(&exchange, &requester, 100);
    place_bid(&exchange, &target, &job_id, 80, None);
    place_bid(&exchange, &lurker, &job_id, 75, None);

    exchange
        .counter_offer(
            &requester,
            &CounterOfferMsg {
                job_id: job_id.clone(),
                worker_id: target.clone(),
                price: 60,
                terms: terms(),
                notes: None,
            },
        )
        .expect("open");

    let err = exchange
        .worker_counter(
            &lurker,
            &WorkerCounterMsg {
                job_id: job_id.clone(),
                price: 65,
                terms: terms(),
                notes: None,
            },
        )
        .expect_err("lurker cannot counter");
    assert_eq!(err.code(), "not_offer_target");

    let err = exchange
        .offer_decision(
            &lurker,
            &OfferDecisionMsg {
                job_id: job_id.clone(),
                decision: OfferDecision::Accept,
                notes: None,
            },
        )
        .expect_err("lurker cannot decide");
    assert_eq!(err.code(), "not_offer_target");
}

#[tokio::test]
async fn test_accept_failure_is_reported_to_the_worker_and_unwound() {
    // Small grants so a decoy contract can exhaust the requester's
    // spendable credits before the accept-time escrow lock.
    let config = ExchangeConfig {
        start_credits: 50,
        ..ExchangeConfig::default()
    };
    let exchange = exchange_with(config, None);
    let requester = agent(&exchange, "requester");
    let worker = agent(&exchange, "worker");

    let job_id = post_job(&exchange, &requester, 50);
    place_bid(&exchange, &worker, &job_id, 40, None);
    exchange
        .counter_offer(
            &requester,
            &CounterOfferMsg {
                job_id: job_id.clone(),
                worker_id: worker.clone(),
                price: 40,
                terms: terms(),
                notes: None,
            },
        )
        .expect("open");

    // Drain the requester's spendable credits with a second job so the
    // award-time escrow lock must fail.
    let second = post_job(&exchange, &requester, 50);
    let decoy = agent(&exchange, "decoy");
    place_bid(&exchange, &decoy, &second, 50, None);
    exchange
        .award_job(
            &requester,
            &synapse_core::wire::AwardMsg {
                job_id: second,
                worker_id: decoy,
            },
        )
        .expect("decoy award locks all credits");

    let err = exchange
        .offer_decision(
            &worker,
            &OfferDecisionMsg {
                job_id: job_id.clone(),
                decision: OfferDecision::Accept,
                notes: None,
            },
        )
        .expect_err("escrow lock fails at accept time");
    assert_eq!(err.code(), "insufficient_credits");

    // The staging was unwound: the job is still open, the negotiation
    // still pending, and no contract fields leaked.
    let job = exchange.job_of(&job_id).expect("job");
    assert_eq!(job.status, JobStatus::Open);
    assert!(job.payload.accepted_price.is_none());
    assert!(job.payload.accepted_terms.is_none());
    assert_eq!(
        job.payload.negotiation.expect("negotiation").status,
        NegotiationStatus::Pending
    );
}

#[tokio::test]
async fn test_worker_counter_requires_an_active_offer() {
    let exchange = exchange();
    let requester = agent(&exchange, "requester");
    let worker = agent(&exchange, "worker");

    let job_id = post_job(&exchange, &requester, 100);
    place_bid(&exchange, &worker, &job_id, 80, None);

    let err = exchange
        .worker_counter(
            &worker,
            &WorkerCounterMsg {
                job_id: job_id.clone(),
                price: 70,
                terms: terms(),
                notes: None,
            },
        )
        .expect_err("no offer yet");
    assert_eq!(err.code(), "no_active_offer");
}
