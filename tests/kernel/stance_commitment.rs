use std::sync::Arc;

use chrono::Utc;

use iris_kernel::ErrorCode;
use iris_kernel::config::GatesConfig;
use iris_kernel::core::commitment::CommitmentStatus;
use iris_kernel::core::gates::{GateContext, GateController, GateKind};
use iris_kernel::core::memory::{EpisodeQuery, episode_types};
use iris_kernel::core::stance::{Stance, StanceMachine};
use iris_kernel::observability::{KernelEvent, NoopSink};

use super::kernel_harness::{harness, raising};

#[tokio::test]
async fn stance_walk_follows_the_gates() {
    let mut h = harness();
    h.kernel.begin_turn(&mut h.session).await.unwrap();
    assert_eq!(h.session.stance(), Stance::Sensemaking);

    h.kernel
        .request_stance(&mut h.session, Stance::Discovery, "framed as a caching problem")
        .await
        .unwrap();

    let err = h
        .kernel
        .request_stance(&mut h.session, Stance::Execution, "start building")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GateDenied);
    assert_eq!(h.session.stance(), Stance::Discovery);

    let turn = raising("p1", 5, 0.1, Utc::now());
    let signals = h.kernel.derive_signals(&turn).await;
    h.kernel
        .arbitrate(&mut h.session, &turn, &signals)
        .await
        .unwrap();
    let record = h
        .kernel
        .request_stance(&mut h.session, Stance::Execution, "start building")
        .await
        .unwrap();
    assert_eq!(record.gate, GateKind::Commitment);

    let err = h
        .kernel
        .request_stance(&mut h.session, Stance::Sensemaking, "second thoughts")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GateDenied);

    h.kernel
        .request_stance(&mut h.session, Stance::Evaluation, "acceptance tests pass")
        .await
        .unwrap();
    let err = h
        .kernel
        .request_stance(&mut h.session, Stance::Evaluation, "again")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::StanceViolation);

    let audited = h
        .kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            entry_type: Some(episode_types::STANCE_TRANSITION.into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(audited.len(), 6);
    assert_eq!(
        audited
            .iter()
            .filter(|e| e.payload["success"] == serde_json::json!(true))
            .count(),
        3
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_never_see_a_reverted_stance() {
    let h = harness();
    let machine = Arc::new(StanceMachine::new(
        Arc::clone(h.kernel.bus()),
        Arc::new(NoopSink),
    ));

    let mut readers = Vec::new();
    for _ in 0..8 {
        let machine = Arc::clone(&machine);
        readers.push(tokio::spawn(async move {
            let mut seen_discovery = false;
            for _ in 0..200 {
                let stance = machine.current();
                match stance {
                    Stance::Discovery => seen_discovery = true,
                    Stance::Sensemaking => assert!(!seen_discovery, "stance reverted"),
                    other => panic!("unexpected stance {other}"),
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut gates = GateController::new(GatesConfig::default(), Arc::new(NoopSink));
    let token = gates
        .authorize(
            GateKind::Framing,
            &GateContext::at_turn(1).with_reason("reframe"),
        )
        .unwrap();
    machine
        .transition(Stance::Discovery, "reframe", Some(token))
        .await
        .unwrap();

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(machine.current(), Stance::Discovery);
}

#[tokio::test]
async fn commitments_expire_on_turn_boundaries() {
    let mut h = harness();
    h.kernel.begin_turn(&mut h.session).await.unwrap();
    h.kernel
        .register_problem(&mut h.session, "p1", "parser", 5)
        .unwrap();
    let commitment = h
        .kernel
        .create_commitment(&mut h.session, "p1", "ship the parser", Some(2))
        .await
        .unwrap();

    let start = h.kernel.begin_turn(&mut h.session).await.unwrap();
    assert_eq!(start.turn, 2);
    assert!(start.expired.is_empty());

    let start = h.kernel.begin_turn(&mut h.session).await.unwrap();
    assert_eq!(start.expired.len(), 1);
    assert_eq!(start.expired[0].id, commitment.id);
    assert_eq!(start.expired[0].status, CommitmentStatus::Expired);
    assert!(h.session.commitments().active_for("p1").is_none());

    let expired = h
        .kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            entry_type: Some(episode_types::COMMITMENT_EXPIRED.into()),
            problem_id: Some("p1".into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(
        h.sink.count_where(|e| matches!(
            e,
            KernelEvent::CommitmentLifecycle {
                status: CommitmentStatus::Expired,
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn commitment_rules_are_enforced_by_the_gate() {
    let mut h = harness();
    h.kernel
        .register_problem(&mut h.session, "p1", "parser", 5)
        .unwrap();

    let err = h
        .kernel
        .create_commitment(&mut h.session, "p1", "forever", Some(500))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GateDenied);

    let first = h
        .kernel
        .create_commitment(&mut h.session, "p1", "a", None)
        .await
        .unwrap();
    assert_eq!(first.total_turns, 10);
    let err = h
        .kernel
        .create_commitment(&mut h.session, "p1", "b", Some(3))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConflictDetected);

    let renewed = h.kernel.renew_commitment(&mut h.session, "p1", 5).unwrap();
    assert_eq!(renewed.remaining_turns, 15);
    let closed = h
        .kernel
        .abandon_commitment(&mut h.session, &first.id, "scope changed")
        .await
        .unwrap();
    assert_eq!(closed.status, CommitmentStatus::Abandoned);
    assert!(
        h.kernel
            .create_commitment(&mut h.session, "missing", "x", Some(3))
            .await
            .is_err()
    );
}
