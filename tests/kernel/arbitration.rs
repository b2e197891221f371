use chrono::{Duration, Utc};

use iris_kernel::config::KernelConfig;
use iris_kernel::core::arbiter::Disposition;
use iris_kernel::core::memory::{EpisodeQuery, episode_types};
use iris_kernel::core::problems::ProblemState;
use iris_kernel::core::turn::{TurnInput, TurnSource};
use iris_kernel::observability::KernelEvent;

use super::kernel_harness::{harness, harness_with, raising};

/// Config where urgency 0.9 is not yet an emergency, so the preempt score decides.
fn scored_config() -> KernelConfig {
    let mut config = KernelConfig::default();
    config.gates.emergency_urgency = 0.99;
    config
}

#[tokio::test]
async fn first_candidate_becomes_active() {
    let mut h = harness();
    let t0 = Utc::now();
    let turn = raising("p1", 5, 0.2, t0);
    let signals = h.kernel.derive_signals(&turn).await;

    let decision = h
        .kernel
        .arbitrate(&mut h.session, &turn, &signals)
        .await
        .unwrap();
    assert_eq!(decision.disposition, Disposition::Switch);
    assert_eq!(h.session.problems().active().unwrap().id, "p1");

    let logged = h
        .kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            entry_type: Some(episode_types::ARBITRATION.into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(logged.len(), 1);
}

#[tokio::test]
async fn stale_low_priority_work_yields_to_urgent_candidate() {
    let mut h = harness_with(scored_config());
    let t0 = Utc::now() - Duration::hours(1);
    let first = raising("p1", 5, 0.1, t0);
    let signals = h.kernel.derive_signals(&first).await;
    h.kernel
        .arbitrate(&mut h.session, &first, &signals)
        .await
        .unwrap();

    // 1440s idle of an 1800s window: staleness 0.8.
    let second = raising("p2", 9, 0.9, t0 + Duration::seconds(1440));
    let signals = h.kernel.derive_signals(&second).await;
    let decision = h
        .kernel
        .arbitrate(&mut h.session, &second, &signals)
        .await
        .unwrap();

    assert_eq!(decision.disposition, Disposition::Switch);
    assert!(decision.score >= 0.70, "score {}", decision.score);
    assert!(decision.score < 1.0, "went through the emergency path");
    assert_eq!(h.session.problems().active().unwrap().id, "p2");
    assert_eq!(
        h.session.problems().get("p1").unwrap().state,
        ProblemState::Paused
    );
}

#[tokio::test]
async fn near_complete_commitment_queues_the_candidate() {
    let mut h = harness();
    let t0 = Utc::now();
    h.kernel.begin_turn(&mut h.session).await.unwrap();
    let first = raising("p1", 5, 0.1, t0);
    let signals = h.kernel.derive_signals(&first).await;
    h.kernel
        .arbitrate(&mut h.session, &first, &signals)
        .await
        .unwrap();
    h.kernel
        .create_commitment(&mut h.session, "p1", "finish the parser", Some(10))
        .await
        .unwrap();
    for _ in 0..9 {
        h.kernel.begin_turn(&mut h.session).await.unwrap();
    }
    assert_eq!(
        h.session
            .commitments()
            .active_for("p1")
            .unwrap()
            .remaining_turns,
        1
    );

    let second = raising("p2", 6, 0.4, t0);
    let signals = h.kernel.derive_signals(&second).await;
    let decision = h
        .kernel
        .arbitrate(&mut h.session, &second, &signals)
        .await
        .unwrap();

    assert_eq!(decision.disposition, Disposition::Queue);
    assert_eq!(h.session.problems().active().unwrap().id, "p1");
    assert_eq!(
        h.session.problems().get("p2").unwrap().state,
        ProblemState::Background
    );
    assert!(h.session.commitments().active_for("p1").is_some());
}

#[tokio::test]
async fn middle_band_is_surfaced_and_resolved_by_the_user() {
    let mut config = scored_config();
    config.arbiter.ask_threshold = 0.10;
    let mut h = harness_with(config);
    let t0 = Utc::now();
    let first = raising("p1", 5, 0.1, t0);
    let signals = h.kernel.derive_signals(&first).await;
    h.kernel
        .arbitrate(&mut h.session, &first, &signals)
        .await
        .unwrap();

    let second = raising("p2", 6, 0.5, t0);
    let signals = h.kernel.derive_signals(&second).await;
    let decision = h
        .kernel
        .arbitrate(&mut h.session, &second, &signals)
        .await
        .unwrap();
    assert_eq!(decision.disposition, Disposition::Ask);
    assert_eq!(h.session.pending_asks().len(), 1);
    assert_eq!(h.session.problems().active().unwrap().id, "p1");

    let declined = h
        .kernel
        .resolve_ask(&mut h.session, "p2", false)
        .await
        .unwrap();
    assert_eq!(declined.disposition, Disposition::Queue);
    assert!(h.session.pending_asks().is_empty());
    assert_eq!(
        h.session.problems().get("p2").unwrap().state,
        ProblemState::Background
    );
    assert!(h.kernel.resolve_ask(&mut h.session, "p2", true).await.is_err());
}

#[tokio::test]
async fn emergency_preempts_once_then_cools_down() {
    let mut h = harness();
    let t0 = Utc::now();
    h.kernel.begin_turn(&mut h.session).await.unwrap();
    let first = raising("p1", 9, 0.1, t0);
    let signals = h.kernel.derive_signals(&first).await;
    h.kernel
        .arbitrate(&mut h.session, &first, &signals)
        .await
        .unwrap();

    let mut fire = raising("incident", 1, 0.95, t0);
    fire.context.emergency = true;
    let signals = h.kernel.derive_signals(&fire).await;
    let decision = h
        .kernel
        .arbitrate(&mut h.session, &fire, &signals)
        .await
        .unwrap();
    assert_eq!(decision.disposition, Disposition::Switch);
    assert!((decision.score - 1.0).abs() < f64::EPSILON);
    assert_eq!(h.session.gates().last_emergency_turn(), Some(1));

    // A second emergency inside the cooldown is scored like any candidate.
    h.kernel.begin_turn(&mut h.session).await.unwrap();
    let mut again = raising("fire2", 1, 0.95, t0);
    again.context.emergency = true;
    let signals = h.kernel.derive_signals(&again).await;
    let decision = h
        .kernel
        .arbitrate(&mut h.session, &again, &signals)
        .await
        .unwrap();
    assert_ne!(decision.disposition, Disposition::Switch);
    assert!(
        h.sink
            .count_where(|e| matches!(e, KernelEvent::GateDecision { allowed: false, .. }))
            >= 1
    );
}

#[tokio::test]
async fn queued_problem_resumes_when_nothing_is_active() {
    let mut h = harness();
    let t0 = Utc::now();
    let first = raising("p1", 5, 0.1, t0);
    let signals = h.kernel.derive_signals(&first).await;
    h.kernel
        .arbitrate(&mut h.session, &first, &signals)
        .await
        .unwrap();
    let second = raising("p2", 6, 0.2, t0);
    let signals = h.kernel.derive_signals(&second).await;
    h.kernel
        .arbitrate(&mut h.session, &second, &signals)
        .await
        .unwrap();
    assert_eq!(
        h.session.problems().get("p2").unwrap().state,
        ProblemState::Background
    );

    // p1 finishes; the next quiet turn picks p2 back up.
    h.kernel
        .complete_problem(&mut h.session, "p1")
        .await
        .unwrap();
    let quiet = TurnInput::new("ok", TurnSource::User);
    let signals = h.kernel.derive_signals(&quiet).await;
    let decision = h
        .kernel
        .arbitrate(&mut h.session, &quiet, &signals)
        .await
        .unwrap();
    assert_eq!(decision.disposition, Disposition::Switch);
    assert_eq!(decision.candidate_problem_id.as_deref(), Some("p2"));
    assert_eq!(h.session.problems().active().unwrap().id, "p2");
}
