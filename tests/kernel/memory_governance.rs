use serde_json::json;
use tempfile::TempDir;

use iris_kernel::ErrorCode;
use iris_kernel::core::memory::{
    Compartment, EpisodeQuery, NewEpisode, NewPattern, SharedWrite, StoredWrite, WriteRequest,
};
use iris_kernel::core::signals::{BlastRadius, ConflictLevel, DerivedSignals};
use iris_kernel::core::turn::{CandidateOutput, TurnContext, TurnInput, TurnSource};
use iris_kernel::observability::KernelEvent;

use super::kernel_harness::{harness, sqlite_kernel};

const ALL_TARGETS: [Compartment; 4] = [
    Compartment::WorkingSet,
    Compartment::EpisodicTrace,
    Compartment::SharedReference,
    Compartment::SemanticSynthesis,
];

fn signals(conflict: ConflictLevel, blast: BlastRadius, quality: f64) -> DerivedSignals {
    DerivedSignals {
        conflict_level: conflict,
        blast_radius: blast,
        source_quality: quality,
        alignment: 1.0,
        urgency: 0.0,
        advisory_applied: false,
    }
}

#[test]
fn severe_low_quality_writes_are_denied_everywhere() {
    let mut h = harness();
    for target in ALL_TARGETS {
        for quality in [0.0, 0.3, 0.69] {
            let request = WriteRequest::new(
                target,
                json!("x"),
                signals(ConflictLevel::None, BlastRadius::Severe, quality),
            );
            let decision = h.kernel.evaluate_write(&mut h.session, &request);
            assert!(!decision.approved, "{target} at {quality}");
        }
    }
    assert_eq!(
        h.sink
            .count_where(|e| matches!(e, KernelEvent::GateDecision { allowed: false, .. })),
        12
    );
}

#[test]
fn high_conflict_always_resolves_to_working_set() {
    let mut h = harness();
    for target in ALL_TARGETS {
        let request = WriteRequest::new(
            target,
            json!("x"),
            signals(ConflictLevel::High, BlastRadius::Minimal, 1.0),
        );
        let decision = h.kernel.evaluate_write(&mut h.session, &request);
        assert!(decision.approved);
        assert_eq!(decision.target, Compartment::WorkingSet, "{target}");
    }
}

#[tokio::test]
async fn derived_signals_feed_the_write_gate() {
    let mut h = harness();
    let turn = TurnInput::new("the API limit is 100/min", TurnSource::Tool).with_context(
        TurnContext {
            write_target: Some(Compartment::SharedReference),
            candidate_outputs: vec![
                CandidateOutput {
                    content: "100/min".into(),
                    confidence: 0.6,
                },
                CandidateOutput {
                    content: "60/min".into(),
                    confidence: 0.5,
                },
            ],
            ..TurnContext::default()
        },
    );
    let derived = h.kernel.derive_signals(&turn).await;
    assert_eq!(derived.blast_radius, BlastRadius::Severe);
    assert_eq!(derived.conflict_level, ConflictLevel::High);
    assert!(derived.source_quality <= 0.6);

    let decision = h.kernel.evaluate_write(
        &mut h.session,
        &WriteRequest::new(Compartment::SharedReference, json!(turn.text), derived),
    );
    assert!(!decision.approved);
}

#[tokio::test]
async fn denied_shared_write_surfaces_as_recoverable_error() {
    let h = harness();
    let err = h
        .kernel
        .bus()
        .write_shared(
            SharedWrite {
                key: "deploy.region".into(),
                value: json!("eu-west-1"),
                source: "agent".into(),
                problem_id: None,
            },
            signals(ConflictLevel::None, BlastRadius::Severe, 0.4),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::WriteDenied);
    assert!(err.recoverable);
    assert!(h.kernel.bus().read_shared("deploy.region").await.unwrap().is_none());
}

#[tokio::test]
async fn evidence_chain_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let pattern_id = {
        let kernel = sqlite_kernel(&dir).await;
        let bus = kernel.bus();
        let mut evidence = Vec::new();
        for n in 0..3 {
            let entry = bus
                .log_episode(
                    NewEpisode::new("observation", json!({ "n": n }))
                        .for_problem("p1")
                        .with_tag("latency"),
                )
                .await
                .unwrap();
            evidence.push(entry.id);
        }
        let outcome = bus
            .add_synthesis(
                NewPattern {
                    pattern_type: "remediation".into(),
                    input_description: "p99 latency spikes after deploy".into(),
                    recommended_action: "roll back the connection pool change".into(),
                    confidence: 0.8,
                    evidence_ids: evidence.clone(),
                    protected: false,
                },
                DerivedSignals::user_asserted(),
                Some("p1"),
            )
            .await
            .unwrap();
        let StoredWrite::Pattern(pattern) = outcome.stored else {
            panic!("expected a stored pattern, got {:?}", outcome.stored);
        };
        assert_eq!(pattern.evidence_ids, evidence);
        pattern.id
    };

    let kernel = sqlite_kernel(&dir).await;
    let chain = kernel.bus().get_evidence_chain(&pattern_id).await.unwrap();
    assert_eq!(chain.len(), 3);
    assert!(chain.iter().all(|entry| entry.problem_id.as_deref() == Some("p1")));

    let tagged = kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            tag: Some("latency".into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(tagged.len(), 3);
}

#[tokio::test]
async fn shared_reference_keeps_every_version() {
    let h = harness();
    for region in ["us-east-1", "eu-west-1"] {
        h.kernel
            .bus()
            .write_shared(
                SharedWrite {
                    key: "deploy.region".into(),
                    value: json!(region),
                    source: "user".into(),
                    problem_id: None,
                },
                DerivedSignals::user_asserted(),
            )
            .await
            .unwrap();
    }
    let history = h.kernel.bus().shared_history("deploy.region").await.unwrap();
    assert_eq!(
        history.iter().map(|r| r.version).collect::<Vec<_>>(),
        [1, 2]
    );
    assert_eq!(
        h.kernel
            .bus()
            .read_shared("deploy.region")
            .await
            .unwrap()
            .unwrap()
            .value,
        json!("eu-west-1")
    );
}
