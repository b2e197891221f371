use std::sync::Arc;

use serde_json::json;

use iris_kernel::ErrorCode;
use iris_kernel::config::{KernelConfig, OrchestratorConfig};
use iris_kernel::core::gates::GateKind;
use iris_kernel::core::memory::{EpisodeQuery, episode_types};
use iris_kernel::core::orchestrator::{
    Agent, AgentOutput, BundleContext, BundleStatus, MergeStrategy, Reducer, Tiebreaker,
};
use iris_kernel::observability::KernelEvent;

use super::kernel_harness::{ScriptedAgent, harness, harness_with};

fn majority() -> Reducer {
    Reducer::Vote {
        threshold: 0.6,
        tiebreaker: Tiebreaker::Abstain,
    }
}

#[tokio::test]
async fn approved_bundle_votes_and_is_traced() {
    let mut h = harness();
    h.kernel
        .register_problem(&mut h.session, "p1", "pick a cache", 5)
        .unwrap();
    let agents = vec![
        ScriptedAgent::says("a1", "use redis"),
        ScriptedAgent::says("a2", "use redis"),
        ScriptedAgent::says("a3", "use memcached"),
    ];

    let result = h
        .kernel
        .approve_and_run_agents(
            &mut h.session,
            &agents,
            &majority(),
            true,
            BundleContext::new("which cache?").for_problem("p1"),
            vec!["search".into()],
        )
        .await
        .unwrap();
    assert_eq!(result.status, BundleStatus::Completed);
    assert_eq!(result.output.unwrap().content, "use redis");

    let traced = h
        .kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            entry_type: Some(episode_types::ORCHESTRATION.into()),
            problem_id: Some("p1".into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(traced.len(), 1);
    assert_eq!(traced[0].payload["bundle_id"], json!(result.bundle_id));
    assert_eq!(traced[0].payload["agents"], json!(["a1", "a2", "a3"]));
    assert!(traced[0].tags.contains("orchestrator"));
}

#[tokio::test]
async fn gate_refuses_oversized_or_overreaching_bundles() {
    let mut h = harness();
    let crowd: Vec<Arc<dyn Agent>> = (0..9)
        .map(|i| ScriptedAgent::says(&format!("a{i}"), "same"))
        .collect();
    let err = h
        .kernel
        .approve_and_run_agents(
            &mut h.session,
            &crowd,
            &majority(),
            true,
            BundleContext::new("vote"),
            vec![],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GateDenied);

    let err = h
        .kernel
        .approve_and_run_agents(
            &mut h.session,
            &crowd[..2],
            &majority(),
            true,
            BundleContext::new("vote"),
            vec!["write_shared".into()],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GateDenied);

    assert_eq!(
        h.sink.count_where(|e| matches!(
            e,
            KernelEvent::GateDecision {
                gate: GateKind::AgentApproval,
                allowed: false,
                ..
            }
        )),
        2
    );
    assert!(h.sink.count_where(|e| matches!(e, KernelEvent::Orchestration { .. })) == 0);
}

#[tokio::test]
async fn agent_claiming_a_decision_fails_the_bundle() {
    let mut h = harness();
    let agents = vec![
        ScriptedAgent::says("a1", "index the table"),
        ScriptedAgent::says("a2", "I have decided: drop the table"),
    ];
    let result = h
        .kernel
        .approve_and_run_agents(
            &mut h.session,
            &agents,
            &Reducer::Merge {
                strategy: MergeStrategy::Concatenate,
            },
            false,
            BundleContext::new("plan the migration"),
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(result.status, BundleStatus::Failed);
    assert!(result.output.is_none());
    assert_eq!(result.error.unwrap().code, ErrorCode::AgentViolation);

    let capability_grab = vec![ScriptedAgent::returns(
        AgentOutput::proposal("a3", "let me write").with_capability("write_shared"),
    )];
    let result = h
        .kernel
        .approve_and_run_agents(
            &mut h.session,
            &capability_grab,
            &Reducer::PassThrough,
            true,
            BundleContext::new("plan the migration"),
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(result.status, BundleStatus::Failed);
    assert_eq!(result.error.unwrap().code, ErrorCode::AgentViolation);
}

#[tokio::test]
async fn stalled_agent_is_cut_off() {
    let mut h = harness_with(KernelConfig {
        orchestrator: OrchestratorConfig {
            agent_timeout_ms: 50,
            ..OrchestratorConfig::default()
        },
        ..KernelConfig::default()
    });
    let agents = vec![
        ScriptedAgent::says("a1", "ship it"),
        ScriptedAgent::stalls("slow"),
        ScriptedAgent::says("a2", "ship it"),
    ];
    let result = h
        .kernel
        .approve_and_run_agents(
            &mut h.session,
            &agents,
            &majority(),
            true,
            BundleContext::new("go or no-go"),
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(result.status, BundleStatus::Completed);
    assert_eq!(result.timed_out, vec!["slow".to_string()]);
    assert!(result.elapsed_ms < 5_000);

    let traced = h
        .kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            entry_type: Some(episode_types::ORCHESTRATION.into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(traced[0].payload["timed_out"], json!(["slow"]));
}
