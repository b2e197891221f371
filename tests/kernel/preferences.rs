use serde_json::json;

use iris_kernel::ErrorCode;
use iris_kernel::core::memory::{EpisodeQuery, StoredWrite, episode_types};
use iris_kernel::core::preference::PreferenceClass;
use iris_kernel::core::turn::TurnSource;
use iris_kernel::observability::KernelEvent;

use super::kernel_harness::harness;

#[tokio::test]
async fn explicit_preference_becomes_shared_reference() {
    let mut h = harness();
    let record = h
        .kernel
        .record_preference(
            &mut h.session,
            "indent",
            "I prefer tabs over spaces",
            TurnSource::User,
            None,
        )
        .await
        .unwrap();
    assert_eq!(record.verdict.class, PreferenceClass::Explicit);
    assert!(matches!(record.stored, StoredWrite::Shared(ref r) if r.version == 1));

    let stored = h
        .kernel
        .bus()
        .read_shared("preference:indent")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, json!("I prefer tabs over spaces"));
    assert_eq!(stored.source, "user");
    assert_eq!(
        h.sink.count_where(|e| matches!(
            e,
            KernelEvent::PreferenceClassified {
                class: PreferenceClass::Explicit,
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn hedged_preference_waits_for_confirmation() {
    let mut h = harness();
    h.kernel
        .register_problem(&mut h.session, "p1", "editor setup", 5)
        .unwrap();

    let record = h
        .kernel
        .record_preference(
            &mut h.session,
            "theme",
            "Maybe I prefer dark mode",
            TurnSource::User,
            Some("p1"),
        )
        .await
        .unwrap();
    assert_eq!(record.verdict.class, PreferenceClass::InferredConfirmRequired);
    assert!(matches!(
        record.stored,
        StoredWrite::Working { ref problem_id, ref key }
            if problem_id == "p1" && key == "preference:theme"
    ));
    assert_eq!(h.session.pending_preferences().len(), 1);
    assert!(
        h.kernel
            .bus()
            .read_shared("preference:theme")
            .await
            .unwrap()
            .is_none()
    );

    let working = h.kernel.bus().read_working("p1").await.unwrap().unwrap();
    assert_eq!(
        working.partial_artifacts["preference:theme"]["pending_confirmation"],
        json!(true)
    );

    let outcome = h
        .kernel
        .confirm_preference(&mut h.session, "theme")
        .await
        .unwrap();
    assert!(matches!(outcome.stored, StoredWrite::Shared(_)));
    assert!(h.session.pending_preferences().is_empty());
    assert!(
        h.kernel
            .bus()
            .read_shared("preference:theme")
            .await
            .unwrap()
            .is_some()
    );

    let err = h
        .kernel
        .confirm_preference(&mut h.session, "theme")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);
}

#[tokio::test]
async fn inferred_preferences_need_a_problem_scope() {
    let mut h = harness();
    let err = h
        .kernel
        .record_preference(
            &mut h.session,
            "colour",
            "Let's use the red one here",
            TurnSource::User,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);

    h.kernel
        .register_problem(&mut h.session, "p1", "palette", 5)
        .unwrap();
    let record = h
        .kernel
        .record_preference(
            &mut h.session,
            "colour",
            "Let's use the red one here",
            TurnSource::User,
            Some("p1"),
        )
        .await
        .unwrap();
    assert_eq!(record.verdict.class, PreferenceClass::InferredSilent);
    assert!(h.session.pending_preferences().is_empty());
    let working = h.kernel.bus().read_working("p1").await.unwrap().unwrap();
    assert_eq!(
        working.partial_artifacts["preference:colour"]["pending_confirmation"],
        json!(false)
    );
}

#[tokio::test]
async fn observed_preference_is_only_traced() {
    let mut h = harness();
    let record = h
        .kernel
        .record_preference(
            &mut h.session,
            "editor",
            "I always use vim",
            TurnSource::Observation,
            None,
        )
        .await
        .unwrap();
    assert_eq!(record.verdict.class, PreferenceClass::Behavioral);
    assert!(matches!(record.stored, StoredWrite::Episode(_)));

    let observed = h
        .kernel
        .bus()
        .query_episodes(&EpisodeQuery {
            entry_type: Some(episode_types::PREFERENCE_OBSERVED.into()),
            tag: Some("preference".into()),
            ..EpisodeQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].payload["key"], json!("editor"));
    assert!(h.kernel.bus().shared_keys().await.unwrap().is_empty());
}
