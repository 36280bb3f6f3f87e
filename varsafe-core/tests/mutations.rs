mod common;

use std::sync::Arc;

use common::{remote, FlakyStore};
use varsafe_core::{
    parse_config, GovernanceEngine, LocalStateDir, MutationError, MutationOptions,
    RollbackOutcome, Scope, ScopeMutator, VarsafeConfig, VariableStore,
};

fn governance(toml: &str) -> GovernanceEngine {
    let config: VarsafeConfig = parse_config(toml).unwrap();
    GovernanceEngine::new(&config).unwrap()
}

fn seeded() -> Arc<FlakyStore> {
    Arc::new(FlakyStore::new(vec![
        remote("REDIS_URL", "redis://cache:6379", "dev", Scope::Shared),
        remote("WORKERS", "4", "dev", Scope::Service("api".into())),
    ]))
}

#[tokio::test]
async fn failed_source_delete_rolls_back_to_the_exact_pre_state() {
    let store = seeded();
    let before = store.snapshot().await;
    store.fail_delete("REDIS_URL", Scope::Shared);

    let err = ScopeMutator::new(store.clone(), governance(""))
        .move_variable(
            "shop",
            "dev",
            "REDIS_URL",
            Scope::Shared,
            Scope::Service("api".into()),
            MutationOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        MutationError::Aborted { cause, rollback } => {
            assert!(cause.contains("REDIS_URL@shared"));
            assert_eq!(rollback, RollbackOutcome::RolledBack);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn failed_rollback_is_reported_not_swallowed() {
    let store = seeded();
    let original = store
        .get("WORKERS", "shop", "dev", &Scope::Service("api".into()))
        .await
        .unwrap()
        .unwrap();
    store
        .set(&remote("WORKERS", "8", "dev", Scope::Shared))
        .await
        .unwrap();
    store.fail_delete("WORKERS", Scope::Service("api".into()));
    store.fail_delete("WORKERS", Scope::Shared);
    store.fail_set("WORKERS", Scope::Service("api".into()));

    let overwrite = MutationOptions {
        overwrite: true,
        ..MutationOptions::default()
    };
    let err = ScopeMutator::new(store.clone(), governance(""))
        .promote("shop", "dev", "WORKERS", "api", overwrite)
        .await
        .unwrap_err();

    let MutationError::Aborted { rollback, .. } = err else {
        panic!("expected an aborted mutation");
    };
    match &rollback {
        RollbackOutcome::RollbackFailed { errors } => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("WORKERS@service:api"));
        }
        other => panic!("expected a rollback failure, got {other:?}"),
    }
    assert!(rollback.to_string().contains("ROLLBACK FAILED"));

    let shared = store
        .get("WORKERS", "shop", "dev", &Scope::Shared)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shared.value, "8");
    assert_eq!(
        store
            .get("WORKERS", "shop", "dev", &Scope::Service("api".into()))
            .await
            .unwrap(),
        Some(original)
    );
}

#[tokio::test]
async fn failed_destination_write_is_a_clean_failure() {
    let store = seeded();
    let before = store.snapshot().await;
    store.fail_set("REDIS_URL", Scope::Service("web".into()));

    let err = ScopeMutator::new(store.clone(), governance(""))
        .demote("shop", "dev", "REDIS_URL", "web", MutationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MutationError::Aborted {
            rollback: RollbackOutcome::CleanFailure,
            ..
        }
    ));
    assert_eq!(store.snapshot().await, before);
    let calls = store.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["set REDIS_URL@service:web"]);
}

#[tokio::test]
async fn destination_scope_policy_blocks_before_any_write() {
    let store = seeded();
    let strict = governance(
        r#"
[[policy.rules]]
pattern = "REDIS_*"
scope = "shared"
mode = "strict"
"#,
    );
    let err = ScopeMutator::new(store.clone(), strict)
        .demote("shop", "dev", "REDIS_URL", "api", MutationOptions::default())
        .await
        .unwrap_err();
    match err {
        MutationError::Blocked { reason, .. } => assert!(reason.contains("scope policy")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rename_keeps_value_and_records_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded();
    let report = ScopeMutator::new(store.clone(), governance(""))
        .with_local(LocalStateDir::new(dir.path()))
        .with_actor(Some("ops".into()))
        .rename(
            "shop",
            "dev",
            Scope::Shared,
            "REDIS_URL",
            "CACHE_URL",
            MutationOptions::default(),
        )
        .await
        .unwrap();
    assert!(report.source_deleted);

    let renamed = store
        .get("CACHE_URL", "shop", "dev", &Scope::Shared)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.value, "redis://cache:6379");
    assert_eq!(
        renamed.provenance.as_ref().and_then(|p| p.actor.as_deref()),
        Some("ops")
    );
    assert!(store
        .get("REDIS_URL", "shop", "dev", &Scope::Shared)
        .await
        .unwrap()
        .is_none());

    let entries = LocalStateDir::new(dir.path()).read_provenance().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, "rename");
    assert_eq!(entries[0].keys, vec!["CACHE_URL"]);
}
