use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_summary_counts_remaining_errors() {
    let err = HiveError::Multiple {
        context: "daemon shutdown".to_string(),
        errors: vec![
            HiveError::internal("stop tasks"),
            HiveError::internal("close local database"),
            HiveError::internal("shutdown endpoints"),
        ],
    };

    assert_eq!(
        err.to_string(),
        "Internal error: stop tasks (and 2 more errors)"
    );
}

#[test]
fn test_from_many() {
    assert!(HiveError::from_many("ctx", vec![]).is_ok());

    let single = HiveError::from_many("ctx", vec![HiveError::internal("boom")]).unwrap_err();
    assert_eq!(single.to_string(), "Internal error: boom");

    let multi = HiveError::from_many(
        "ctx",
        vec![HiveError::internal("a"), HiveError::internal("b")],
    )
    .unwrap_err();
    assert!(matches!(multi, HiveError::Multiple { ref errors, .. } if errors.len() == 2));
}

#[test]
fn test_predicates() {
    assert!(HiveError::not_leader("rebalance").is_not_leader());
    assert!(HiveError::DischargeRequired {
        challenge: serde_json::json!({})
    }
    .is_discharge_required());
    assert!(HiveError::SomeNodesBehind {
        details: "schema 70 < 72".into()
    }
    .is_some_nodes_behind());
    assert!(!HiveError::internal("x").is_not_leader());
}

#[tokio::test]
async fn test_join_error_conversion() {
    async fn run() -> HiveResult<()> {
        let handle = tokio::spawn(async {
            if true {
                panic!("test panic");
            }
        });
        handle.await?;
        Ok(())
    }

    match run().await {
        Err(HiveError::Internal { message }) => assert!(message.contains("panicked")),
        other => panic!("expected internal error, got {:?}", other),
    }
}
