use super::*;

#[test]
fn http_status_mapping() {
    assert_eq!(AppError::validation("bad_input", "oops").http_status(), 400);
    assert_eq!(AppError::auth("auth", "no").http_status(), 401);
    assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
    assert_eq!(AppError::conflict("conflict", "dup").http_status(), 409);
    assert_eq!(AppError::provider("provider", "down").http_status(), 502);
    assert_eq!(AppError::risk_decision("risk", "blocked").http_status(), 403);
    assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
}

#[test]
fn store_errors_keep_conflict_distinct_from_validation() {
    let dup: AppError = StoreError::AlreadyExists { table: "UsersByEmail".into(), partition: "EMAIL".into(), row: "a@b.c".into() }.into();
    assert!(matches!(dup, AppError::Conflict { .. }));
    let stale: AppError = StoreError::Conflict { table: "Sessions".into(), partition: "SESSION".into(), row: "s1".into() }.into();
    assert_eq!(stale.code_str(), "concurrency_conflict");
    let missing: AppError = StoreError::NotFound { table: "Sessions".into(), partition: "SESSION".into(), row: "s1".into() }.into();
    assert_eq!(missing.http_status(), 404);
}

#[test]
fn evaluate_errors_split_validation_from_provider() {
    let e: AppError = EvaluateError::MissingToken.into();
    assert!(matches!(e, AppError::Validation { .. }));
    let e: AppError = EvaluateError::Malformed { status: 500, detail: "eof".into() }.into();
    assert!(e.is_provider_failure());
    assert_eq!(e.code_str(), "provider_malformed");
    assert_eq!(e.message(), "Risk provider unavailable.");
}

#[test]
fn internal_detail_is_not_exposed() {
    let e: AppError = StoreError::TableNotFound("Users".into()).into();
    assert_eq!(e.http_status(), 500);
    assert!(!e.message().contains("Users"));
    let e: AppError = anyhow::anyhow!("secret path /var/x").into();
    assert_eq!(e.message(), "Internal error.");
}

#[test]
fn serializes_with_type_tag() {
    let v = serde_json::to_value(AppError::auth("unauthorized", "Unauthorized")).unwrap();
    assert_eq!(v["type"], "auth");
    assert_eq!(v["message"], "Unauthorized");
}
