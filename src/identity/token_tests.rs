use super::*;

fn issuer(secret: &str, aud: &str) -> HmacTokenIssuer {
    HmacTokenIssuer::new(TokenSettings {
        secret: secret.into(),
        issuer: "journeyguard".into(),
        audience: aud.into(),
        validity: Duration::minutes(60),
    })
}

#[test]
fn issued_token_validates_to_same_identity() {
    let t = issuer("k1", "web");
    let tok = t.issue("ADA_abc", "Ada@Example.com").unwrap();
    let p = t.validate(&tok).expect("valid");
    assert_eq!(p.user_id, "ADA_abc");
    assert_eq!(p.email, "ada@example.com");
}

#[test]
fn foreign_secret_or_audience_yields_nothing() {
    let tok = issuer("k1", "web").issue("u1", "a@b.c").unwrap();
    assert!(issuer("k2", "web").validate(&tok).is_none());
    assert!(issuer("k1", "mobile").validate(&tok).is_none());
}

#[test]
fn expiry_is_enforced() {
    let t = issuer("k1", "web");
    let t0 = Utc::now();
    let tok = t.issue_at("u1", "a@b.c", t0).unwrap();
    assert!(t.validate_at(&tok, t0 + Duration::minutes(59)).is_some());
    assert!(t.validate_at(&tok, t0 + Duration::minutes(60)).is_none());
}

#[test]
fn tampered_or_garbage_tokens_yield_nothing() {
    let t = issuer("k1", "web");
    let tok = t.issue("u1", "a@b.c").unwrap();
    let mut parts: Vec<&str> = tok.split('.').collect();
    let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"u2","email":"x@y.z","uid":"u2","iss":"journeyguard","aud":"web","iat":0,"exp":99999999999}"#);
    parts[1] = &forged;
    assert!(t.validate(&parts.join(".")).is_none());
    assert!(t.validate("").is_none());
    assert!(t.validate("a.b").is_none());
    assert!(t.validate("a.b.c.d").is_none());
    assert!(t.validate("!!!.???.***").is_none());
}

#[test]
fn oversized_validity_is_an_error_not_a_panic() {
    let t = HmacTokenIssuer::new(TokenSettings {
        secret: "k".into(),
        issuer: "journeyguard".into(),
        audience: "web".into(),
        validity: Duration::days(365 * 1_000_000),
    });
    assert!(t.issue("ADA_abc", "ada@example.com").is_err());
}
