//! Integration tests for authentication and authorization
//!
//! These drive the public API the way the relay does: a challenge per
//! session, an auth event, a token, then permission checks.

use futures::TryStreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use turnstile::auth::{Action, AuthenticationError, Authenticator, AuthorRule, RoleSet, Token};
use turnstile::config::{AuthConfig, Settings};
use turnstile::event::{Keys, UnsignedEvent};
use turnstile::storage::{MemoryRoleStore, RoleAssignment, RoleStore};

const RELAY: &str = "ws://localhost:6969";
const PRIVKEY1: &str = "f6d7c79924aa815d0d408bc28c1a23af208209476c1b7691df96f7d7b72a2753";
const PUBKEY1: &str = "5faaae4973c6ed517e7ed6c3921b9842ddbc2fc5a5bc08793d2e736996f6394d";
const PUBKEY2: &str = "5de724fcabfb5ffd14e48a18f329092f345d0d5ed9f0f02903f40ec02753b011";

fn restricted() -> AuthConfig {
    AuthConfig {
        enabled: true,
        actions: BTreeMap::from([
            ("save".to_string(), "w".to_string()),
            ("query".to_string(), "r".to_string()),
        ]),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn auth_event(challenge: &str, created_at: i64) -> serde_json::Value {
    let event = Keys::parse(PRIVKEY1)
        .unwrap()
        .sign(UnsignedEvent::auth(RELAY, challenge, created_at))
        .unwrap();
    serde_json::to_value(event).unwrap()
}

#[tokio::test]
async fn test_authentication_flow() {
    let store = Arc::new(MemoryRoleStore::new());
    let auth = Authenticator::new(&restricted(), RELAY, store.clone()).unwrap();
    let challenge = "challenge";

    // Junk never reaches the role store
    let err = auth
        .authenticate(&serde_json::json!("some junk"), challenge)
        .await
        .unwrap_err();
    assert_eq!(err, AuthenticationError::Malformed);

    let too_old = auth_event(challenge, now() - 605);
    let err = auth.authenticate(&too_old, challenge).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid: Too old");

    let too_new = auth_event(challenge, now() + 605);
    let err = auth.authenticate(&too_new, challenge).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid: Too new");

    let good = auth_event(challenge, now());
    let token = auth.authenticate(&good, challenge).await.unwrap();
    assert_eq!(token.pubkey, PUBKEY1);
    assert_eq!(token.roles, RoleSet::anonymous());

    // Anonymous token cannot save or query under this policy
    assert!(!auth.can_do(Some(&token), Action::Save, None));
    assert!(!auth.can_do(Some(&token), Action::Query, None));

    // Now create a role; the next authentication sees it
    store
        .set_roles(PUBKEY1, &RoleSet::parse("rw").unwrap())
        .await
        .unwrap();

    let token = auth.authenticate(&good, challenge).await.unwrap();
    assert_eq!(token.roles, RoleSet::parse("rw").unwrap());
    assert!(auth.can_do(Some(&token), Action::Save, None));
    assert!(auth.can_do(Some(&token), Action::Query, None));
}

#[tokio::test]
async fn test_same_event_rejected_for_another_session() {
    let auth = Authenticator::new(&restricted(), RELAY, Arc::new(MemoryRoleStore::new())).unwrap();

    // An event answering one session's challenge is useless for another session
    let event = auth_event("challenge-a", now());
    assert!(auth.authenticate(&event, "challenge-a").await.is_ok());
    assert_eq!(
        auth.authenticate(&event, "challenge-b").await,
        Err(AuthenticationError::WrongChallenge)
    );
}

#[tokio::test]
async fn test_can_perform() {
    let auth = Authenticator::new(&restricted(), RELAY, Arc::new(MemoryRoleStore::new())).unwrap();
    let event = Keys::parse(PRIVKEY1)
        .unwrap()
        .sign(UnsignedEvent::new(1, now()).content("hello"))
        .unwrap();

    let token = Token {
        pubkey: PUBKEY1.to_string(),
        roles: RoleSet::parse("wr").unwrap(),
    };
    assert!(auth.can_do(Some(&token), Action::Save, Some(&event)));

    let token = Token {
        pubkey: PUBKEY2.to_string(),
        roles: RoleSet::anonymous(),
    };
    assert!(!auth.can_do(Some(&token), Action::Save, None));
}

#[tokio::test]
async fn test_author_rule_lets_owner_save() {
    let auth = Authenticator::new(&restricted(), RELAY, Arc::new(MemoryRoleStore::new()))
        .unwrap()
        .with_event_rule(AuthorRule);

    let token = auth
        .authenticate(&auth_event("c", now()), "c")
        .await
        .unwrap();
    let own = Keys::parse(PRIVKEY1)
        .unwrap()
        .sign(UnsignedEvent::new(1, now()))
        .unwrap();
    let other = Keys::generate().sign(UnsignedEvent::new(1, now())).unwrap();

    assert!(auth.can_do(Some(&token), Action::Save, Some(&own)));
    assert!(!auth.can_do(Some(&token), Action::Save, Some(&other)));
    // The rule never applies without a token
    assert!(!auth.can_do(None, Action::Save, Some(&own)));
}

#[tokio::test]
async fn test_roles() {
    let store = MemoryRoleStore::new();

    store
        .set_roles(PUBKEY1, &RoleSet::parse("rw").unwrap())
        .await
        .unwrap();
    assert_eq!(
        store.get_roles(PUBKEY1).await.unwrap(),
        RoleSet::parse("rw").unwrap()
    );

    // A default read does not create an assignment
    assert_eq!(store.get_roles(PUBKEY2).await.unwrap(), RoleSet::anonymous());
    store
        .set_roles(PUBKEY2, &RoleSet::parse("s").unwrap())
        .await
        .unwrap();
    assert_eq!(
        store.get_roles(PUBKEY2).await.unwrap(),
        RoleSet::parse("s").unwrap()
    );

    let all: Vec<RoleAssignment> = store.list_roles().await.unwrap().try_collect().await.unwrap();
    assert_eq!(
        all,
        vec![
            RoleAssignment::new(PUBKEY1, RoleSet::parse("rw").unwrap()),
            RoleAssignment::new(PUBKEY2, RoleSet::parse("s").unwrap()),
        ]
    );

    // Overwrite, not merge
    store
        .set_roles(PUBKEY1, &RoleSet::parse("s").unwrap())
        .await
        .unwrap();
    assert_eq!(
        store.get_roles(PUBKEY1).await.unwrap(),
        RoleSet::parse("s").unwrap()
    );
}

#[tokio::test]
async fn test_list_only_contains_explicit_assignments() {
    let store = MemoryRoleStore::new();
    let lurker = Keys::generate().public_key();

    store.get_roles(&lurker).await.unwrap();
    store
        .set_roles(PUBKEY1, &RoleSet::parse("r").unwrap())
        .await
        .unwrap();

    let stream = store.list_roles().await.unwrap();
    // Later writes do not leak into an enumeration already taken
    store
        .set_roles(PUBKEY2, &RoleSet::parse("w").unwrap())
        .await
        .unwrap();

    let listed: Vec<RoleAssignment> = stream.try_collect().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].pubkey, PUBKEY1);
}

#[tokio::test]
async fn test_settings_drive_authenticator() {
    let settings = Settings::from_toml(
        r#"
relay_url = "ws://localhost:6969"

[authentication]
enabled = true

[authentication.actions]
save = "w"
"#,
        std::path::Path::new("inline.toml"),
    )
    .unwrap();

    let auth = Authenticator::new(
        &settings.authentication,
        settings.relay_url.clone(),
        Arc::new(MemoryRoleStore::new()),
    )
    .unwrap();

    assert!(auth.can_do(None, Action::Query, None));
    assert!(!auth.can_do(None, Action::Save, None));
    assert_eq!(auth.relay_url(), RELAY);
}

#[test]
fn test_bad_policy_is_fatal_at_construction() {
    let mut config = restricted();
    config.actions.insert("query".to_string(), "x".to_string());
    assert!(Authenticator::new(&config, RELAY, Arc::new(MemoryRoleStore::new())).is_err());
}
