//! Behaviour every [`Store`] backend must share.
//!
//! Each check is written once against `Arc<dyn Store>` and run against the in-memory backend on
//! a multi-threaded runtime, so the concurrent checks contend for real.
//! With `--features postgres-tests` the same checks also run against PostgreSQL through
//! `#[sqlx::test]`, which needs `DATABASE_URL`.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use super::{InMemoryStore, Store};
use crate::{
    auth::permissions::{Permissions, RoleName},
    db::{
        errors::DbError,
        models::{
            roles::{RoleCreateDBRequest, RoleDBResponse},
            sessions::SessionCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::UserId,
};

async fn user_role(store: &Arc<dyn Store>) -> RoleDBResponse {
    store.ensure_role(&RoleCreateDBRequest::fixed(RoleName::User)).await.unwrap()
}

async fn new_user(store: &Arc<dyn Store>, username: &str) -> UserDBResponse {
    let role = user_role(store).await;
    store
        .create_user(&UserCreateDBRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: "hash".to_string(),
            password_salt: "salt".to_string(),
            full_name: None,
            avatar_url: None,
            role_id: role.id,
            is_superuser: false,
            is_active: true,
        })
        .await
        .unwrap()
}

fn session_request(session_id: &str, user_id: UserId, expires_in: Duration) -> SessionCreateDBRequest {
    SessionCreateDBRequest {
        session_id: session_id.to_string(),
        user_id,
        token: format!("token-{session_id}"),
        expires_at: Utc::now() + expires_in,
        user_agent: Some("tests".to_string()),
        ip_address: None,
    }
}

async fn ensure_role_is_idempotent(store: Arc<dyn Store>) {
    let first = store.ensure_role(&RoleCreateDBRequest::fixed(RoleName::Admin)).await.unwrap();
    let second = store.ensure_role(&RoleCreateDBRequest::fixed(RoleName::Admin)).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.permissions(), Permissions::for_role(RoleName::Admin));

    user_role(&store).await;
    let names: Vec<String> = store.list_roles().await.unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["admin", "user"]);

    let by_name = store.get_role_by_name("admin").await.unwrap().unwrap();
    assert_eq!(by_name.id, first.id);
    assert!(store.get_role_by_name("owner").await.unwrap().is_none());
}

async fn usernames_and_emails_are_unique_ignoring_case(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;

    let mut duplicate = UserCreateDBRequest {
        username: "ALICE".to_string(),
        email: "other@example.com".to_string(),
        password_hash: "hash".to_string(),
        password_salt: "salt".to_string(),
        full_name: None,
        avatar_url: None,
        role_id: alice.role_id,
        is_superuser: false,
        is_active: true,
    };
    assert!(matches!(
        store.create_user(&duplicate).await,
        Err(DbError::UniqueViolation { .. })
    ));

    duplicate.username = "alice2".to_string();
    duplicate.email = "Alice@Example.com".to_string();
    assert!(matches!(
        store.create_user(&duplicate).await,
        Err(DbError::UniqueViolation { .. })
    ));

    let found = store.get_user_by_username("AlIcE").await.unwrap().unwrap();
    assert_eq!(found.id, alice.id);
    let found = store.get_user_by_email("ALICE@example.COM").await.unwrap().unwrap();
    assert_eq!(found.id, alice.id);
}

async fn create_user_requires_existing_role(store: Arc<dyn Store>) {
    let result = store
        .create_user(&UserCreateDBRequest {
            username: "orphan".to_string(),
            email: "orphan@example.com".to_string(),
            password_hash: "hash".to_string(),
            password_salt: "salt".to_string(),
            full_name: None,
            avatar_url: None,
            role_id: uuid::Uuid::new_v4(),
            is_superuser: false,
            is_active: true,
        })
        .await;
    assert!(matches!(result, Err(DbError::ForeignKeyViolation { .. })));
}

async fn user_listing_pages(store: Arc<dyn Store>) {
    for name in ["u1", "u2", "u3", "u4", "u5"] {
        new_user(&store, name).await;
    }
    assert_eq!(store.count_users().await.unwrap(), 5);

    let first = store.list_users(0, 2).await.unwrap();
    let second = store.list_users(2, 2).await.unwrap();
    let last = store.list_users(4, 2).await.unwrap();
    assert_eq!((first.len(), second.len(), last.len()), (2, 2, 1));

    let mut seen: Vec<UserId> = first.iter().chain(&second).chain(&last).map(|u| u.id).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5);

    assert!(store.list_users(10, 2).await.unwrap().is_empty());
}

async fn user_updates(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;
    let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

    store.update_last_login(alice.id, at).await.unwrap();
    store.update_password(alice.id, "new-hash", "new-salt").await.unwrap();
    let updated = store.set_user_active(alice.id, false).await.unwrap();
    assert!(!updated.is_active);

    let reloaded = store.get_user_by_id(alice.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_login, Some(at));
    assert_eq!(reloaded.password_hash, "new-hash");
    assert_eq!(reloaded.password_salt, "new-salt");
    assert!(!reloaded.is_active);

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(store.update_last_login(missing, at).await, Err(DbError::NotFound)));
    assert!(matches!(store.update_password(missing, "h", "s").await, Err(DbError::NotFound)));
    assert!(matches!(store.set_user_active(missing, true).await, Err(DbError::NotFound)));
}

async fn session_lifecycle(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;

    let created = store.create_session(&session_request("s1", alice.id, Duration::hours(1))).await.unwrap();
    assert!(created.is_active);

    let duplicate = session_request("s1", alice.id, Duration::hours(2));
    assert!(matches!(
        store.create_session(&duplicate).await,
        Err(DbError::UniqueViolation { .. })
    ));
    // The original row is untouched
    let stored = store.get_session("s1").await.unwrap().unwrap();
    assert_eq!(stored.token, "token-s1");

    let unknown_user = session_request("s2", uuid::Uuid::new_v4(), Duration::hours(1));
    assert!(matches!(
        store.create_session(&unknown_user).await,
        Err(DbError::ForeignKeyViolation { .. })
    ));

    let later = stored.expires_at + Duration::hours(1);
    let refreshed = store.update_session_token("s1", "rotated", later).await.unwrap();
    assert_eq!(refreshed.token, "rotated");
    assert_eq!(refreshed.expires_at, later);

    assert!(store.deactivate_session("s1").await.unwrap());
    assert!(!store.deactivate_session("s1").await.unwrap());
    assert!(!store.deactivate_session("never-issued").await.unwrap());
    assert!(matches!(
        store.update_session_token("s1", "again", later).await,
        Err(DbError::NotFound)
    ));
}

async fn revoke_all_sessions_for_user(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;
    let bob = new_user(&store, "bob").await;
    for id in ["a1", "a2", "a3"] {
        store.create_session(&session_request(id, alice.id, Duration::hours(1))).await.unwrap();
    }
    store.create_session(&session_request("b1", bob.id, Duration::hours(1))).await.unwrap();
    store.deactivate_session("a3").await.unwrap();

    assert_eq!(store.deactivate_user_sessions(alice.id).await.unwrap(), 2);
    assert_eq!(store.deactivate_user_sessions(alice.id).await.unwrap(), 0);
    assert!(store.get_session("b1").await.unwrap().unwrap().is_active);
}

async fn expired_sessions_are_swept(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;
    let now = Utc::now();

    let mut at_boundary = session_request("boundary", alice.id, Duration::zero());
    at_boundary.expires_at = now;
    store.create_session(&at_boundary).await.unwrap();
    let mut past = session_request("past", alice.id, Duration::zero());
    past.expires_at = now - Duration::minutes(5);
    store.create_session(&past).await.unwrap();
    let mut future = session_request("future", alice.id, Duration::zero());
    future.expires_at = now + Duration::minutes(5);
    store.create_session(&future).await.unwrap();

    assert_eq!(store.deactivate_expired_sessions(now).await.unwrap(), 2);
    assert!(!store.get_session("boundary").await.unwrap().unwrap().is_active);
    assert!(!store.get_session("past").await.unwrap().unwrap().is_active);
    assert!(store.get_session("future").await.unwrap().unwrap().is_active);
    assert_eq!(store.deactivate_expired_sessions(now).await.unwrap(), 0);
}

async fn grants_upsert_and_soft_revoke(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;
    let admin = new_user(&store, "root").await;

    let first = store.upsert_grant(alice.id, "sales_db", admin.id).await.unwrap();
    let again = store.upsert_grant(alice.id, "sales_db", admin.id).await.unwrap();
    assert_eq!(first.id, again.id);
    store.upsert_grant(alice.id, "hr", admin.id).await.unwrap();

    let names: Vec<String> = store
        .list_active_grants(alice.id)
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.db_name)
        .collect();
    assert_eq!(names, vec!["hr", "sales_db"]);

    assert!(store.deactivate_grant(alice.id, "hr").await.unwrap());
    assert!(!store.deactivate_grant(alice.id, "hr").await.unwrap());
    assert!(!store.deactivate_grant(alice.id, "never_granted").await.unwrap());
    assert!(!store.has_active_grant(alice.id, "hr").await.unwrap());
    assert!(store.has_active_grant(alice.id, "sales_db").await.unwrap());

    // Re-granting reactivates the same row
    let restored = store.upsert_grant(alice.id, "hr", admin.id).await.unwrap();
    assert!(restored.is_active);
    assert_eq!(store.list_active_grants(alice.id).await.unwrap().len(), 2);

    assert!(matches!(
        store.upsert_grant(uuid::Uuid::new_v4(), "hr", admin.id).await,
        Err(DbError::ForeignKeyViolation { .. })
    ));
}

async fn concurrent_registrations_create_one_user(store: Arc<dyn Store>) {
    let role = user_role(&store).await;

    // Same username in differing case, distinct emails
    let mut handles = vec![];
    for i in 0..16 {
        let store = store.clone();
        let request = UserCreateDBRequest {
            username: if i % 2 == 0 { "racer" } else { "RACER" }.to_string(),
            email: format!("racer{i}@example.com"),
            password_hash: "hash".to_string(),
            password_salt: "salt".to_string(),
            full_name: None,
            avatar_url: None,
            role_id: role.id,
            is_superuser: false,
            is_active: true,
        };
        handles.push(tokio::task::spawn(async move { store.create_user(&request).await }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("Task panicked") {
            Ok(_) => created += 1,
            Err(DbError::UniqueViolation { .. }) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(store.count_users().await.unwrap(), 1);
}

async fn concurrent_grants_share_one_row(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;
    let admin = new_user(&store, "root").await;

    let mut handles = vec![];
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::task::spawn(async move {
            store.upsert_grant(alice.id, "sales_db", admin.id).await
        }));
    }

    let mut ids = vec![];
    for handle in handles {
        ids.push(handle.await.expect("Task panicked").unwrap().id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.list_active_grants(alice.id).await.unwrap().len(), 1);
}

async fn concurrent_grant_and_revoke_converge(store: Arc<dyn Store>) {
    let alice = new_user(&store, "alice").await;
    let admin = new_user(&store, "root").await;
    let original = store.upsert_grant(alice.id, "sales_db", admin.id).await.unwrap().id;

    let mut handles = vec![];
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::task::spawn(async move {
            if i % 2 == 0 {
                store.upsert_grant(alice.id, "sales_db", admin.id).await.map(|grant| grant.id == original)
            } else {
                store.deactivate_grant(alice.id, "sales_db").await.map(|_| true)
            }
        }));
    }
    for handle in handles {
        assert!(handle.await.expect("Task panicked").unwrap(), "grant row was replaced");
    }

    // Whichever write landed last, the pair still maps to the one original row
    let active = store.list_active_grants(alice.id).await.unwrap();
    assert!(active.len() <= 1);
    assert_eq!(active.len() == 1, store.has_active_grant(alice.id, "sales_db").await.unwrap());

    let settled = store.upsert_grant(alice.id, "sales_db", admin.id).await.unwrap();
    assert_eq!(settled.id, original);
    assert!(store.deactivate_grant(alice.id, "sales_db").await.unwrap());
    assert!(!store.has_active_grant(alice.id, "sales_db").await.unwrap());
    assert!(store.list_active_grants(alice.id).await.unwrap().is_empty());
}

macro_rules! store_contract {
    ($($name:ident),* $(,)?) => {
        mod in_memory {
            use super::*;
            use rstest::{fixture, rstest};

            #[fixture]
            fn store() -> Arc<dyn Store> {
                Arc::new(InMemoryStore::new())
            }

            $(
                #[rstest]
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name(store: Arc<dyn Store>) {
                    super::$name(store).await;
                }
            )*
        }

        #[cfg(feature = "postgres-tests")]
        mod postgres {
            use super::*;
            use crate::db::store::PostgresStore;
            use sqlx::PgPool;

            $(
                #[sqlx::test]
                #[test_log::test]
                async fn $name(pool: PgPool) {
                    super::$name(Arc::new(PostgresStore::new(pool))).await;
                }
            )*
        }
    };
}

store_contract!(
    ensure_role_is_idempotent,
    usernames_and_emails_are_unique_ignoring_case,
    create_user_requires_existing_role,
    user_listing_pages,
    user_updates,
    session_lifecycle,
    revoke_all_sessions_for_user,
    expired_sessions_are_swept,
    grants_upsert_and_soft_revoke,
    concurrent_registrations_create_one_user,
    concurrent_grants_share_one_row,
    concurrent_grant_and_revoke_converge,
);
