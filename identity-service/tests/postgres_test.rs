//! Backend tests against PostgreSQL and Redis.
//!
//! Run with `TEST_DATABASE_URL` and `TEST_REDIS_URL` set:
//! `cargo test -p identity-service --test postgres_test -- --ignored`

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use identity_service::models::{
    never_expires, AceKey, AceQuery, AclKey, Identifier, Permission, PermissionSet, Principal,
    Reservation, SecurableObjectType,
};
use identity_service::services::{IdQueue, PermissionStore, RangeStore, ReservationStore};
use serial_test::serial;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

async fn app() -> TestApp {
    TestApp::postgres()
        .await
        .expect("TEST_DATABASE_URL and TEST_REDIS_URL must be set")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL and Redis
#[serial]
async fn scroll_advances_cursors_atomically() {
    let app = app().await;
    let ranges = &app.stores.ranges;
    ranges.initialize_partitions(4).await.unwrap();

    let first = ranges.scroll(&[0, 1, 2, 3], 5).await.unwrap();
    let second = ranges.scroll(&[0, 1, 2, 3], 5).await.unwrap();
    assert_eq!(first.ids.len(), 20);
    assert_eq!(second.ids.len(), 20);

    let all: HashSet<Identifier> = first.ids.iter().chain(&second.ids).copied().collect();
    assert_eq!(all.len(), 40);
    assert!(all.iter().all(|id| !id.is_reserved()));

    let cursor = ranges.get_range(1).await.unwrap().unwrap();
    assert_eq!(cursor.peek().counter(), 10);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL and Redis
#[serial]
async fn replenisher_feeds_the_redis_queue() {
    let app = app().await;
    let mut replenisher = app.stores.replenisher(&app.state.config);

    let delivered = replenisher
        .replenish_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(delivered, 16 * 5);
    assert_eq!(app.stores.queue.len().await.unwrap(), delivered);

    let ids = app.state.ids.next_ids(delivered).await.unwrap();
    assert_eq!(ids.len(), delivered);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL and Redis
#[serial]
async fn conditional_insert_rejects_name_and_id_clashes() {
    let app = app().await;
    let store = &app.stores.reservations;
    let id = Identifier::from_parts(3, 1);

    let first = Reservation::new(AclKey::single(id), SecurableObjectType::Study, "study-a");
    assert_eq!(store.insert_if_absent(&first).await.unwrap(), Some(id));

    let same_name = Reservation::new(
        AclKey::single(Identifier::from_parts(3, 2)),
        SecurableObjectType::Study,
        "study-a",
    );
    assert_eq!(store.insert_if_absent(&same_name).await.unwrap(), None);

    let same_id = Reservation::new(AclKey::single(id), SecurableObjectType::Study, "study-b");
    assert_eq!(store.insert_if_absent(&same_id).await.unwrap(), None);

    assert_eq!(store.count_by_name("study-a").await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL and Redis
#[serial]
async fn merge_unions_and_subtract_deletes_empty_rows() {
    let app = app().await;
    let store = &app.stores.permissions;
    let key = AceKey::new(
        AclKey::single(Identifier::from_parts(5, 1)).child(Identifier::from_parts(5, 2)),
        Principal::User("heidi".into()),
    );

    store
        .merge(
            std::slice::from_ref(&key),
            PermissionSet::of(&[Permission::Read]),
            SecurableObjectType::Study,
            never_expires(),
        )
        .await
        .unwrap();
    store
        .merge(
            std::slice::from_ref(&key),
            PermissionSet::of(&[Permission::Write]),
            SecurableObjectType::Unknown,
            never_expires(),
        )
        .await
        .unwrap();

    let value = store.get(&key).await.unwrap().unwrap();
    assert_eq!(
        value.permissions,
        PermissionSet::of(&[Permission::Read, Permission::Write])
    );
    assert_eq!(value.securable_object_type, SecurableObjectType::Study);

    let by_root = store
        .query(&AceQuery::by_root(Identifier::from_parts(5, 1)))
        .await
        .unwrap();
    assert_eq!(by_root.len(), 1);

    store
        .subtract(std::slice::from_ref(&key), PermissionSet::all())
        .await
        .unwrap();
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL and Redis
#[serial]
async fn merge_keeps_the_later_expiration() {
    let app = app().await;
    let store = &app.stores.permissions;
    let key = AceKey::new(
        AclKey::single(Identifier::from_parts(6, 1)),
        Principal::User("ivan".into()),
    );
    let expired = Utc::now() - Duration::minutes(1);

    store
        .merge(
            std::slice::from_ref(&key),
            PermissionSet::of(&[Permission::Read]),
            SecurableObjectType::Study,
            expired,
        )
        .await
        .unwrap();
    store
        .merge(
            std::slice::from_ref(&key),
            PermissionSet::of(&[Permission::Read]),
            SecurableObjectType::Study,
            never_expires(),
        )
        .await
        .unwrap();
    store
        .merge(
            std::slice::from_ref(&key),
            PermissionSet::of(&[Permission::Write]),
            SecurableObjectType::Study,
            expired,
        )
        .await
        .unwrap();

    let value = store.get(&key).await.unwrap().unwrap();
    assert!(value.is_active_at(Utc::now()));
    assert_eq!(value.expiration_date, never_expires());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL and Redis
#[serial]
async fn bootstrap_survives_restart() {
    let app = app().await;
    app.state.authorization.bootstrap().await.unwrap();

    let admin = app
        .state
        .authorization
        .lookup(&Principal::Role("admin".into()))
        .await
        .unwrap();
    assert_eq!(admin.acl_key.len(), 2);

    let health = identity_service::health_check(service_core::axum::extract::State(
        app.state.clone(),
    ))
    .await;
    assert!(health.is_ok());
}
