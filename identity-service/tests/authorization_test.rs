//! Permission resolution through the principal graph.

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use identity_service::models::{
    AceKey, AceQuery, AuditEventType, Permission, PermissionSet, Principal, SecurableObjectType,
    SecurablePrincipal,
};
use identity_service::services::authorization::{
    admin_role, authenticated_user_role, system_principal,
};
use identity_service::services::{AuthorizationEngine, NewPrincipal, PermissionStore};

async fn create(
    engine: &AuthorizationEngine,
    principal: Principal,
    parent: Option<&SecurablePrincipal>,
) -> SecurablePrincipal {
    let title = principal.id().to_string();
    engine
        .create_principal(
            &system_principal(),
            NewPrincipal {
                principal,
                title,
                description: String::new(),
                parent: parent.map(|p| p.acl_key.clone()),
            },
        )
        .await
        .expect("Failed to create principal")
}

fn read() -> PermissionSet {
    PermissionSet::of(&[Permission::Read])
}

#[tokio::test]
async fn organization_role_user_scenario() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;

    let org = create(engine, Principal::Organization("org1".into()), None).await;
    let r1 = create(engine, Principal::Role("r1".into()), Some(&org)).await;
    engine
        .grant(&org.acl_key, &r1.principal, read(), SecurableObjectType::Role, None)
        .await
        .unwrap();
    engine
        .grant(&r1.acl_key, &r1.principal, read(), SecurableObjectType::Role, None)
        .await
        .unwrap();

    let r2 = create(engine, Principal::Role("r2".into()), Some(&org)).await;
    engine
        .add_principal_to_principal(&r2.acl_key, &r1.acl_key)
        .await
        .unwrap();
    let user = create(engine, Principal::User("u".into()), None).await;
    engine
        .add_principal_to_principal(&user.acl_key, &r2.acl_key)
        .await
        .unwrap();

    for target in [&org.acl_key, &r1.acl_key] {
        assert!(engine
            .has_permission(&user.principal, target, Permission::Read)
            .await
            .unwrap());
    }

    engine
        .remove_principal_from_principal(&user.acl_key, &r2.acl_key)
        .await
        .unwrap();

    for target in [&org.acl_key, &r1.acl_key] {
        assert!(!engine
            .has_permission(&user.principal, target, Permission::Read)
            .await
            .unwrap());
    }
    assert_eq!(app.audit.count(AuditEventType::MembershipRemoved), 1);
}

#[tokio::test]
async fn grants_on_a_child_key_do_not_reach_the_parent_key() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;

    let org = create(engine, Principal::Organization("org2".into()), None).await;
    let role = create(engine, Principal::Role("viewer".into()), Some(&org)).await;
    engine
        .grant(&role.acl_key, &role.principal, read(), SecurableObjectType::Role, None)
        .await
        .unwrap();

    assert!(!engine
        .has_permission(&role.principal, &org.acl_key, Permission::Read)
        .await
        .unwrap());
}

#[tokio::test]
async fn merge_is_a_monotonic_union() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;
    let org = create(engine, Principal::Organization("org3".into()), None).await;
    let alice = Principal::User("alice".into());

    engine
        .grant(&org.acl_key, &alice, read(), SecurableObjectType::Organization, None)
        .await
        .unwrap();
    engine
        .grant(
            &org.acl_key,
            &alice,
            PermissionSet::of(&[Permission::Write, Permission::Read]),
            SecurableObjectType::Organization,
            None,
        )
        .await
        .unwrap();

    let value = app
        .stores
        .permissions
        .get(&AceKey::new(org.acl_key.clone(), alice.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        value.permissions,
        PermissionSet::of(&[Permission::Read, Permission::Write])
    );

    engine
        .revoke(&org.acl_key, &alice, PermissionSet::of(&[Permission::Read, Permission::Write]))
        .await
        .unwrap();
    assert!(!app
        .stores
        .permissions
        .exists(&AceKey::new(org.acl_key.clone(), alice))
        .await
        .unwrap());
}

#[tokio::test]
async fn expired_inherited_grants_do_not_count() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;
    let org = create(engine, Principal::Organization("org4".into()), None).await;
    let role = create(engine, Principal::Role("temp".into()), Some(&org)).await;
    let user = create(engine, Principal::User("dave".into()), None).await;
    engine
        .add_principal_to_principal(&user.acl_key, &role.acl_key)
        .await
        .unwrap();

    engine
        .grant(
            &org.acl_key,
            &role.principal,
            read(),
            SecurableObjectType::Organization,
            Some(Utc::now() - Duration::minutes(1)),
        )
        .await
        .unwrap();
    assert!(!engine
        .has_permission(&user.principal, &org.acl_key, Permission::Read)
        .await
        .unwrap());

    engine
        .grant(
            &org.acl_key,
            &user.principal,
            read(),
            SecurableObjectType::Organization,
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();
    assert!(engine
        .has_permission(&user.principal, &org.acl_key, Permission::Read)
        .await
        .unwrap());
}

#[tokio::test]
async fn grant_renews_an_expired_entry() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;
    let org = create(engine, Principal::Organization("org6".into()), None).await;
    let bob = Principal::User("bob".into());

    engine
        .grant(
            &org.acl_key,
            &bob,
            read(),
            SecurableObjectType::Study,
            Some(Utc::now() - Duration::minutes(1)),
        )
        .await
        .unwrap();
    assert!(!engine
        .has_permission(&bob, &org.acl_key, Permission::Read)
        .await
        .unwrap());

    engine
        .grant(&org.acl_key, &bob, read(), SecurableObjectType::Study, None)
        .await
        .unwrap();
    assert!(engine
        .has_permission(&bob, &org.acl_key, Permission::Read)
        .await
        .unwrap());

    engine
        .grant(
            &org.acl_key,
            &bob,
            PermissionSet::of(&[Permission::Write]),
            SecurableObjectType::Study,
            Some(Utc::now() + Duration::minutes(5)),
        )
        .await
        .unwrap();
    assert!(engine
        .has_permission(&bob, &org.acl_key, Permission::Write)
        .await
        .unwrap());

    let value = app
        .stores
        .permissions
        .get(&AceKey::new(org.acl_key.clone(), bob))
        .await
        .unwrap()
        .unwrap();
    assert!(value.expiration_date > Utc::now() + Duration::days(365));
}

#[tokio::test]
async fn admin_inherits_authenticated_user_grants() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;
    let org = create(engine, Principal::Organization("org5".into()), None).await;

    engine
        .grant(
            &org.acl_key,
            &authenticated_user_role().principal,
            PermissionSet::of(&[Permission::Discover]),
            SecurableObjectType::Organization,
            None,
        )
        .await
        .unwrap();

    assert!(engine
        .has_permission(&admin_role().principal, &org.acl_key, Permission::Discover)
        .await
        .unwrap());
}

#[tokio::test]
async fn query_filters_by_root_and_principal_type() {
    let app = TestApp::memory().await;
    let engine = &app.state.authorization;
    let org = create(engine, Principal::Organization("org6".into()), None).await;
    let role = create(engine, Principal::Role("auditor".into()), Some(&org)).await;
    engine
        .grant(&role.acl_key, &Principal::User("erin".into()), read(), SecurableObjectType::Role, None)
        .await
        .unwrap();

    let by_root = engine
        .query(&AceQuery::by_root(org.id()))
        .await
        .unwrap();
    // Owner grants on org and role plus erin's grant
    assert_eq!(by_root.len(), 3);

    let users_only = engine
        .query(&AceQuery {
            root: Some(org.id()),
            principal_type: Some(identity_service::models::PrincipalType::User),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(users_only.len(), 1);
    assert_eq!(users_only[0].key.principal, Principal::User("erin".into()));
}
