//! PostgreSQL backend for every store trait.
//!
//! Batched lookups by AclKey filter on the last path element (indexed) and
//! drop false positives in memory, since sqlx cannot bind arrays of arrays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};
use uuid::Uuid;

use super::error::StoreError;
use super::store::{
    HealthCheck, MembershipStore, PermissionStore, PrincipalDirectory, RangeStore,
    ReservationStore,
};
use crate::models::{
    Ace, AceKey, AceQuery, AceValue, AclKey, Identifier, PermissionSet, Principal, PrincipalType,
    Range, Reservation, ScrollResult, SecurableObjectType, SecurablePrincipal,
};

const PERMISSION_COLUMNS: &str =
    "acl_key, principal_type, principal_id, permissions, securable_object_type, expiration_date";

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== Row mapping ====================

fn acl_key_from_row(uuids: Vec<Uuid>) -> Result<AclKey, StoreError> {
    AclKey::from_uuids(uuids).ok_or_else(|| StoreError::Corrupt("empty acl key".to_string()))
}

fn principal_from_row(principal_type: &str, principal_id: String) -> Result<Principal, StoreError> {
    let principal_type: PrincipalType = principal_type
        .parse()
        .map_err(StoreError::Corrupt)?;
    Ok(Principal::new(principal_type, principal_id))
}

fn leaf_ids(keys: &[AclKey]) -> Vec<Uuid> {
    keys.iter().map(|k| k.leaf().as_uuid()).collect()
}

#[derive(FromRow)]
struct ReservationRow {
    acl_key: Vec<Uuid>,
    securable_object_type: String,
    securable_object_id: Uuid,
    securable_object_name: String,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            acl_key: acl_key_from_row(row.acl_key)?,
            securable_object_type: SecurableObjectType::from_stored(Some(
                &row.securable_object_type,
            )),
            securable_object_id: Identifier::new(row.securable_object_id),
            securable_object_name: row.securable_object_name,
        })
    }
}

#[derive(FromRow)]
struct PermissionRow {
    acl_key: Vec<Uuid>,
    principal_type: String,
    principal_id: String,
    permissions: Vec<String>,
    securable_object_type: Option<String>,
    expiration_date: DateTime<Utc>,
}

impl TryFrom<PermissionRow> for Ace {
    type Error = StoreError;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        Ok(Ace {
            key: AceKey::new(
                acl_key_from_row(row.acl_key)?,
                principal_from_row(&row.principal_type, row.principal_id)?,
            ),
            value: AceValue::new(
                PermissionSet::from_names(&row.permissions),
                SecurableObjectType::from_stored(row.securable_object_type.as_deref()),
                row.expiration_date,
            ),
        })
    }
}

#[derive(FromRow)]
struct PrincipalRow {
    acl_key: Vec<Uuid>,
    principal_type: String,
    principal_id: String,
    title: String,
    description: String,
}

impl TryFrom<PrincipalRow> for SecurablePrincipal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        Ok(SecurablePrincipal::new(
            acl_key_from_row(row.acl_key)?,
            principal_from_row(&row.principal_type, row.principal_id)?,
            row.title,
            row.description,
        ))
    }
}

#[async_trait]
impl HealthCheck for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::Database(e)
        })?;
        Ok(())
    }
}

// ==================== Ranges ====================

#[async_trait]
impl RangeStore for Database {
    #[instrument(skip(self))]
    async fn initialize_partitions(&self, partitions: u32) -> Result<(), StoreError> {
        let ranges: Vec<Range> = (0..partitions.min(u16::MAX as u32 + 1))
            .map(|p| Range::initial(p as u16))
            .collect();

        let result = sqlx::query(
            r#"
            INSERT INTO id_ranges (partition_index, msb, lsb)
            SELECT * FROM UNNEST($1::int[], $2::bigint[], $3::bigint[])
            ON CONFLICT (partition_index) DO NOTHING
            "#,
        )
        .bind(ranges.iter().map(|r| r.partition_index).collect::<Vec<_>>())
        .bind(ranges.iter().map(|r| r.msb).collect::<Vec<_>>())
        .bind(ranges.iter().map(|r| r.lsb).collect::<Vec<_>>())
        .execute(&self.pool)
        .await?;

        info!(
            partitions = partitions,
            created = result.rows_affected(),
            "Id partitions initialized"
        );
        Ok(())
    }

    async fn get_range(&self, partition: u16) -> Result<Option<Range>, StoreError> {
        let range = sqlx::query_as::<_, Range>(
            "SELECT partition_index, msb, lsb FROM id_ranges WHERE partition_index = $1",
        )
        .bind(partition as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(range)
    }

    async fn save_range(&self, range: &Range) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO id_ranges (partition_index, msb, lsb)
            VALUES ($1, $2, $3)
            ON CONFLICT (partition_index) DO UPDATE SET msb = $4, lsb = $5
            "#,
        )
        .bind(range.partition_index)
        .bind(range.msb)
        .bind(range.lsb)
        .bind(range.msb)
        .bind(range.lsb)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Locks the cursor rows, advances them and writes them back in one
    /// transaction.
    #[instrument(skip(self, partitions), fields(partitions = partitions.len()))]
    async fn scroll(&self, partitions: &[u16], count: u64) -> Result<ScrollResult, StoreError> {
        let indexes: Vec<i32> = partitions.iter().map(|&p| p as i32).collect();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, Range>(
            r#"
            SELECT partition_index, msb, lsb FROM id_ranges
            WHERE partition_index = ANY($1)
            FOR UPDATE
            "#,
        )
        .bind(&indexes)
        .fetch_all(&mut *tx)
        .await?;

        let mut cursors: HashMap<u16, Range> =
            rows.into_iter().map(|r| (r.partition(), r)).collect();
        let mut result = ScrollResult::default();
        let mut advanced = Vec::with_capacity(partitions.len());

        for &partition in partitions {
            let mut range = cursors
                .remove(&partition)
                .unwrap_or_else(|| Range::initial(partition));
            match range.advance(count) {
                Some(ids) => {
                    result.ids.extend(ids);
                    advanced.push(range);
                }
                None => result.exhausted.push(partition),
            }
        }

        if !advanced.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO id_ranges (partition_index, msb, lsb)
                SELECT * FROM UNNEST($1::int[], $2::bigint[], $3::bigint[])
                ON CONFLICT (partition_index) DO UPDATE
                SET msb = EXCLUDED.msb, lsb = EXCLUDED.lsb
                "#,
            )
            .bind(advanced.iter().map(|r| r.partition_index).collect::<Vec<_>>())
            .bind(advanced.iter().map(|r| r.msb).collect::<Vec<_>>())
            .bind(advanced.iter().map(|r| r.lsb).collect::<Vec<_>>())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result)
    }
}

// ==================== Reservations ====================

fn map_name_conflict(e: sqlx::Error, name: &str) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::NameTaken(name.to_string())
        }
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl ReservationStore for Database {
    #[instrument(skip(self, reservation), fields(name = %reservation.securable_object_name))]
    async fn insert_if_absent(
        &self,
        reservation: &Reservation,
    ) -> Result<Option<Identifier>, StoreError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO name_reservations (acl_key, securable_object_type, securable_object_id, securable_object_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING securable_object_id
            "#,
        )
        .bind(reservation.acl_key.to_uuids())
        .bind(reservation.securable_object_type.as_str())
        .bind(reservation.securable_object_id.as_uuid())
        .bind(&reservation.securable_object_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(Identifier::new))
    }

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT acl_key, securable_object_type, securable_object_id, securable_object_name
            FROM name_reservations
            WHERE securable_object_name = ANY($1)
            "#,
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn find_by_id(&self, id: Identifier) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT acl_key, securable_object_type, securable_object_id, securable_object_name
            FROM name_reservations
            WHERE securable_object_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Reservation::try_from).transpose()
    }

    async fn count_by_name(&self, name: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM name_reservations WHERE securable_object_name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn update_name_by_name(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE name_reservations SET securable_object_name = $2 WHERE securable_object_name = $1",
        )
        .bind(old_name)
        .bind(new_name)
        .execute(&self.pool)
        .await
        .map_err(|e| map_name_conflict(e, new_name))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_name_by_id(&self, id: Identifier, new_name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE name_reservations SET securable_object_name = $2 WHERE securable_object_id = $1",
        )
        .bind(id.as_uuid())
        .bind(new_name)
        .execute(&self.pool)
        .await
        .map_err(|e| map_name_conflict(e, new_name))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_names(&self, names: &[String]) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM name_reservations WHERE securable_object_name = ANY($1)")
                .bind(names)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_ids(&self, ids: &[Identifier]) -> Result<u64, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(Identifier::as_uuid).collect();
        let result =
            sqlx::query("DELETE FROM name_reservations WHERE securable_object_id = ANY($1)")
                .bind(&uuids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Permissions ====================

#[async_trait]
impl PermissionStore for Database {
    async fn get(&self, key: &AceKey) -> Result<Option<AceValue>, StoreError> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {} FROM permissions WHERE acl_key = $1 AND principal_type = $2 AND principal_id = $3",
            PERMISSION_COLUMNS
        ))
        .bind(key.acl_key.to_uuids())
        .bind(key.principal.principal_type().as_str())
        .bind(key.principal.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Ace::try_from).transpose()?.map(|ace| ace.value))
    }

    async fn get_many(&self, keys: &[AceKey]) -> Result<HashMap<AceKey, AceValue>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let acl_keys: Vec<AclKey> = keys.iter().map(|k| k.acl_key.clone()).collect();
        let principal_ids: Vec<String> = keys.iter().map(|k| k.principal.id().to_string()).collect();
        let wanted: HashSet<&AceKey> = keys.iter().collect();

        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            r#"
            SELECT {} FROM permissions
            WHERE acl_key[array_length(acl_key, 1)] = ANY($1) AND principal_id = ANY($2)
            "#,
            PERMISSION_COLUMNS
        ))
        .bind(leaf_ids(&acl_keys))
        .bind(&principal_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut values = HashMap::with_capacity(keys.len());
        for row in rows {
            let ace = Ace::try_from(row)?;
            if wanted.contains(&ace.key) {
                values.insert(ace.key, ace.value);
            }
        }
        Ok(values)
    }

    async fn exists(&self, key: &AceKey) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM permissions
                WHERE acl_key = $1 AND principal_type = $2 AND principal_id = $3
            )
            "#,
        )
        .bind(key.acl_key.to_uuids())
        .bind(key.principal.principal_type().as_str())
        .bind(key.principal.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn merge(
        &self,
        keys: &[AceKey],
        permissions: PermissionSet,
        object_type: SecurableObjectType,
        expiration_date: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let names = permissions.to_names();
        let mut tx = self.pool.begin().await?;

        for key in keys {
            sqlx::query(
                r#"
                INSERT INTO permissions (acl_key, principal_type, principal_id, permissions, securable_object_type, expiration_date)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (acl_key, principal_type, principal_id) DO UPDATE
                SET permissions = ARRAY(
                    SELECT DISTINCT p FROM unnest(permissions.permissions || EXCLUDED.permissions) AS p
                    ORDER BY p
                ),
                expiration_date = GREATEST(permissions.expiration_date, EXCLUDED.expiration_date)
                "#,
            )
            .bind(key.acl_key.to_uuids())
            .bind(key.principal.principal_type().as_str())
            .bind(key.principal.id())
            .bind(&names)
            .bind(object_type.as_str())
            .bind(expiration_date)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn subtract(
        &self,
        keys: &[AceKey],
        permissions: PermissionSet,
    ) -> Result<(), StoreError> {
        let names = permissions.to_names();
        let mut tx = self.pool.begin().await?;

        for key in keys {
            let acl_key = key.acl_key.to_uuids();
            let principal_type = key.principal.principal_type().as_str();

            sqlx::query(
                r#"
                UPDATE permissions
                SET permissions = ARRAY(
                    SELECT p FROM unnest(permissions.permissions) AS p WHERE p <> ALL($4)
                )
                WHERE acl_key = $1 AND principal_type = $2 AND principal_id = $3
                "#,
            )
            .bind(&acl_key)
            .bind(principal_type)
            .bind(key.principal.id())
            .bind(&names)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                DELETE FROM permissions
                WHERE acl_key = $1 AND principal_type = $2 AND principal_id = $3
                  AND cardinality(permissions) = 0
                "#,
            )
            .bind(&acl_key)
            .bind(principal_type)
            .bind(key.principal.id())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_title(&self, acl_key: &AclKey, title: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE principals SET title = $2 WHERE acl_key = $1")
            .bind(acl_key.to_uuids())
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_securable_object_type(
        &self,
        key: &AceKey,
        object_type: SecurableObjectType,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE permissions SET securable_object_type = $4
            WHERE acl_key = $1 AND principal_type = $2 AND principal_id = $3
            "#,
        )
        .bind(key.acl_key.to_uuids())
        .bind(key.principal.principal_type().as_str())
        .bind(key.principal.id())
        .bind(object_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_acl_key(&self, acl_key: &AclKey) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM permissions WHERE acl_key = $1")
            .bind(acl_key.to_uuids())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_principal(&self, principal: &Principal) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM permissions WHERE principal_type = $1 AND principal_id = $2")
                .bind(principal.principal_type().as_str())
                .bind(principal.id())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, query))]
    async fn query(&self, query: &AceQuery) -> Result<Vec<Ace>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM permissions WHERE TRUE",
            PERMISSION_COLUMNS
        ));

        if let Some(key) = &query.ace_key {
            qb.push(" AND acl_key = ")
                .push_bind(key.acl_key.to_uuids())
                .push(" AND principal_type = ")
                .push_bind(key.principal.principal_type().as_str())
                .push(" AND principal_id = ")
                .push_bind(key.principal.id().to_string());
        }
        if let Some(acl_key) = &query.acl_key {
            qb.push(" AND acl_key = ").push_bind(acl_key.to_uuids());
        }
        if let Some(principal) = &query.principal {
            qb.push(" AND principal_type = ")
                .push_bind(principal.principal_type().as_str())
                .push(" AND principal_id = ")
                .push_bind(principal.id().to_string());
        }
        if let Some(principal_type) = query.principal_type {
            qb.push(" AND principal_type = ")
                .push_bind(principal_type.as_str());
        }
        if let Some(object_type) = query.securable_object_type {
            qb.push(" AND securable_object_type = ")
                .push_bind(object_type.as_str());
        }
        if let Some(root) = query.root {
            qb.push(" AND acl_key[1] = ").push_bind(root.as_uuid());
        }
        if let Some(any) = query.any_permission {
            qb.push(" AND permissions && ").push_bind(any.to_names());
        }
        if let Some(after) = query.expires_after {
            qb.push(" AND expiration_date >= ").push_bind(after);
        }
        if let Some(before) = query.expires_before {
            qb.push(" AND expiration_date < ").push_bind(before);
        }
        qb.push(" ORDER BY acl_key, principal_type, principal_id");

        let rows = qb
            .build_query_as::<PermissionRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Ace::try_from).collect()
    }
}

// ==================== Memberships ====================

#[async_trait]
impl MembershipStore for Database {
    async fn add_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO principal_trees (acl_key, parent_acl_key)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(child.to_uuids())
        .bind(parent.to_uuids())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM principal_trees WHERE acl_key = $1 AND parent_acl_key = $2")
                .bind(child.to_uuids())
                .bind(parent.to_uuids())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_all_edges(&self, key: &AclKey) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM principal_trees WHERE acl_key = $1 OR parent_acl_key = $1")
                .bind(key.to_uuids())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn get_parents(
        &self,
        keys: &[AclKey],
    ) -> Result<HashMap<AclKey, HashSet<AclKey>>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Vec<Uuid>, Vec<Uuid>)>(
            r#"
            SELECT acl_key, parent_acl_key FROM principal_trees
            WHERE acl_key[array_length(acl_key, 1)] = ANY($1)
            "#,
        )
        .bind(leaf_ids(keys))
        .fetch_all(&self.pool)
        .await?;

        let wanted: HashSet<&AclKey> = keys.iter().collect();
        let mut parents: HashMap<AclKey, HashSet<AclKey>> = HashMap::new();
        for (child, parent) in rows {
            let child = acl_key_from_row(child)?;
            if wanted.contains(&child) {
                parents
                    .entry(child)
                    .or_default()
                    .insert(acl_key_from_row(parent)?);
            }
        }
        Ok(parents)
    }
}

// ==================== Principals ====================

#[async_trait]
impl PrincipalDirectory for Database {
    #[instrument(skip(self, principal), fields(principal = %principal.principal))]
    async fn create_if_not_exists(
        &self,
        principal: &SecurablePrincipal,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO principals (acl_key, principal_type, principal_id, title, description)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(principal.acl_key.to_uuids())
        .bind(principal.principal.principal_type().as_str())
        .bind(principal.principal.id())
        .bind(&principal.title)
        .bind(&principal.description)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn lookup(&self, principal: &Principal) -> Result<Option<SecurablePrincipal>, StoreError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT acl_key, principal_type, principal_id, title, description
            FROM principals
            WHERE principal_type = $1 AND principal_id = $2
            "#,
        )
        .bind(principal.principal_type().as_str())
        .bind(principal.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SecurablePrincipal::try_from).transpose()
    }

    async fn lookup_by_acl_keys(
        &self,
        keys: &[AclKey],
    ) -> Result<HashMap<AclKey, SecurablePrincipal>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT acl_key, principal_type, principal_id, title, description
            FROM principals
            WHERE acl_key[array_length(acl_key, 1)] = ANY($1)
            "#,
        )
        .bind(leaf_ids(keys))
        .fetch_all(&self.pool)
        .await?;

        let wanted: HashSet<&AclKey> = keys.iter().collect();
        let mut principals = HashMap::with_capacity(keys.len());
        for row in rows {
            let principal = SecurablePrincipal::try_from(row)?;
            if wanted.contains(&principal.acl_key) {
                principals.insert(principal.acl_key.clone(), principal);
            }
        }
        Ok(principals)
    }

    async fn delete_principal(
        &self,
        principal: &Principal,
    ) -> Result<Option<SecurablePrincipal>, StoreError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            DELETE FROM principals
            WHERE principal_type = $1 AND principal_id = $2
            RETURNING acl_key, principal_type, principal_id, title, description
            "#,
        )
        .bind(principal.principal_type().as_str())
        .bind(principal.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SecurablePrincipal::try_from).transpose()
    }
}
