//! PostgreSQL `IdentityStore`.
//!
//! State transitions are conditional single statements (`UPDATE ... WHERE
//! status_code = $expected RETURNING *`); writes that touch several rows run in
//! one transaction, which rolls back if the future is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use super::{AuditPage, AuditQuery, ContextMutation, IdentityStore, VariantDeletion};
use crate::config::DatabaseConfig;
use crate::models::{
    AuditEntry, AuthSession, BearerToken, ClientRegistration, ConsentGrant, ConsentStatus,
    Context, ContextAssignment, NameVariant, Profile,
};

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Serialize preferred-flag writes for one profile.
async fn lock_profile(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    profile_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("SELECT profile_id FROM profiles WHERE profile_id = $1 FOR UPDATE")
        .bind(profile_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== Profiles ====================

    async fn insert_profile(
        &self,
        profile: &Profile,
        permanent: &Context,
    ) -> Result<bool, AppError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            WITH new_profile AS (
                INSERT INTO profiles (profile_id, email, created_utc)
                VALUES ($1, $2, $3)
                ON CONFLICT (email) DO NOTHING
                RETURNING profile_id
            )
            INSERT INTO contexts (context_id, profile_id, context_name, description, is_permanent, created_utc)
            SELECT $4, profile_id, $5, $6, TRUE, $3 FROM new_profile
            RETURNING context_id
            "#,
        )
        .bind(profile.profile_id)
        .bind(&profile.email)
        .bind(profile.created_utc)
        .bind(permanent.context_id)
        .bind(&permanent.context_name)
        .bind(&permanent.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(inserted.is_some())
    }

    async fn find_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, AppError> {
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE profile_id = $1")
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    // ==================== Name variants ====================

    async fn insert_name_variant(&self, variant: &NameVariant) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if variant.is_preferred {
            lock_profile(&mut tx, variant.profile_id).await?;
            sqlx::query(
                "UPDATE name_variants SET is_preferred = FALSE, updated_utc = $2 WHERE profile_id = $1 AND is_preferred",
            )
            .bind(variant.profile_id)
            .bind(variant.updated_utc)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query(
            r#"
            INSERT INTO name_variants (variant_id, profile_id, name_text, is_preferred, metadata, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(variant.variant_id)
        .bind(variant.profile_id)
        .bind(&variant.name_text)
        .bind(variant.is_preferred)
        .bind(&variant.metadata)
        .bind(variant.created_utc)
        .bind(variant.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn find_name_variant(&self, variant_id: Uuid) -> Result<Option<NameVariant>, AppError> {
        sqlx::query_as::<_, NameVariant>("SELECT * FROM name_variants WHERE variant_id = $1")
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_name_variants(&self, profile_id: Uuid) -> Result<Vec<NameVariant>, AppError> {
        sqlx::query_as::<_, NameVariant>(
            "SELECT * FROM name_variants WHERE profile_id = $1 ORDER BY created_utc, variant_id",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_fallback_variant(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<NameVariant>, AppError> {
        sqlx::query_as::<_, NameVariant>(
            r#"
            SELECT * FROM name_variants
            WHERE profile_id = $1
            ORDER BY is_preferred DESC, created_utc ASC, variant_id ASC
            LIMIT 1
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn set_preferred_variant(
        &self,
        profile_id: Uuid,
        variant_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        lock_profile(&mut tx, profile_id).await?;

        let owned = sqlx::query_scalar::<_, Uuid>(
            "SELECT variant_id FROM name_variants WHERE profile_id = $1 AND variant_id = $2 FOR UPDATE",
        )
        .bind(profile_id)
        .bind(variant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE name_variants SET is_preferred = FALSE, updated_utc = NOW() WHERE profile_id = $1 AND is_preferred AND variant_id <> $2",
        )
        .bind(profile_id)
        .bind(variant_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE name_variants SET is_preferred = TRUE, updated_utc = NOW() WHERE variant_id = $1 AND NOT is_preferred",
        )
        .bind(variant_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn delete_name_variant(
        &self,
        profile_id: Uuid,
        variant_id: Uuid,
    ) -> Result<VariantDeletion, AppError> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM name_variants
            WHERE variant_id = $1 AND profile_id = $2
              AND NOT EXISTS (SELECT 1 FROM context_assignments WHERE variant_id = $1)
            "#,
        )
        .bind(variant_id)
        .bind(profile_id)
        .execute(&self.pool)
        .await;

        match deleted {
            Ok(result) if result.rows_affected() > 0 => Ok(VariantDeletion::Deleted),
            // Lost a race with a concurrent assignment; the foreign key refused it.
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Ok(VariantDeletion::InUse)
            }
            Err(e) => Err(db_err(e)),
            Ok(_) => match self.find_name_variant(variant_id).await? {
                Some(v) if v.profile_id == profile_id => Ok(VariantDeletion::InUse),
                _ => Ok(VariantDeletion::NotFound),
            },
        }
    }

    // ==================== Contexts ====================

    async fn insert_context(&self, context: &Context) -> Result<bool, AppError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO contexts (context_id, profile_id, context_name, description, is_permanent, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(context.context_id)
        .bind(context.profile_id)
        .bind(&context.context_name)
        .bind(&context.description)
        .bind(context.is_permanent)
        .bind(context.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn find_context(&self, context_id: Uuid) -> Result<Option<Context>, AppError> {
        sqlx::query_as::<_, Context>("SELECT * FROM contexts WHERE context_id = $1")
            .bind(context_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_context_by_name(
        &self,
        profile_id: Uuid,
        context_name: &str,
    ) -> Result<Option<Context>, AppError> {
        sqlx::query_as::<_, Context>(
            "SELECT * FROM contexts WHERE profile_id = $1 AND LOWER(context_name) = LOWER($2)",
        )
        .bind(profile_id)
        .bind(context_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_permanent_context(&self, profile_id: Uuid) -> Result<Option<Context>, AppError> {
        sqlx::query_as::<_, Context>(
            "SELECT * FROM contexts WHERE profile_id = $1 AND is_permanent",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_contexts(&self, profile_id: Uuid) -> Result<Vec<Context>, AppError> {
        sqlx::query_as::<_, Context>(
            "SELECT * FROM contexts WHERE profile_id = $1 ORDER BY is_permanent DESC, created_utc",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn rename_context(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
        context_name: &str,
        description: Option<&str>,
    ) -> Result<ContextMutation, AppError> {
        let renamed = sqlx::query_as::<_, Context>(
            r#"
            UPDATE contexts
            SET context_name = $3, description = COALESCE($4, description)
            WHERE context_id = $1 AND profile_id = $2 AND NOT is_permanent
            RETURNING *
            "#,
        )
        .bind(context_id)
        .bind(profile_id)
        .bind(context_name)
        .bind(description)
        .fetch_optional(&self.pool)
        .await;

        match renamed {
            Ok(Some(context)) => Ok(ContextMutation::Applied(Some(context))),
            Ok(None) => self.classify_context_miss(profile_id, context_id).await,
            Err(e) if is_unique_violation(&e) => Ok(ContextMutation::DuplicateName),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn delete_context(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
    ) -> Result<ContextMutation, AppError> {
        // Assignments, consents, sessions and tokens bound to the context cascade.
        let deleted = sqlx::query(
            r#"
            DELETE FROM contexts
            WHERE context_id = $1 AND profile_id = $2 AND NOT is_permanent
              AND NOT EXISTS (
                  SELECT 1 FROM consent_grants
                  WHERE context_id = $1 AND status_code = 'granted'
              )
            "#,
        )
        .bind(context_id)
        .bind(profile_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if deleted.rows_affected() > 0 {
            return Ok(ContextMutation::Applied(None));
        }
        self.classify_context_miss(profile_id, context_id).await
    }

    // ==================== Assignments ====================

    async fn upsert_assignment(&self, assignment: &ContextAssignment) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if assignment.is_primary {
            sqlx::query(
                "UPDATE context_assignments SET is_primary = FALSE WHERE context_id = $1 AND is_primary",
            )
            .bind(assignment.context_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query(
            r#"
            INSERT INTO context_assignments (context_id, property_code, variant_id, is_primary, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (context_id, property_code)
            DO UPDATE SET variant_id = EXCLUDED.variant_id, is_primary = EXCLUDED.is_primary
            "#,
        )
        .bind(assignment.context_id)
        .bind(&assignment.property_code)
        .bind(assignment.variant_id)
        .bind(assignment.is_primary)
        .bind(assignment.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn remove_assignment(
        &self,
        context_id: Uuid,
        property_code: &str,
    ) -> Result<bool, AppError> {
        let removed = sqlx::query(
            "DELETE FROM context_assignments WHERE context_id = $1 AND property_code = $2",
        )
        .bind(context_id)
        .bind(property_code)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(removed.rows_affected() > 0)
    }

    async fn list_assignments(
        &self,
        context_id: Uuid,
    ) -> Result<Vec<ContextAssignment>, AppError> {
        sqlx::query_as::<_, ContextAssignment>(
            "SELECT * FROM context_assignments WHERE context_id = $1 ORDER BY property_code",
        )
        .bind(context_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_primary_variant(
        &self,
        context_id: Uuid,
    ) -> Result<Option<NameVariant>, AppError> {
        sqlx::query_as::<_, NameVariant>(
            r#"
            SELECT v.* FROM context_assignments a
            JOIN name_variants v ON v.variant_id = a.variant_id
            WHERE a.context_id = $1 AND a.is_primary
            "#,
        )
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    // ==================== Consent ====================

    async fn find_consent(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Option<ConsentGrant>, AppError> {
        sqlx::query_as::<_, ConsentGrant>(
            "SELECT * FROM consent_grants WHERE granter_id = $1 AND requester_id = $2",
        )
        .bind(granter_id)
        .bind(requester_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_context_consents(
        &self,
        context_id: Uuid,
    ) -> Result<Vec<ConsentGrant>, AppError> {
        sqlx::query_as::<_, ConsentGrant>(
            "SELECT * FROM consent_grants WHERE context_id = $1 ORDER BY created_utc",
        )
        .bind(context_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn save_consent_request(
        &self,
        request: &ConsentGrant,
        replacing: Option<&ConsentGrant>,
    ) -> Result<Option<ConsentGrant>, AppError> {
        match replacing {
            None => sqlx::query_as::<_, ConsentGrant>(
                r#"
                INSERT INTO consent_grants (consent_id, granter_id, requester_id, context_id, status_code, created_utc, expiry_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (granter_id, requester_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(request.consent_id)
            .bind(request.granter_id)
            .bind(request.requester_id)
            .bind(request.context_id)
            .bind(&request.status_code)
            .bind(request.created_utc)
            .bind(request.expiry_utc)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err),

            Some(prior) => sqlx::query_as::<_, ConsentGrant>(
                r#"
                UPDATE consent_grants
                SET context_id = $2, status_code = $3, created_utc = $4,
                    granted_utc = NULL, revoked_utc = NULL, expiry_utc = $5
                WHERE consent_id = $1
                  AND status_code = $6
                  AND created_utc = $7
                  AND expiry_utc IS NOT DISTINCT FROM $8
                RETURNING *
                "#,
            )
            .bind(prior.consent_id)
            .bind(request.context_id)
            .bind(&request.status_code)
            .bind(request.created_utc)
            .bind(request.expiry_utc)
            .bind(&prior.status_code)
            .bind(prior.created_utc)
            .bind(prior.expiry_utc)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err),
        }
    }

    async fn transition_consent(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        from: ConsentStatus,
        to: ConsentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ConsentGrant>, AppError> {
        let stamp_column = match to {
            ConsentStatus::Granted => "granted_utc",
            ConsentStatus::Revoked => "revoked_utc",
            ConsentStatus::Pending => "created_utc",
        };
        let sql = format!(
            r#"
            UPDATE consent_grants
            SET status_code = $3, {stamp_column} = $5
            WHERE granter_id = $1 AND requester_id = $2 AND status_code = $4
            RETURNING *
            "#
        );

        sqlx::query_as::<_, ConsentGrant>(&sql)
            .bind(granter_id)
            .bind(requester_id)
            .bind(to.as_str())
            .bind(from.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    // ==================== Clients ====================

    async fn upsert_client(
        &self,
        client: &ClientRegistration,
    ) -> Result<ClientRegistration, AppError> {
        sqlx::query_as::<_, ClientRegistration>(
            r#"
            INSERT INTO client_registrations (client_id, display_name, publisher_domain, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (client_id)
            DO UPDATE SET display_name = EXCLUDED.display_name, updated_utc = EXCLUDED.updated_utc
            RETURNING *
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.display_name)
        .bind(&client.publisher_domain)
        .bind(client.created_utc)
        .bind(client.updated_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<ClientRegistration>, AppError> {
        sqlx::query_as::<_, ClientRegistration>(
            "SELECT * FROM client_registrations WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    // ==================== Sessions and tokens ====================

    async fn insert_auth_session(&self, session: &AuthSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (session_id, token_hash, client_id, profile_id, context_id, return_url, state, created_utc, expiry_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.session_id)
        .bind(&session.token_hash)
        .bind(&session.client_id)
        .bind(session.profile_id)
        .bind(session.context_id)
        .bind(&session.return_url)
        .bind(&session.state)
        .bind(session.created_utc)
        .bind(session.expiry_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_auth_session(&self, token_hash: &str) -> Result<Option<AuthSession>, AppError> {
        sqlx::query_as::<_, AuthSession>("SELECT * FROM auth_sessions WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn redeem_auth_session(
        &self,
        token_hash: &str,
        bearer: &BearerToken,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthSession>, AppError> {
        sqlx::query_as::<_, AuthSession>(
            r#"
            WITH redeemed AS (
                UPDATE auth_sessions
                SET used_utc = $2
                WHERE token_hash = $1 AND used_utc IS NULL AND expiry_utc > $2
                RETURNING *
            ), issued AS (
                INSERT INTO bearer_tokens (token_id, token_hash, profile_id, client_id, context_id, issued_utc, expiry_utc)
                SELECT $3, $4, profile_id, client_id, context_id, $5, $6 FROM redeemed
            )
            SELECT * FROM redeemed
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .bind(bearer.token_id)
        .bind(&bearer.token_hash)
        .bind(bearer.issued_utc)
        .bind(bearer.expiry_utc)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_bearer_token(&self, token_hash: &str) -> Result<Option<BearerToken>, AppError> {
        sqlx::query_as::<_, BearerToken>("SELECT * FROM bearer_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    // ==================== Audit ====================

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_entries (entry_id, action_code, actor_id, target_id, context_id, resolved_name, request_id, details, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (entry_id) DO NOTHING
            "#,
        )
        .bind(entry.entry_id)
        .bind(&entry.action_code)
        .bind(entry.actor_id)
        .bind(entry.target_id)
        .bind(entry.context_id)
        .bind(&entry.resolved_name)
        .bind(&entry.request_id)
        .bind(&entry.details)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage, AppError> {
        let action = query.action.map(|a| a.as_str());

        let (total, filtered) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (
                    WHERE ($2::TEXT IS NULL OR action_code = $2)
                      AND ($3::TIMESTAMPTZ IS NULL OR created_utc >= $3)
                      AND ($4::TIMESTAMPTZ IS NULL OR created_utc <= $4)
                )
            FROM audit_entries
            WHERE actor_id = $1 OR target_id = $1
            "#,
        )
        .bind(query.subject_id)
        .bind(action)
        .bind(query.date_from)
        .bind(query.date_to)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_entries
            WHERE (actor_id = $1 OR target_id = $1)
              AND ($2::TEXT IS NULL OR action_code = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_utc >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_utc <= $4)
            ORDER BY created_utc DESC, entry_id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(query.subject_id)
        .bind(action)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(AuditPage {
            entries,
            total,
            filtered,
        })
    }
}

impl PgStore {
    async fn classify_context_miss(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
    ) -> Result<ContextMutation, AppError> {
        match self.find_context(context_id).await? {
            Some(ctx) if ctx.profile_id == profile_id && ctx.is_permanent => {
                Ok(ContextMutation::Permanent)
            }
            Some(ctx) if ctx.profile_id == profile_id => {
                let granted = self
                    .list_context_consents(context_id)
                    .await?
                    .iter()
                    .any(|c| c.status() == ConsentStatus::Granted);
                if granted {
                    Ok(ContextMutation::ConsentsBound)
                } else {
                    Ok(ContextMutation::NotFound)
                }
            }
            _ => Ok(ContextMutation::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> PgStore {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/identity_test".to_string()),
            max_connections: 2,
            min_connections: 1,
        };
        let store = PgStore::connect(&config).await.expect("connect to test database");
        store.migrate().await.expect("migrate");
        store
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn session_redeems_once() {
        let store = connect().await;
        let profile = Profile::new(&format!("{}@example.com", Uuid::new_v4()));
        let public = Context::permanent(profile.profile_id);
        assert!(store.insert_profile(&profile, &public).await.unwrap());

        let client = store
            .upsert_client(&ClientRegistration::new("app.example.com", "App"))
            .await
            .unwrap();
        let session = AuthSession::new(
            "session-token",
            client.client_id.clone(),
            profile.profile_id,
            public.context_id,
            "https://app.example.com/cb".into(),
            "state".into(),
            chrono::Duration::minutes(5),
        );
        store.insert_auth_session(&session).await.unwrap();

        let now = Utc::now();
        let bearer = BearerToken::for_session(Uuid::new_v4(), "bearer-1", &session, now, now + chrono::Duration::hours(1));
        assert!(store.redeem_auth_session(&session.token_hash, &bearer, now).await.unwrap().is_some());

        let replay = BearerToken::for_session(Uuid::new_v4(), "bearer-2", &session, now, now + chrono::Duration::hours(1));
        assert!(store.redeem_auth_session(&session.token_hash, &replay, now).await.unwrap().is_none());
        assert!(store.find_bearer_token(&replay.token_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn grant_is_compare_and_set() {
        let store = connect().await;
        let granter = Profile::new(&format!("{}@example.com", Uuid::new_v4()));
        let requester = Profile::new(&format!("{}@example.com", Uuid::new_v4()));
        let public = Context::permanent(granter.profile_id);
        store.insert_profile(&granter, &public).await.unwrap();
        store
            .insert_profile(&requester, &Context::permanent(requester.profile_id))
            .await
            .unwrap();

        let request = ConsentGrant::request(granter.profile_id, requester.profile_id, public.context_id, None);
        store.save_consent_request(&request, None).await.unwrap().unwrap();

        let (a, b) = tokio::join!(
            store.transition_consent(granter.profile_id, requester.profile_id, ConsentStatus::Pending, ConsentStatus::Granted, Utc::now()),
            store.transition_consent(granter.profile_id, requester.profile_id, ConsentStatus::Pending, ConsentStatus::Granted, Utc::now()),
        );
        assert_eq!(
            [a.unwrap().is_some(), b.unwrap().is_some()].iter().filter(|x| **x).count(),
            1
        );
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn concurrent_preferred_inserts_leave_one_preferred() {
        let store = connect().await;
        let profile = Profile::new(&format!("{}@example.com", Uuid::new_v4()));
        store
            .insert_profile(&profile, &Context::permanent(profile.profile_id))
            .await
            .unwrap();

        let first = NameVariant::new(profile.profile_id, "Jane".into(), true, None);
        let second = NameVariant::new(profile.profile_id, "Janie".into(), true, None);
        let (a, b) = tokio::join!(
            store.insert_name_variant(&first),
            store.insert_name_variant(&second),
        );
        a.unwrap();
        b.unwrap();

        let variants = store.list_name_variants(profile.profile_id).await.unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants.iter().filter(|v| v.is_preferred).count(), 1);
    }
}
