//! User Storage
//! Mission: Persist user accounts and check credentials against bcrypt hashes

use crate::auth::models::{normalize_email, RoleCounts, User, UserRole};
use crate::error::{is_constraint_violation, StoreError};
use crate::storage::Database;
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

const USERS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
"#;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at";

/// Read side of the user records, as consumed by the authentication gate
/// and the login handler.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<User>, StoreError>;
    async fn verify_secret(&self, user: &User, candidate: &str) -> Result<bool, StoreError>;
}

/// Field changes for `UserStore::update_profile`.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// User storage with SQLite backend
pub struct UserStore {
    db: Database,
    hash_cost: u32,
}

impl UserStore {
    /// Create a new user store and initialize its schema
    pub fn new(db: Database) -> Result<Self, StoreError> {
        Self::with_hash_cost(db, DEFAULT_COST)
    }

    pub fn with_hash_cost(db: Database, hash_cost: u32) -> Result<Self, StoreError> {
        db.migrate(USERS_SCHEMA_SQL)?;
        Ok(Self { db, hash_cost })
    }

    /// Create a new user. The email is normalized before it is stored.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, StoreError> {
        let user = self.new_user(name, email, password, role).await?;
        let record = user.clone();

        self.db
            .call("create_user", move |conn| insert_user(conn, &record))
            .await?;

        info!(user_id = %user.id, role = %user.role, "created user");
        Ok(user)
    }

    /// Create an admin only if no admin exists yet. The check and the insert
    /// happen under one lock, so concurrent bootstraps cannot both succeed.
    /// Returns `Ok(None)` when an admin is already provisioned.
    pub async fn create_first_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = self.new_user(name, email, password, UserRole::Admin).await?;
        let record = user.clone();

        let created = self
            .db
            .call("create_first_admin", move |conn| {
                let tx = conn.transaction()?;
                let admins: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                    [],
                    |row| row.get(0),
                )?;
                if admins > 0 {
                    return Ok(false);
                }
                insert_user(&tx, &record)?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !created {
            return Ok(None);
        }
        info!(user_id = %user.id, "bootstrap admin created");
        Ok(Some(user))
    }

    /// List all users (admin only)
    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.db
            .call("list_users", |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
                ))?;
                let users = stmt
                    .query_map([], user_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await
    }

    pub async fn update_role(&self, id: &Uuid, role: UserRole) -> Result<User, StoreError> {
        let id = *id;
        let user = self
            .db
            .call("update_role", move |conn| {
                let rows = conn.execute(
                    "UPDATE users SET role = ?1 WHERE id = ?2",
                    params![role.as_str(), id.to_string()],
                )?;
                if rows == 0 {
                    return Err(StoreError::NotFound);
                }
                select_by_id(conn, &id)?.ok_or(StoreError::NotFound)
            })
            .await?;

        info!(user_id = %user.id, role = %user.role, "role updated");
        Ok(user)
    }

    /// Apply a profile change. The secret is re-hashed only when the
    /// submitted password differs from the current one.
    pub async fn update_profile(
        &self,
        id: &Uuid,
        update: ProfileUpdate,
    ) -> Result<User, StoreError> {
        let current = self.find_by_id(id).await?.ok_or(StoreError::NotFound)?;

        let new_hash = match update.password {
            Some(password) => {
                if self.verify_secret(&current, &password).await? {
                    None
                } else {
                    Some(self.hash_secret(password).await?)
                }
            }
            None => None,
        };
        let name = update.name.map(|n| n.trim().to_string());
        let email = update.email.map(|e| normalize_email(&e));
        let id = *id;

        let user = self
            .db
            .call("update_profile", move |conn| {
                let tx = conn.transaction()?;
                if let Some(name) = &name {
                    tx.execute(
                        "UPDATE users SET name = ?1 WHERE id = ?2",
                        params![name, id.to_string()],
                    )?;
                }
                if let Some(email) = &email {
                    tx.execute(
                        "UPDATE users SET email = ?1 WHERE id = ?2",
                        params![email, id.to_string()],
                    )
                    .map_err(|e| {
                        if is_constraint_violation(&e) {
                            StoreError::DuplicateEmail
                        } else {
                            StoreError::from(e)
                        }
                    })?;
                }
                if let Some(password_hash) = &new_hash {
                    tx.execute(
                        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                        params![password_hash, id.to_string()],
                    )?;
                }
                let user = select_by_id(&tx, &id)?.ok_or(StoreError::NotFound)?;
                tx.commit()?;
                Ok(user)
            })
            .await?;

        debug!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    /// Delete a user by ID (admin only)
    pub async fn delete_user(&self, id: &Uuid) -> Result<(), StoreError> {
        let id = *id;
        self.db
            .call("delete_user", move |conn| {
                let rows =
                    conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
                if rows == 0 {
                    return Err(StoreError::NotFound);
                }
                Ok(())
            })
            .await?;

        info!(user_id = %id, "deleted user");
        Ok(())
    }

    pub async fn role_counts(&self) -> Result<RoleCounts, StoreError> {
        self.db
            .call("role_counts", |conn| {
                let (total, admins): (i64, i64) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(role = 'admin'), 0) FROM users",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(RoleCounts {
                    total_users: total as u64,
                    admin_users: admins as u64,
                    regular_users: (total - admins) as u64,
                })
            })
            .await
    }

    async fn new_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, StoreError> {
        Ok(User {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email: normalize_email(email),
            password_hash: self.hash_secret(password.to_string()).await?,
            role,
            created_at: Utc::now(),
        })
    }

    async fn hash_secret(&self, password: String) -> Result<String, StoreError> {
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| StoreError::Unavailable(format!("hash task aborted: {e}")))?
            .map_err(|e| StoreError::Corrupt(format!("failed to hash password: {e}")))
    }
}

#[async_trait]
impl CredentialStore for UserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        self.db
            .call("find_by_email", move |conn| {
                let user = conn
                    .query_row(
                        &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                        params![email],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<User>, StoreError> {
        let id = *id;
        self.db
            .call("find_by_id", move |conn| select_by_id(conn, &id))
            .await
    }

    async fn verify_secret(&self, user: &User, candidate: &str) -> Result<bool, StoreError> {
        let candidate = candidate.to_string();
        let password_hash = user.password_hash.clone();
        tokio::task::spawn_blocking(move || verify(candidate, &password_hash))
            .await
            .map_err(|e| StoreError::Unavailable(format!("verify task aborted: {e}")))?
            .map_err(|e| StoreError::Corrupt(format!("stored hash unreadable: {e}")))
    }
}

fn insert_user(conn: &Connection, user: &User) -> Result<(), StoreError> {
    conn.execute(
        &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            user.id.to_string(),
            user.name,
            user.email,
            user.password_hash,
            user.role.as_str(),
            user.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            StoreError::DuplicateEmail
        } else {
            StoreError::from(e)
        }
    })?;
    Ok(())
}

fn select_by_id(conn: &Connection, id: &Uuid) -> Result<Option<User>, StoreError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let role: String = row.get(4)?;
    let created_at: String = row.get(5)?;

    Ok(User {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: UserRole::parse(&role).ok_or_else(|| {
            conversion_error(4, format!("unknown role '{role}'"))
        })?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| conversion_error(5, e))?
            .with_timezone(&Utc),
    })
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, err.into())
}
