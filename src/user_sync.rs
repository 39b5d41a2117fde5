use crate::authz::types::{Effect, GroupingEdge, PolicyChange, PolicyTuple, ANY_ACTION};
use crate::authz::{Enforcer, PolicyMutator};
use crate::errors::AppError;
use crate::storage;
use miette::{IntoDiagnostic, Result};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_ROLE: &str = "admins";

/// User definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefinition {
    /// Username (unique identifier)
    pub username: String,
    /// Plain text password (will be hashed)
    pub password: String,
    /// Roles the user is made a direct member of
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Root structure of the users JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersFile {
    pub users: Vec<UserDefinition>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Whether any group membership had to be added
    pub groups_changed: bool,
}

/// Sync users and their group memberships from a JSON file (idempotent)
pub async fn sync_users_from_file(
    db: &DatabaseConnection,
    mutator: &PolicyMutator,
    file_path: &Path,
) -> Result<SyncSummary> {
    tracing::info!(path = %file_path.display(), "Loading users");

    let content = fs::read_to_string(file_path).into_diagnostic().map_err(|e| {
        miette::miette!(
            "Failed to read users file at '{}': {}",
            file_path.display(),
            e
        )
    })?;

    let users_file: UsersFile = serde_json::from_str(&content).into_diagnostic().map_err(|e| {
        miette::miette!(
            "Failed to parse users JSON file: {}\n\nExpected format:\n{{\n  \"users\": [\n    {{\n      \"username\": \"alice\",\n      \"password\": \"secure-password\",\n      \"groups\": [\"clerks\"]\n    }}\n  ]\n}}",
            e
        )
    })?;

    tracing::info!(count = users_file.users.len(), "Found users in file");
    let summary = sync_users(db, mutator, &users_file.users).await?;

    tracing::info!(
        created = summary.created,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        groups_changed = summary.groups_changed,
        "User sync complete"
    );
    Ok(summary)
}

/// Creates missing users, then adds every listed membership in one batch.
pub async fn sync_users(
    db: &DatabaseConnection,
    mutator: &PolicyMutator,
    users: &[UserDefinition],
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    let mut changes = Vec::new();

    for user_def in users {
        if storage::get_user_by_username(db, &user_def.username)
            .await?
            .is_some()
        {
            summary.unchanged += 1;
        } else {
            match storage::create_user(db, &user_def.username, &user_def.password).await {
                Ok(_) => {
                    tracing::info!(username = %user_def.username, "Created user");
                    summary.created += 1;
                }
                // a soft-deleted account keeps its name; leave it deleted
                Err(AppError::Conflict(_)) => {
                    tracing::warn!(username = %user_def.username, "Skipping deleted user");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        for group in &user_def.groups {
            let edge = GroupingEdge::new(&user_def.username, group).map_err(AppError::from)?;
            changes.push(PolicyChange::AddGrouping(edge));
        }
    }

    if !changes.is_empty() {
        summary.groups_changed = mutator.apply(changes).map_err(AppError::from)?;
    }
    Ok(summary)
}

/// Seed the `admin` account and the `admins` role when no permission exists
/// yet. Returns whether anything was granted.
pub async fn ensure_admin(
    db: &DatabaseConnection,
    enforcer: &Enforcer,
    password: &str,
) -> std::result::Result<bool, AppError> {
    if !enforcer.is_available() {
        tracing::warn!("Policy store unavailable, skipping admin bootstrap");
        return Ok(false);
    }
    if !enforcer.policies().is_empty() {
        return Ok(false);
    }

    if storage::get_user_by_username(db, ADMIN_USER).await?.is_none() {
        storage::create_user(db, ADMIN_USER, password).await?;
        tracing::info!(username = ADMIN_USER, "Created admin user");
    }

    let mut changes = vec![PolicyChange::AddGrouping(GroupingEdge::new(
        ADMIN_USER, ADMIN_ROLE,
    )?)];
    // one pattern per depth, `*` matches a single segment
    for pattern in ["/*", "/*/*", "/*/*/*", "/*/*/*/*"] {
        changes.push(PolicyChange::AddPolicy(PolicyTuple::new(
            ADMIN_ROLE,
            pattern,
            ANY_ACTION,
            Effect::Allow,
        )?));
    }

    let granted = enforcer.mutator().apply(changes)?;
    tracing::info!(role = ADMIN_ROLE, "Bootstrapped admin permissions");
    Ok(granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::store::MemoryAdapter;
    use crate::settings::Database;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    async fn test_db() -> (NamedTempFile, DatabaseConnection) {
        let file = NamedTempFile::new().expect("Failed to create temp file");
        let url = format!("sqlite://{}?mode=rwc", file.path().display());
        let db = storage::init(&Database { url })
            .await
            .expect("Failed to init database");
        (file, db)
    }

    fn def(username: &str, groups: &[&str]) -> UserDefinition {
        UserDefinition {
            username: username.into(),
            password: "secret-pw".into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_sync_users_is_idempotent() {
        let (_file, db) = test_db().await;
        let enforcer = Enforcer::load(Arc::new(MemoryAdapter::default()));
        let users = vec![def("alice", &["clerks"]), def("bobby", &["managers", "clerks"])];

        let first = sync_users(&db, &enforcer.mutator(), &users).await.unwrap();
        assert_eq!(first.created, 2);
        assert!(first.groups_changed);
        assert_eq!(enforcer.roles_of("bobby"), vec!["clerks", "managers"]);

        let second = sync_users(&db, &enforcer.mutator(), &users).await.unwrap();
        assert_eq!(
            second,
            SyncSummary {
                created: 0,
                unchanged: 2,
                skipped: 0,
                groups_changed: false,
            }
        );
    }

    #[tokio::test]
    async fn test_sync_skips_deleted_user() {
        let (_file, db) = test_db().await;
        let enforcer = Enforcer::load(Arc::new(MemoryAdapter::default()));
        storage::create_user(&db, "carol", "secret-pw").await.unwrap();
        storage::soft_delete_user(&db, "carol").await.unwrap();

        let summary = sync_users(&db, &enforcer.mutator(), &[def("carol", &["clerks"])])
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(enforcer.roles_of("carol").is_empty());
    }

    #[tokio::test]
    async fn test_sync_users_from_file() {
        let (_file, db) = test_db().await;
        let enforcer = Enforcer::load(Arc::new(MemoryAdapter::default()));
        let users = NamedTempFile::new().unwrap();
        std::fs::write(
            users.path(),
            r#"{"users": [{"username": "dave", "password": "secret-pw", "groups": ["clerks"]}]}"#,
        )
        .unwrap();

        let summary = sync_users_from_file(&db, &enforcer.mutator(), users.path())
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
        assert!(storage::get_user_by_username(&db, "dave").await.unwrap().is_some());

        std::fs::write(users.path(), "not json").unwrap();
        assert!(sync_users_from_file(&db, &enforcer.mutator(), users.path())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ensure_admin_only_on_empty_policy() {
        let (_file, db) = test_db().await;
        let enforcer = Enforcer::load(Arc::new(MemoryAdapter::default()));

        assert!(ensure_admin(&db, &enforcer, "password123").await.unwrap());
        assert!(enforcer.enforce("admin", "/products/1/stocks/in", "PATCH"));
        assert!(enforcer.enforce("admin", "/users", "POST"));
        assert!(storage::verify_user_password(&db, "admin", "password123")
            .await
            .unwrap()
            .is_some());

        assert!(!ensure_admin(&db, &enforcer, "password123").await.unwrap());

        let seeded = Enforcer::load(Arc::new(MemoryAdapter::new(
            "p, clerks, /products, GET, allow\n",
        )));
        assert!(!ensure_admin(&db, &seeded, "password123").await.unwrap());
        assert!(!seeded.enforce("admin", "/products", "GET"));
    }
}
