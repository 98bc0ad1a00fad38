use chrono::Utc;
use sqlx::Row;

use bankdesk_core::domain::banking::Credential;

use super::{CredentialRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCredentialRepository {
    pool: DbPool,
}

impl SqlCredentialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CredentialRepository for SqlCredentialRepository {
    async fn find_credential(
        &self,
        username: &str,
    ) -> Result<Option<Credential>, RepositoryError> {
        let row =
            sqlx::query("SELECT username, password_sha256 FROM credentials WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| -> Result<Credential, RepositoryError> {
            Ok(Credential {
                username: row.try_get("username")?,
                password_sha256: row.try_get("password_sha256")?,
            })
        })
        .transpose()
    }

    async fn save_credential(&self, credential: Credential) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO credentials (username, password_sha256, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET password_sha256 = excluded.password_sha256",
        )
        .bind(&credential.username)
        .bind(&credential.password_sha256)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
