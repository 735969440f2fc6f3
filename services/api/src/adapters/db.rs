//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `CredentialStore` port from the core crate. It keeps one Telegram
//! session record per user in PostgreSQL using `sqlx`.

use async_trait::async_trait;
use gallery_core::domain::{SessionRecord, UserId};
use gallery_core::ports::{CredentialStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `CredentialStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRow {
    dc_id: i32,
    server_address: Option<String>,
    port: Option<i32>,
    auth_key: Option<Vec<u8>>,
}

impl SessionRow {
    fn to_domain(self) -> PortResult<SessionRecord> {
        let port = self
            .port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| PortError::Unexpected("Stored port is out of range".to_string()))?;
        Ok(SessionRecord {
            dc_id: self.dc_id,
            server_address: self.server_address,
            port,
            auth_key: self.auth_key,
        })
    }
}

fn db_error(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `CredentialStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CredentialStore for DbAdapter {
    async fn load(&self, user_id: UserId) -> PortResult<SessionRecord> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT dc_id, server_address, port, auth_key \
             FROM telegram_sessions WHERE user_id = $1",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => row.to_domain(),
            None => Ok(SessionRecord::default()),
        }
    }

    async fn save(&self, user_id: UserId, record: &SessionRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO telegram_sessions (user_id, dc_id, server_address, port, auth_key, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET \
                dc_id = EXCLUDED.dc_id, \
                server_address = EXCLUDED.server_address, \
                port = EXCLUDED.port, \
                auth_key = EXCLUDED.auth_key, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id.0)
        .bind(record.dc_id)
        .bind(record.server_address.as_deref())
        .bind(record.port.map(i32::from))
        .bind(record.auth_key.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> PortResult<()> {
        sqlx::query("DELETE FROM telegram_sessions WHERE user_id = $1")
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(port: Option<i32>) -> SessionRow {
        SessionRow {
            dc_id: 4,
            server_address: Some("149.154.167.91".to_string()),
            port,
            auth_key: Some(vec![7; 256]),
        }
    }

    #[test]
    fn row_converts_to_identical_record() {
        let record = row(Some(443)).to_domain().unwrap();
        assert_eq!(
            record,
            SessionRecord {
                dc_id: 4,
                server_address: Some("149.154.167.91".to_string()),
                port: Some(443),
                auth_key: Some(vec![7; 256]),
            }
        );
    }

    #[test]
    fn out_of_range_port_is_an_error() {
        assert!(matches!(row(Some(70_000)).to_domain(), Err(PortError::Unexpected(_))));
        assert_eq!(row(None).to_domain().unwrap().port, None);
    }
}
