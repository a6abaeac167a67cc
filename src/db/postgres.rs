use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::{channels, roles};

use super::{
    DatabaseError,
    models::{ChannelBinding, RoleBinding},
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channels)]
struct DbChannelBinding {
    server_id: String,
    channel_id_input: String,
    channel_id_output: String,
    channel_type: String,
}

impl From<DbChannelBinding> for ChannelBinding {
    fn from(value: DbChannelBinding) -> Self {
        Self {
            server_id: value.server_id,
            input_channel_id: value.channel_id_input,
            output_channel_id: value.channel_id_output,
            category: value.channel_type,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = roles)]
struct DbRoleBinding {
    server_id: String,
    role_id: String,
    role_type: String,
}

impl From<DbRoleBinding> for RoleBinding {
    fn from(value: DbRoleBinding) -> Self {
        Self {
            server_id: value.server_id,
            category: value.role_type,
            role_id: value.role_id,
        }
    }
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresBindingStore {
    pool: Pool,
}

impl PostgresBindingStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::BindingStore for PostgresBindingStore {
    async fn list_channel_bindings(&self) -> Result<Vec<ChannelBinding>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            channels::table
                .order(channels::id.asc())
                .select(DbChannelBinding::as_select())
                .load::<DbChannelBinding>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            roles::table
                .order(roles::id.asc())
                .select(DbRoleBinding::as_select())
                .load::<DbRoleBinding>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}
