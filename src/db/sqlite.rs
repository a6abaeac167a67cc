use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use crate::db::schema_sqlite::{channels, roles};

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

impl DbChannelBinding {
    fn to_channel_binding(&self) -> ChannelBinding {
        ChannelBinding {
            server_id: self.server_id.clone(),
            input_channel_id: self.channel_id_input.clone(),
            output_channel_id: self.channel_id_output.clone(),
            category: self.channel_type.clone(),
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

impl DbRoleBinding {
    fn to_role_binding(&self) -> RoleBinding {
        RoleBinding {
            server_id: self.server_id.clone(),
            category: self.role_type.clone(),
            role_id: self.role_id.clone(),
        }
    }
}

pub(crate) fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

pub struct SqliteBindingStore {
    db_path: Arc<String>,
}

impl SqliteBindingStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::BindingStore for SqliteBindingStore {
    async fn list_channel_bindings(&self) -> Result<Vec<ChannelBinding>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let rows = channels::table
                .order(channels::id.asc())
                .select(DbChannelBinding::as_select())
                .load::<DbChannelBinding>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.iter().map(DbChannelBinding::to_channel_binding).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let rows = roles::table
                .order(roles::id.asc())
                .select(DbRoleBinding::as_select())
                .load::<DbRoleBinding>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.iter().map(DbRoleBinding::to_role_binding).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
