use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use super::error::RoutingError;
use crate::db::{BindingStore, ChannelBinding, RoleBinding};
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

/// One immutable generation of routing data. Readers hold an `Arc` to it, so
/// a reload never changes a snapshot someone is already using.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingSnapshot {
    bindings: Vec<ChannelBinding>,
    roles: Vec<RoleBinding>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RoutingSnapshot {
    pub fn build(
        bindings: Vec<ChannelBinding>,
        roles: Vec<RoleBinding>,
    ) -> Result<Self, RoutingError> {
        let mut seen = HashSet::new();
        for binding in &bindings {
            if binding.category.trim().is_empty() {
                return Err(RoutingError::InvalidBinding {
                    server_id: binding.server_id.clone(),
                    reason: format!("input channel {} has an empty category", binding.input_channel_id),
                });
            }
            if !seen.insert((binding.server_id.as_str(), binding.category.as_str())) {
                return Err(RoutingError::DuplicateBinding {
                    server_id: binding.server_id.clone(),
                    category: binding.category.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for role in &roles {
            if !seen.insert((role.server_id.as_str(), role.category.as_str())) {
                return Err(RoutingError::DuplicateRole {
                    server_id: role.server_id.clone(),
                    category: role.category.clone(),
                });
            }
        }

        Ok(Self {
            bindings,
            roles,
            loaded_at: Some(Utc::now()),
        })
    }

    /// Bindings in `category` that belong to any server other than the source.
    pub fn destinations_for(&self, source_server_id: &str, category: &str) -> Vec<ChannelBinding> {
        self.bindings
            .iter()
            .filter(|b| b.category == category && b.server_id != source_server_id)
            .cloned()
            .collect()
    }

    pub fn binding_for_input_channel(&self, channel_id: &str) -> Option<ChannelBinding> {
        self.bindings
            .iter()
            .find(|b| b.input_channel_id == channel_id)
            .cloned()
    }

    pub fn role_for(&self, server_id: &str, category: &str) -> Option<RoleBinding> {
        self.roles
            .iter()
            .find(|r| r.server_id == server_id && r.category == category)
            .cloned()
    }

    pub fn input_channel_ids(&self) -> HashSet<String> {
        self.bindings
            .iter()
            .map(|b| b.input_channel_id.clone())
            .collect()
    }

    pub fn bindings(&self) -> &[ChannelBinding] {
        &self.bindings
    }

    pub fn roles(&self) -> &[RoleBinding] {
        &self.roles
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    current: RwLock<Arc<RoutingSnapshot>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole table. On a validation error the previous snapshot
    /// stays in place.
    pub fn load(
        &self,
        bindings: Vec<ChannelBinding>,
        roles: Vec<RoleBinding>,
    ) -> Result<(), RoutingError> {
        let snapshot = Arc::new(RoutingSnapshot::build(bindings, roles)?);
        info!(
            bindings = snapshot.bindings.len(),
            roles = snapshot.roles.len(),
            "routing table loaded"
        );
        *self.current.write() = snapshot;
        Ok(())
    }

    /// Fetches bindings and roles from `store` under `policy` and swaps them in.
    pub async fn load_from_store(
        &self,
        store: &dyn BindingStore,
        policy: &RetryPolicy,
    ) -> Result<(), RoutingError> {
        let bindings =
            retry_with_backoff(policy, "list channel bindings", || store.list_channel_bindings())
                .await?;
        let roles =
            retry_with_backoff(policy, "list role bindings", || store.list_role_bindings()).await?;

        self.load(bindings, roles)
    }

    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.current.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().loaded_at.is_some()
    }

    pub fn destinations_for(&self, source_server_id: &str, category: &str) -> Vec<ChannelBinding> {
        self.snapshot().destinations_for(source_server_id, category)
    }

    pub fn binding_for_input_channel(&self, channel_id: &str) -> Option<ChannelBinding> {
        self.snapshot().binding_for_input_channel(channel_id)
    }

    pub fn role_for(&self, server_id: &str, category: &str) -> Option<RoleBinding> {
        self.snapshot().role_for(server_id, category)
    }

    pub fn all_input_channel_ids(&self) -> HashSet<String> {
        self.snapshot().input_channel_ids()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::DatabaseError;

    fn binding(server: &str, input: &str, output: &str, category: &str) -> ChannelBinding {
        ChannelBinding {
            server_id: server.to_string(),
            input_channel_id: input.to_string(),
            output_channel_id: output.to_string(),
            category: category.to_string(),
        }
    }

    fn role(server: &str, category: &str, role_id: &str) -> RoleBinding {
        RoleBinding {
            server_id: server.to_string(),
            category: category.to_string(),
            role_id: role_id.to_string(),
        }
    }

    fn loaded_table() -> RoutingTable {
        let table = RoutingTable::new();
        table
            .load(
                vec![
                    binding("1", "c1", "c2", "alerts"),
                    binding("2", "c4", "c3", "alerts"),
                    binding("3", "c5", "c6", "news"),
                    binding("4", "c7", "c8", "alerts"),
                ],
                vec![role("2", "alerts", "R")],
            )
            .unwrap();
        table
    }

    #[test]
    fn unloaded_table_returns_empty_results() {
        let table = RoutingTable::new();

        assert!(!table.is_loaded());
        assert!(table.destinations_for("1", "alerts").is_empty());
        assert!(table.binding_for_input_channel("c1").is_none());
        assert!(table.role_for("1", "alerts").is_none());
        assert!(table.all_input_channel_ids().is_empty());
    }

    #[test]
    fn destinations_exclude_source_and_keep_load_order() {
        let table = loaded_table();

        let servers: Vec<String> = table
            .destinations_for("1", "alerts")
            .into_iter()
            .map(|b| b.server_id)
            .collect();

        assert_eq!(servers, vec!["2", "4"]);
        for source in ["1", "2", "3", "4"] {
            assert!(
                table
                    .destinations_for(source, "alerts")
                    .iter()
                    .all(|b| b.server_id != source)
            );
        }
    }

    #[test]
    fn lookups_by_channel_and_role() {
        let table = loaded_table();

        assert_eq!(
            table.binding_for_input_channel("c5").map(|b| b.category),
            Some("news".to_string())
        );
        assert_eq!(table.role_for("2", "alerts").map(|r| r.role_id), Some("R".to_string()));
        assert!(table.role_for("2", "news").is_none());
        assert_eq!(table.all_input_channel_ids().len(), 4);
    }

    #[test]
    fn invalid_load_keeps_previous_snapshot() {
        let table = loaded_table();
        let before = table.snapshot();

        let empty_category = table.load(vec![binding("9", "c9", "c10", " ")], Vec::new());
        assert!(matches!(empty_category, Err(RoutingError::InvalidBinding { .. })));

        let duplicate = table.load(
            vec![binding("9", "a", "b", "alerts"), binding("9", "c", "d", "alerts")],
            Vec::new(),
        );
        assert!(matches!(duplicate, Err(RoutingError::DuplicateBinding { .. })));

        let duplicate_role = table.load(
            Vec::new(),
            vec![role("9", "alerts", "x"), role("9", "alerts", "y")],
        );
        assert!(matches!(duplicate_role, Err(RoutingError::DuplicateRole { .. })));

        assert!(Arc::ptr_eq(&before, &table.snapshot()));
    }

    #[test]
    fn reload_replaces_without_touching_held_snapshot() {
        let table = loaded_table();
        let held = table.snapshot();

        table
            .load(vec![binding("5", "c11", "c12", "alerts")], Vec::new())
            .unwrap();

        assert_eq!(held.bindings().len(), 4);
        assert_eq!(table.snapshot().bindings().len(), 1);
        assert!(table.binding_for_input_channel("c1").is_none());
    }

    struct FlakyStore {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl BindingStore for FlakyStore {
        async fn list_channel_bindings(&self) -> Result<Vec<ChannelBinding>, DatabaseError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DatabaseError::Connection("refused".to_string()));
            }
            Ok(vec![binding("1", "c1", "c2", "alerts")])
        }

        async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, DatabaseError> {
            Ok(vec![role("1", "alerts", "R")])
        }
    }

    #[tokio::test]
    async fn store_load_retries_transient_failures() {
        let table = RoutingTable::new();
        let store = FlakyStore {
            failures_left: AtomicU32::new(2),
        };

        table
            .load_from_store(&store, &RetryPolicy::immediate(3))
            .await
            .unwrap();

        assert!(table.is_loaded());
        assert_eq!(table.all_input_channel_ids().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_store_load_leaves_table_untouched() {
        let table = loaded_table();
        let store = FlakyStore {
            failures_left: AtomicU32::new(10),
        };

        let result = table
            .load_from_store(&store, &RetryPolicy::immediate(3))
            .await;

        match result {
            Err(RoutingError::Store(err)) => assert_eq!(err.attempts, 3),
            other => panic!("expected store error, got {other:?}"),
        }
        assert_eq!(table.all_input_channel_ids().len(), 4);
    }
}
