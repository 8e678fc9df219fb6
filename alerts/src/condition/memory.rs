use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::condition::model::{Condition, ConditionKey, ConditionKind};
use crate::condition::repository::ConditionRepository;

/// Process-local repository. Same replacement semantics as the SQL one.
#[derive(Default)]
pub struct InMemoryConditionRepository {
    rows: RwLock<HashMap<Uuid, Condition>>,
}

impl InMemoryConditionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<Condition> {
        self.rows.read().get(id).cloned()
    }
}

#[async_trait]
impl ConditionRepository for InMemoryConditionRepository {
    async fn load_active(&self, kind: ConditionKind) -> Result<Vec<Condition>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|c| c.kind() == kind && c.needs_evaluation())
            .cloned()
            .collect())
    }

    async fn fetch_by_id(&self, id: &Uuid) -> Result<Option<Condition>> {
        Ok(self.get(id))
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Condition>> {
        let mut out: Vec<Condition> = self
            .rows
            .read()
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.asset, a.kind().as_str()).cmp(&(&b.asset, b.kind().as_str())));
        Ok(out)
    }

    async fn save(&self, condition: &Condition) -> Result<()> {
        let key = condition.key();
        let mut rows = self.rows.write();
        rows.retain(|id, c| *id != condition.id && c.key() != key);
        rows.insert(condition.id, condition.clone());
        Ok(())
    }

    async fn update_state(&self, condition: &Condition) -> Result<bool> {
        let mut rows = self.rows.write();
        match rows.get_mut(&condition.id) {
            Some(row) => {
                row.active = condition.active;
                row.trigger_ts = condition.trigger_ts;
                row.threshold = condition.threshold.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        Ok(self.rows.write().remove(id).is_some())
    }

    async fn delete_by_key(&self, key: &ConditionKey) -> Result<bool> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, c| c.key() != *key);
        Ok(rows.len() < before)
    }

    async fn delete_for_owner(&self, owner: &str) -> Result<u64> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, c| c.owner != owner);
        Ok((before - rows.len()) as u64)
    }
}
