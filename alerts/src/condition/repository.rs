use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::condition::model::{Condition, ConditionKey, ConditionKind};

#[async_trait]
pub trait ConditionRepository: Send + Sync {
    /// Conditions the scheduler must look at for `kind`: active VALUE and
    /// PERCENT conditions, every EMA condition.
    async fn load_active(&self, kind: ConditionKind) -> Result<Vec<Condition>>;

    async fn fetch_by_id(&self, id: &Uuid) -> Result<Option<Condition>>;

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Condition>>;

    /// Stores `condition`, replacing any other condition with the same
    /// (owner, asset, kind) key.
    async fn save(&self, condition: &Condition) -> Result<()>;

    /// Writes back the evaluation state of an existing condition.
    /// Returns false when the row no longer exists.
    async fn update_state(&self, condition: &Condition) -> Result<bool>;

    async fn delete(&self, id: &Uuid) -> Result<bool>;

    async fn delete_by_key(&self, key: &ConditionKey) -> Result<bool>;

    /// Number of deleted rows.
    async fn delete_for_owner(&self, owner: &str) -> Result<u64>;
}
