//! In-memory collaborator implementations.
//!
//! Used by tests and the CLI; production deployments supply durable
//! implementations of the same traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use nestguard_core::{
    Appeal, ConfigStore, Context, Job, ModerationRecord, ModerationRepository, NotificationSink,
    Result, StoredConfiguration,
};

type StoreKey = (Context, Option<String>);

/// Configuration store held in a map.
#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<HashMap<StoreKey, StoredConfiguration>>,
    reads: AtomicUsize,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(
        &self,
        context: &Context,
        scope_id: Option<&str>,
    ) -> Result<Option<StoredConfiguration>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let key = (context.clone(), scope_id.map(String::from));
        Ok(self.entries.read().await.get(&key).cloned())
    }

    async fn put(&self, config: StoredConfiguration) -> Result<()> {
        let key = (config.context.clone(), config.scope_id.clone());
        self.entries.write().await.insert(key, config);
        Ok(())
    }

    async fn list(&self, context: Option<&Context>) -> Result<Vec<StoredConfiguration>> {
        let entries = self.entries.read().await;
        let mut configs: Vec<StoredConfiguration> = entries
            .values()
            .filter(|c| context.map_or(true, |ctx| &c.context == ctx))
            .cloned()
            .collect();
        configs.sort_by(|a, b| {
            (a.context.as_str(), a.scope_id.as_deref())
                .cmp(&(b.context.as_str(), b.scope_id.as_deref()))
        });
        Ok(configs)
    }
}

/// Moderation records and appeals held in maps.
#[derive(Default)]
pub struct InMemoryModerationRepository {
    records: RwLock<HashMap<Uuid, ModerationRecord>>,
    appeals: RwLock<HashMap<Uuid, Appeal>>,
}

impl InMemoryModerationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ModerationRepository for InMemoryModerationRepository {
    async fn save_record(&self, record: &ModerationRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<ModerationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn save_appeal(&self, appeal: &Appeal) -> Result<()> {
        self.appeals
            .write()
            .await
            .insert(appeal.id, appeal.clone());
        Ok(())
    }

    async fn get_appeal(&self, id: Uuid) -> Result<Option<Appeal>> {
        Ok(self.appeals.read().await.get(&id).cloned())
    }

    async fn appeals_for_record(&self, record_id: Uuid) -> Result<Vec<Appeal>> {
        let mut appeals: Vec<Appeal> = self
            .appeals
            .read()
            .await
            .values()
            .filter(|a| a.record_id == record_id)
            .cloned()
            .collect();
        appeals.sort_by_key(|a| a.created_at);
        Ok(appeals)
    }
}

/// Notification sink that remembers everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ModerationRecord>>,
    appeals: Mutex<Vec<Appeal>>,
    jobs: Mutex<Vec<Job>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decided(&self) -> Vec<ModerationRecord> {
        self.records.lock().await.clone()
    }

    pub async fn resolved_appeals(&self) -> Vec<Appeal> {
        self.appeals.lock().await.clone()
    }

    pub async fn finished_jobs(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn record_decided(&self, record: &ModerationRecord) {
        self.records.lock().await.push(record.clone());
    }

    async fn appeal_resolved(&self, appeal: &Appeal, _record: &ModerationRecord) {
        self.appeals.lock().await.push(appeal.clone());
    }

    async fn job_finished(&self, job: &Job) {
        self.jobs.lock().await.push(job.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(context: Context, scope: Option<&str>) -> StoredConfiguration {
        StoredConfiguration {
            context,
            scope_id: scope.map(String::from),
            version: 1,
            body: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_config_store_scoped_keys() {
        let store = InMemoryConfigStore::new();
        store.put(stored(Context::paysite(), None)).await.unwrap();
        store
            .put(stored(Context::paysite(), Some("model-1")))
            .await
            .unwrap();

        assert!(store.get(&Context::paysite(), None).await.unwrap().is_some());
        assert!(store
            .get(&Context::paysite(), Some("model-1"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get(&Context::paysite(), Some("model-2"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test]
    async fn test_config_store_list_filters_by_context() {
        let store = InMemoryConfigStore::new();
        store.put(stored(Context::paysite(), None)).await.unwrap();
        store
            .put(stored(Context::public_gallery(), None))
            .await
            .unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 2);
        let paysite = store.list(Some(&Context::paysite())).await.unwrap();
        assert_eq!(paysite.len(), 1);
        assert_eq!(paysite[0].context, Context::paysite());
    }
}
