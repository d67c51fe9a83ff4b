use crate::error::Error;
use crate::query::{DelRange, MessageQuery};
use crate::{auth_records, messages, subscriptions, topics, users, Store, Uid};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process [`Store`] backed by concurrent maps. Nothing survives a restart.
pub struct MemoryStore {
    uid_seq: AtomicU64,
    users: DashMap<Uid, users::Model>,
    auth_records: DashMap<String, auth_records::Model>,
    topics: DashMap<String, topics::Model>,
    subscriptions: DashMap<(String, Uid), subscriptions::Model>,
    messages: DashMap<String, BTreeMap<i64, messages::Model>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        // Seed from the clock so ids differ between runs.
        let seed = (Utc::now().timestamp_millis() as u64) << 12;
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            uid_seq: AtomicU64::new(seed.max(1)),
            users: DashMap::new(),
            auth_records: DashMap::new(),
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            messages: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn next_uid(&self) -> Uid {
        loop {
            let raw = self.uid_seq.fetch_add(1, Ordering::Relaxed);
            if raw != 0 {
                return Uid::new(raw);
            }
        }
    }

    async fn create_user(&self, user: users::Model) -> Result<users::Model, Error> {
        debug!("New user to be inserted: {}", user.id.user_id());
        match self.users.entry(user.id) {
            Entry::Occupied(_) => Err(Error::duplicate()),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn find_user(&self, id: Uid) -> Result<users::Model, Error> {
        self.users
            .get(&id)
            .map(|user| user.clone())
            .ok_or_else(Error::not_found)
    }

    async fn update_user(&self, mut user: users::Model) -> Result<users::Model, Error> {
        let mut existing = self.users.get_mut(&user.id).ok_or_else(Error::not_found)?;
        user.updated_at = Utc::now();
        *existing = user.clone();
        Ok(user)
    }

    async fn delete_user(&self, id: Uid) -> Result<(), Error> {
        self.users.remove(&id).ok_or_else(Error::not_found)?;
        self.auth_records.retain(|_, record| record.user != id);
        self.subscriptions.retain(|(_, user), _| *user != id);
        Ok(())
    }

    async fn add_auth_record(&self, record: auth_records::Model) -> Result<(), Error> {
        match self.auth_records.entry(record.unique.clone()) {
            Entry::Occupied(_) => Err(Error::duplicate()),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn find_auth_record(&self, unique: &str) -> Result<auth_records::Model, Error> {
        self.auth_records
            .get(unique)
            .map(|record| record.clone())
            .ok_or_else(Error::not_found)
    }

    async fn find_auth_record_by_user(
        &self,
        user: Uid,
        scheme: &str,
    ) -> Result<auth_records::Model, Error> {
        self.auth_records
            .iter()
            .find(|record| record.user == user && record.scheme == scheme)
            .map(|record| record.clone())
            .ok_or_else(Error::not_found)
    }

    async fn update_auth_record(
        &self,
        old_unique: &str,
        record: auth_records::Model,
    ) -> Result<(), Error> {
        if old_unique != record.unique && self.auth_records.contains_key(&record.unique) {
            return Err(Error::duplicate());
        }
        self.auth_records
            .remove(old_unique)
            .ok_or_else(Error::not_found)?;
        self.auth_records.insert(record.unique.clone(), record);
        Ok(())
    }

    async fn delete_auth_records(&self, user: Uid) -> Result<(), Error> {
        self.auth_records.retain(|_, record| record.user != user);
        Ok(())
    }

    async fn create_topic(&self, topic: topics::Model) -> Result<topics::Model, Error> {
        debug!("New topic to be inserted: {}", topic.name);
        match self.topics.entry(topic.name.clone()) {
            Entry::Occupied(_) => Err(Error::duplicate()),
            Entry::Vacant(slot) => {
                slot.insert(topic.clone());
                Ok(topic)
            }
        }
    }

    async fn find_topic(&self, name: &str) -> Result<topics::Model, Error> {
        self.topics
            .get(name)
            .map(|topic| topic.clone())
            .ok_or_else(Error::not_found)
    }

    async fn update_topic(&self, mut topic: topics::Model) -> Result<topics::Model, Error> {
        let mut existing = self
            .topics
            .get_mut(&topic.name)
            .ok_or_else(Error::not_found)?;
        topic.updated_at = Utc::now();
        *existing = topic.clone();
        Ok(topic)
    }

    async fn delete_topic(&self, name: &str) -> Result<(), Error> {
        self.topics.remove(name).ok_or_else(Error::not_found)?;
        self.subscriptions.retain(|(topic, _), _| topic != name);
        self.messages.remove(name);
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        mut sub: subscriptions::Model,
    ) -> Result<subscriptions::Model, Error> {
        sub.updated_at = Utc::now();
        self.subscriptions
            .insert((sub.topic.clone(), sub.user), sub.clone());
        Ok(sub)
    }

    async fn find_subscription(
        &self,
        topic: &str,
        user: Uid,
    ) -> Result<subscriptions::Model, Error> {
        self.subscriptions
            .get(&(topic.to_owned(), user))
            .map(|sub| sub.clone())
            .ok_or_else(Error::not_found)
    }

    async fn find_subscriptions_by_topic(
        &self,
        topic: &str,
    ) -> Result<Vec<subscriptions::Model>, Error> {
        let mut subs: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.topic == topic)
            .map(|sub| sub.clone())
            .collect();
        subs.sort_by_key(|sub| sub.user);
        Ok(subs)
    }

    async fn find_subscriptions_by_user(
        &self,
        user: Uid,
    ) -> Result<Vec<subscriptions::Model>, Error> {
        let mut subs: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.user == user)
            .map(|sub| sub.clone())
            .collect();
        subs.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(subs)
    }

    async fn delete_subscription(&self, topic: &str, user: Uid) -> Result<(), Error> {
        self.subscriptions
            .remove(&(topic.to_owned(), user))
            .map(|_| ())
            .ok_or_else(Error::not_found)
    }

    async fn save_message(&self, message: messages::Model) -> Result<(), Error> {
        let mut history = self.messages.entry(message.topic.clone()).or_default();
        if history.contains_key(&message.seq_id) {
            return Err(Error::duplicate());
        }
        history.insert(message.seq_id, message);
        Ok(())
    }

    async fn find_messages(
        &self,
        topic: &str,
        query: &MessageQuery,
    ) -> Result<Vec<messages::Model>, Error> {
        let Some(history) = self.messages.get(topic) else {
            return Ok(Vec::new());
        };
        // Newest messages win when the window holds more than the limit.
        let mut found: Vec<_> = history
            .values()
            .rev()
            .filter(|message| query.matches(message.seq_id))
            .take(query.effective_limit())
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    async fn delete_messages(&self, topic: &str, ranges: &[DelRange]) -> Result<usize, Error> {
        for range in ranges {
            range.validate()?;
        }
        let Some(mut history) = self.messages.get_mut(topic) else {
            return Ok(0);
        };
        let before = history.len();
        history.retain(|seq_id, _| !ranges.iter().any(|range| range.contains(*seq_id)));
        Ok(before - history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(topic: &str, seq_id: i64) -> messages::Model {
        messages::Model {
            topic: topic.to_owned(),
            seq_id,
            from: Uid::new(1),
            head: None,
            content: json!(format!("message {seq_id}")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn next_uid_is_never_zero_and_unique() {
        let store = MemoryStore::with_seed(0);
        let first = store.next_uid();
        let second = store.next_uid();
        assert!(!first.is_zero());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn create_user_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let user = users::Model::new(store.next_uid(), Utc::now());
        store.create_user(user.clone()).await.unwrap();

        let result = store.create_user(user).await;
        assert_eq!(
            result.unwrap_err().error_kind,
            crate::StoreErrorKind::DuplicateRecord
        );
    }

    #[tokio::test]
    async fn find_missing_topic_returns_not_found() {
        let store = MemoryStore::new();
        let result = store.find_topic("grpMissing").await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_topic_removes_subscriptions_and_messages() {
        let store = MemoryStore::new();
        let owner = store.next_uid();
        store
            .create_topic(topics::Model::new("grpOne", owner, Utc::now()))
            .await
            .unwrap();
        store
            .upsert_subscription(subscriptions::Model::new("grpOne", owner, Utc::now()))
            .await
            .unwrap();
        store.save_message(message("grpOne", 1)).await.unwrap();

        store.delete_topic("grpOne").await.unwrap();

        assert!(store.find_subscription("grpOne", owner).await.is_err());
        let left = store
            .find_messages("grpOne", &MessageQuery::default())
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn find_messages_keeps_newest_within_limit() {
        let store = MemoryStore::new();
        for seq_id in 1..=5 {
            store.save_message(message("grpA", seq_id)).await.unwrap();
        }
        let query = MessageQuery {
            since: 0,
            before: 0,
            limit: 2,
        };
        let found = store.find_messages("grpA", &query).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|m| m.seq_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[tokio::test]
    async fn delete_messages_honours_ranges() {
        let store = MemoryStore::new();
        for seq_id in 1..=5 {
            store.save_message(message("grpA", seq_id)).await.unwrap();
        }
        let removed = store
            .delete_messages(
                "grpA",
                &[DelRange { low: 1, hi: 3 }, DelRange { low: 5, hi: 0 }],
            )
            .await
            .unwrap();
        assert_eq!(removed, 3);
    }

    #[tokio::test]
    async fn update_auth_record_refuses_taken_unique() {
        let store = MemoryStore::new();
        let record = |unique: &str, user: u64| auth_records::Model {
            unique: unique.to_owned(),
            user: Uid::new(user),
            scheme: "basic".to_owned(),
            auth_level: entity::AuthLevel::Auth,
            secret: Vec::new(),
            expires: None,
        };
        store.add_auth_record(record("basic:alice", 1)).await.unwrap();
        store.add_auth_record(record("basic:bob", 2)).await.unwrap();

        let result = store
            .update_auth_record("basic:alice", record("basic:bob", 1))
            .await;
        assert!(result.is_err());
        assert!(store.find_auth_record("basic:alice").await.is_ok());
    }
}
