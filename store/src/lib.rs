//! Persistence seam of the chat server.
//!
//! The realtime layer talks to storage only through the [`Store`] trait, so
//! a database adapter can replace [`MemoryStore`] without touching sessions,
//! topics or the hub.

use async_trait::async_trait;

pub use entity::{auth_records, messages, subscriptions, topics, users, Uid};

pub mod error;
pub mod memory;
pub mod query;

pub use error::{Error, StoreErrorKind};
pub use memory::MemoryStore;
pub use query::{DelRange, MessageQuery};

#[async_trait]
pub trait Store: Send + Sync {
    /// Allocates a fresh, never-zero user id. Also used to mint session ids
    /// and group topic names.
    fn next_uid(&self) -> Uid;

    // Users
    async fn create_user(&self, user: users::Model) -> Result<users::Model, Error>;
    async fn find_user(&self, id: Uid) -> Result<users::Model, Error>;
    async fn update_user(&self, user: users::Model) -> Result<users::Model, Error>;
    async fn delete_user(&self, id: Uid) -> Result<(), Error>;

    // Credentials
    async fn add_auth_record(&self, record: auth_records::Model) -> Result<(), Error>;
    async fn find_auth_record(&self, unique: &str) -> Result<auth_records::Model, Error>;
    async fn find_auth_record_by_user(
        &self,
        user: Uid,
        scheme: &str,
    ) -> Result<auth_records::Model, Error>;
    async fn update_auth_record(
        &self,
        old_unique: &str,
        record: auth_records::Model,
    ) -> Result<(), Error>;
    async fn delete_auth_records(&self, user: Uid) -> Result<(), Error>;

    // Topics
    async fn create_topic(&self, topic: topics::Model) -> Result<topics::Model, Error>;
    async fn find_topic(&self, name: &str) -> Result<topics::Model, Error>;
    async fn update_topic(&self, topic: topics::Model) -> Result<topics::Model, Error>;
    /// Removes the topic together with its subscriptions and messages.
    async fn delete_topic(&self, name: &str) -> Result<(), Error>;

    // Subscriptions
    async fn upsert_subscription(
        &self,
        sub: subscriptions::Model,
    ) -> Result<subscriptions::Model, Error>;
    async fn find_subscription(
        &self,
        topic: &str,
        user: Uid,
    ) -> Result<subscriptions::Model, Error>;
    async fn find_subscriptions_by_topic(
        &self,
        topic: &str,
    ) -> Result<Vec<subscriptions::Model>, Error>;
    async fn find_subscriptions_by_user(
        &self,
        user: Uid,
    ) -> Result<Vec<subscriptions::Model>, Error>;
    async fn delete_subscription(&self, topic: &str, user: Uid) -> Result<(), Error>;

    // Messages
    async fn save_message(&self, message: messages::Model) -> Result<(), Error>;
    async fn find_messages(
        &self,
        topic: &str,
        query: &MessageQuery,
    ) -> Result<Vec<messages::Model>, Error>;
    async fn delete_messages(&self, topic: &str, ranges: &[DelRange]) -> Result<usize, Error>;
}
