use std::fmt;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use gallery_store::{ApiErrorClass, BucketClient, BucketError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Put,
    Delete,
    List,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteOp::Put => "put",
            RemoteOp::Delete => "delete",
            RemoteOp::List => "list",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("remote {op} failed{}: {message}", key_suffix(.key))]
pub struct RemoteError {
    pub op: RemoteOp,
    pub key: Option<String>,
    /// `None` when the failure never produced an HTTP status.
    pub class: Option<ApiErrorClass>,
    pub message: String,
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_deref()
        .map(|key| format!(" for {key}"))
        .unwrap_or_default()
}

impl RemoteError {
    pub fn new(op: RemoteOp, key: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            op,
            key: key.map(str::to_string),
            class: None,
            message: message.into(),
        }
    }

    pub fn with_class(mut self, class: ApiErrorClass) -> Self {
        self.class = Some(class);
        self
    }

    fn from_bucket(op: RemoteOp, key: Option<&str>, err: BucketError) -> Self {
        Self {
            op,
            key: key.map(str::to_string),
            class: err.classification(),
            message: err.to_string(),
        }
    }

    /// Credentials were rejected; every further request would fail the same way.
    pub fn is_pass_fatal(&self) -> bool {
        self.class == Some(ApiErrorClass::Auth)
    }

    pub fn class_label(&self) -> &'static str {
        match self.class {
            Some(ApiErrorClass::Auth) => "auth",
            Some(ApiErrorClass::RateLimit) => "rate-limit",
            Some(ApiErrorClass::Transient) => "transient",
            Some(ApiErrorClass::Permanent) => "permanent",
            None => "unknown",
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), RemoteError>;

    async fn delete(&self, key: &str) -> Result<(), RemoteError>;

    /// Every object in the bucket, fetched page by page. Each call starts over.
    fn list(&self) -> BoxStream<'_, Result<RemoteObject, RemoteError>>;
}

pub struct BucketStore {
    client: BucketClient,
}

impl BucketStore {
    pub fn new(client: BucketClient) -> Self {
        Self { client }
    }
}

enum ListCursor {
    Start,
    Next(String),
    Exhausted,
}

#[async_trait]
impl RemoteStore for BucketStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), RemoteError> {
        self.client
            .put_object(key, bytes, content_type)
            .await
            .map_err(|err| RemoteError::from_bucket(RemoteOp::Put, Some(key), err))
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.client
            .delete_object(key)
            .await
            .map_err(|err| RemoteError::from_bucket(RemoteOp::Delete, Some(key), err))
    }

    fn list(&self) -> BoxStream<'_, Result<RemoteObject, RemoteError>> {
        stream::try_unfold(ListCursor::Start, move |cursor| async move {
            let token = match cursor {
                ListCursor::Start => None,
                ListCursor::Next(token) => Some(token),
                ListCursor::Exhausted => return Ok(None),
            };
            let page = self
                .client
                .list_objects_page(token)
                .await
                .map_err(|err| RemoteError::from_bucket(RemoteOp::List, None, err))?;
            let next = match page.next_continuation_token {
                Some(token) => ListCursor::Next(token),
                None => ListCursor::Exhausted,
            };
            Ok(Some((page.objects, next)))
        })
        .map_ok(|objects| {
            stream::iter(objects.into_iter().map(|object| {
                Ok::<_, RemoteError>(RemoteObject {
                    key: object.key,
                    size_bytes: object.size,
                })
            }))
        })
        .try_flatten()
        .boxed()
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn memory_store_lists_after_put_and_delete() {
        let store = MemoryStore::new();
        store.put("a.jpg", vec![1, 2, 3], "image/jpeg").await.unwrap();
        store.put("b.jpg", vec![1], "image/jpeg").await.unwrap();
        store.delete("a.jpg").await.unwrap();

        let listed: Vec<RemoteObject> = store.list().try_collect().await.unwrap();
        assert_eq!(
            listed,
            vec![RemoteObject {
                key: "b.jpg".into(),
                size_bytes: 1
            }]
        );
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.delete_count(), 1);
    }

    #[test]
    fn auth_errors_are_pass_fatal() {
        let denied = RemoteError::new(RemoteOp::Put, Some("a.jpg"), "denied")
            .with_class(ApiErrorClass::Auth);
        assert!(denied.is_pass_fatal());
        assert_eq!(denied.class_label(), "auth");
        assert_eq!(denied.to_string(), "remote put failed for a.jpg: denied");

        let flaky = RemoteError::new(RemoteOp::List, None, "boom");
        assert!(!flaky.is_pass_fatal());
        assert_eq!(flaky.class_label(), "unknown");
        assert_eq!(flaky.to_string(), "remote list failed: boom");
    }

    #[test]
    fn bucket_errors_keep_their_classification() {
        let err = BucketError::Api {
            operation: "delete",
            key: Some("a.jpg".into()),
            status: Some(429),
            message: "slow down".into(),
        };
        let remote = RemoteError::from_bucket(RemoteOp::Delete, Some("a.jpg"), err);
        assert_eq!(remote.class, Some(ApiErrorClass::RateLimit));
        assert_eq!(remote.key.as_deref(), Some("a.jpg"));
    }
}
