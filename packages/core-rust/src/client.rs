use async_trait::async_trait;
use serde_json::Value;

use crate::dataset::{DbDataSet, QueryDataSet};

/// Database capability bound to an operation.
///
/// Implementations wrap a concrete engine (e.g. `PostgreSQL`) behind a handle
/// that may reconfigure its own connection state, such as switching the active
/// database during a seed. The orchestrator never runs two operations against
/// the same handle at once, so implementations only need interior mutability,
/// not their own request serialization.
///
/// Used as `Arc<dyn DatabaseClient>`.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Open the connection (or connection pool).
    async fn connect(&self) -> anyhow::Result<()>;

    /// Close the connection and release resources.
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Create the dataset's database and tables and load its rows.
    async fn seed(&self, data: &DbDataSet) -> anyhow::Result<Value>;

    /// Run a raw query and return its rows.
    async fn query(&self, query: &str) -> anyhow::Result<Value>;

    /// List the databases visible to this client.
    async fn list_databases(&self) -> anyhow::Result<Value>;

    /// Drop and re-establish the connection.
    async fn reconnect(&self) -> anyhow::Result<()> {
        self.disconnect().await?;
        self.connect().await
    }

    /// Insert the dataset's rows. Defaults to a full seed.
    async fn write(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        self.seed(data).await
    }

    /// Drop the dataset's tables.
    async fn delete(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        anyhow::bail!("delete is not supported for dataset {}", data.name)
    }
}

/// Recording capability stub shared by the crate's unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingClient {
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) fail_with: Option<String>,
        pub(crate) delay: Option<Duration>,
    }

    impl RecordingClient {
        pub(crate) fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::default()
            }
        }

        fn record(&self, call: String) -> anyhow::Result<()> {
            self.calls.lock().push(call);
            match &self.fail_with {
                Some(message) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(()),
            }
        }

        async fn pause(&self) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl DatabaseClient for RecordingClient {
        async fn connect(&self) -> anyhow::Result<()> {
            self.record("connect".into())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            self.record("disconnect".into())
        }

        async fn seed(&self, data: &DbDataSet) -> anyhow::Result<Value> {
            self.pause().await;
            self.record(format!("seed:{}", data.name))?;
            Ok(Value::String("Created.".into()))
        }

        async fn query(&self, query: &str) -> anyhow::Result<Value> {
            self.pause().await;
            self.record(format!("query:{query}"))?;
            Ok(serde_json::json!([{ "answer": 42 }]))
        }

        async fn list_databases(&self) -> anyhow::Result<Value> {
            self.record("list".into())?;
            Ok(serde_json::json!({}))
        }
    }

    pub(crate) fn query(text: &str) -> QueryDataSet {
        QueryDataSet::new("query", text)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingClient;
    use super::*;

    #[tokio::test]
    async fn reconnect_defaults_to_disconnect_then_connect() {
        let client = RecordingClient::default();
        client.reconnect().await.unwrap();
        assert_eq!(*client.calls.lock(), vec!["disconnect", "connect"]);
    }

    #[tokio::test]
    async fn write_defaults_to_seed() {
        let client = RecordingClient::default();
        let data = DbDataSet {
            name: "shop".into(),
            ..DbDataSet::default()
        };
        let result = client.write(&data).await.unwrap();
        assert_eq!(result, Value::String("Created.".into()));
        assert_eq!(*client.calls.lock(), vec!["seed:shop"]);
    }

    #[tokio::test]
    async fn delete_is_unsupported_by_default() {
        let client = RecordingClient::default();
        let err = client.delete(&DbDataSet::default()).await.unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
