//! In-process [`DatabaseClient`] used by this crate's unit and integration
//! tests. It never touches a database.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rpt_core::{DatabaseClient, DbDataSet};
use serde_json::{json, Value};

/// Records every call and answers without touching a database.
///
/// Queries listed in `failures` fail with the mapped message; `fail_all`
/// makes every capability fail. `delay` is slept before each answer.
#[derive(Debug, Default)]
pub struct StubClient {
    calls: Mutex<Vec<String>>,
    failures: HashMap<String, String>,
    fail_all: Option<String>,
    delay: Option<Duration>,
}

impl StubClient {
    /// A client whose every capability fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_all: Some(message.into()),
            ..Self::default()
        }
    }

    /// A client that fails only `query`, with `message`.
    #[must_use]
    pub fn failing_on(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failures: HashMap::from([(query.into(), message.into())]),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call so far, e.g. `connect`, `seed:shop`, `query:SELECT 1`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Query texts in call order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.strip_prefix("query:").map(str::to_string))
            .collect()
    }

    async fn answer(&self, call: String, key: &str, value: Value) -> anyhow::Result<Value> {
        self.calls.lock().push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_all.as_ref().or_else(|| self.failures.get(key)) {
            anyhow::bail!("{message}");
        }
        Ok(value)
    }
}

#[async_trait]
impl DatabaseClient for StubClient {
    async fn connect(&self) -> anyhow::Result<()> {
        self.answer("connect".into(), "", Value::Null).await.map(drop)
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.calls.lock().push("disconnect".into());
        Ok(())
    }

    async fn seed(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        self.answer(format!("seed:{}", data.name), &data.name, json!("Created."))
            .await
    }

    async fn write(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        self.answer(format!("write:{}", data.name), &data.name, json!("Written."))
            .await
    }

    async fn delete(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        self.answer(format!("delete:{}", data.name), &data.name, json!("Deleted."))
            .await
    }

    async fn query(&self, query: &str) -> anyhow::Result<Value> {
        self.answer(format!("query:{query}"), query, json!([{"answer": 42}]))
            .await
    }

    async fn list_databases(&self) -> anyhow::Result<Value> {
        self.answer("list".into(), "", json!({"postgres": {}})).await
    }
}
