use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::{
    error::{StorageError, StudioResult},
    storage::client::StorageClient,
};

/// In-memory [`StorageClient`] used by unit and lifecycle tests.
///
/// Paths follow the `table/op` convention of the real backend:
/// - `*/upsert` and `*/update` merge `args` into the row keyed by
///   `args.runId` (falling back to `args.id`)
/// - `*/append` pushes `args` onto the row's list
/// - `*/get` returns the row, `*/list` returns every row or list
///
/// Every call is also recorded in an ordered log so tests can assert on
/// exactly what was written.
#[derive(Debug, Default)]
pub struct MemoryStorageClient {
    tables: DashMap<String, DashMap<String, Value>>,
    lists: DashMap<String, DashMap<String, Vec<Value>>>,
    log: std::sync::Mutex<Vec<(String, Value)>>,
}

impl MemoryStorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row currently stored under `table`/`key`.
    pub fn row(&self, table: &str, key: &str) -> Option<Value> {
        self.tables.get(table)?.get(key).map(|v| v.clone())
    }

    /// List currently stored under `table`/`key`, in append order.
    pub fn list(&self, table: &str, key: &str) -> Vec<Value> {
        self.lists
            .get(table)
            .and_then(|t| t.get(key).map(|v| v.clone()))
            .unwrap_or_default()
    }

    /// Every `(path, args)` mutation in arrival order.
    pub fn mutation_log(&self) -> Vec<(String, Value)> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn key_of(args: &Value) -> String {
        args.get("runId")
            .or_else(|| args.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or("_")
            .to_string()
    }

    fn split(path: &str) -> StudioResult<(&str, &str)> {
        path.split_once('/')
            .ok_or_else(|| StorageError::client_side("storage", format!("bad path '{path}'")).into())
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn query(&self, path: &str, args: Value) -> StudioResult<Value> {
        let (table, op) = Self::split(path)?;
        match op {
            "get" => {
                let key = Self::key_of(&args);
                self.row(table, &key)
                    .ok_or_else(|| StorageError::not_found("document", format!("{table}/{key}")).into())
            }
            "list" => {
                let rows: Vec<Value> = self
                    .tables
                    .get(table)
                    .map(|t| t.iter().map(|r| r.clone()).collect())
                    .unwrap_or_default();
                if rows.is_empty() {
                    let key = Self::key_of(&args);
                    return Ok(Value::Array(self.list(table, &key)));
                }
                Ok(Value::Array(rows))
            }
            other => {
                Err(StorageError::client_side("storage", format!("unknown query op '{other}'"))
                    .into())
            }
        }
    }

    async fn mutation(&self, path: &str, args: Value) -> StudioResult<Value> {
        if let Ok(mut log) = self.log.lock() {
            log.push((path.to_string(), args.clone()));
        }

        let (table, op) = Self::split(path)?;
        let key = Self::key_of(&args);
        match op {
            "upsert" | "update" => {
                let rows = self.tables.entry(table.to_string()).or_default();
                let merged = match rows.get(&key) {
                    Some(existing) => merge(existing.clone(), &args),
                    None => args.clone(),
                };
                rows.insert(key, merged.clone());
                Ok(merged)
            }
            "append" => {
                let lists = self.lists.entry(table.to_string()).or_default();
                lists.entry(key).or_default().push(args.clone());
                Ok(args)
            }
            other => Err(StorageError::client_side(
                "storage",
                format!("unknown mutation op '{other}'"),
            )
            .into()),
        }
    }
}

fn merge(mut base: Value, patch: &Value) -> Value {
    if let (Value::Object(base_map), Value::Object(patch_map)) = (&mut base, patch) {
        for (k, v) in patch_map {
            base_map.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let client = MemoryStorageClient::new();
        client
            .mutation("runs/upsert", json!({"runId": "r1", "status": "pending"}))
            .await
            .unwrap();
        let row = client.query("runs/get", json!({"runId": "r1"})).await.unwrap();
        assert_eq!(row["status"], "pending");
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let client = MemoryStorageClient::new();
        client
            .mutation("runs/upsert", json!({"runId": "r1", "status": "pending", "jobId": "j1"}))
            .await
            .unwrap();
        client
            .mutation("runs/update", json!({"runId": "r1", "status": "running"}))
            .await
            .unwrap();
        let row = client.query("runs/get", json!({"runId": "r1"})).await.unwrap();
        assert_eq!(row["status"], "running");
        assert_eq!(row["jobId"], "j1");
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let client = MemoryStorageClient::new();
        for step in 0..3 {
            client
                .mutation("metrics/append", json!({"runId": "r1", "step": step}))
                .await
                .unwrap();
        }
        let points = client.list("metrics", "r1");
        let steps: Vec<i64> = points.iter().map(|p| p["step"].as_i64().unwrap()).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let client = MemoryStorageClient::new();
        let err = client
            .query("runs/get", json!({"runId": "ghost"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
