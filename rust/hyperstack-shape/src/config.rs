use crate::error::FetchError;
use crate::signal::AbortSignal;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Replica {
    Default,
    Full,
}

impl Replica {
    pub fn as_str(&self) -> &'static str {
        match self {
            Replica::Default => "default",
            Replica::Full => "full",
        }
    }
}

/// Query parameters identifying which rows a shape syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeParams {
    pub table: String,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<Replica>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ShapeParams {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
            columns: None,
            replica: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_replica(mut self, replica: Replica) -> Self {
        self.replica = Some(replica);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map.insert("table".to_string(), Value::String(self.table.clone()));
        if let Some(clause) = &self.where_clause {
            map.insert("where".to_string(), Value::String(clause.clone()));
        }
        if let Some(columns) = &self.columns {
            map.insert(
                "columns".to_string(),
                Value::Array(columns.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(replica) = self.replica {
            map.insert(
                "replica".to_string(),
                Value::String(replica.as_str().to_string()),
            );
        }
        Value::Object(map)
    }
}

type FetchFn = dyn Fn(String) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync;

/// Override for the fetch function the sync client uses to reach the server.
///
/// Opaque to the cache: it never contributes to a canonical key.
#[derive(Clone)]
pub struct FetchClient {
    inner: Arc<FetchFn>,
}

impl FetchClient {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn fetch(&self, url: impl Into<String>) -> BoxFuture<'static, Result<Value, FetchError>> {
        (self.inner)(url.into())
    }
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient").finish_non_exhaustive()
    }
}

/// Options for a shape stream. Two options values that produce the same
/// canonical key share one cached stream.
#[derive(Debug, Clone)]
pub struct ShapeStreamOptions {
    pub url: String,
    pub params: Option<ShapeParams>,
    pub headers: Option<BTreeMap<String, String>>,
    /// `Some(false)` requests a one-shot fetch without live updates.
    pub subscribe: Option<bool>,
    pub offset: Option<String>,
    pub handle: Option<String>,
    pub signal: Option<AbortSignal>,
    pub fetch_client: Option<FetchClient>,
    /// Transport options not modelled above.
    pub extra: BTreeMap<String, Value>,
}

impl ShapeStreamOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: None,
            headers: None,
            subscribe: None,
            offset: None,
            handle: None,
            signal: None,
            fetch_client: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: ShapeParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_table(self, table: impl Into<String>) -> Self {
        self.with_params(ShapeParams::new(table))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = Some(subscribe);
        self
    }

    pub fn with_offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_fetch_client(mut self, client: FetchClient) -> Self {
        self.fetch_client = Some(client);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    /// Structural form used for hashing. Unset fields are left out, the
    /// signal becomes an empty object and the fetch override is dropped.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map.insert("url".to_string(), Value::String(self.url.clone()));
        if let Some(params) = &self.params {
            map.insert("params".to_string(), params.to_value());
        }
        if let Some(headers) = &self.headers {
            map.insert(
                "headers".to_string(),
                Value::Object(
                    headers
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
        }
        if let Some(subscribe) = self.subscribe {
            map.insert("subscribe".to_string(), Value::Bool(subscribe));
        }
        if let Some(offset) = &self.offset {
            map.insert("offset".to_string(), Value::String(offset.clone()));
        }
        if let Some(handle) = &self.handle {
            map.insert("handle".to_string(), Value::String(handle.clone()));
        }
        if self.signal.is_some() {
            // Signals are compared by presence only.
            map.insert("signal".to_string(), Value::Object(Map::new()));
        }
        Value::Object(map)
    }
}
