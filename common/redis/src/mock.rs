use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Client, CustomRedisError};

/// Canned-response Redis client that records every call.
///
/// Writes succeed unless a failure was registered for the key; reads return
/// `NotFound` unless a value was registered.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    get_ret: HashMap<String, Result<String, CustomRedisError>>,
    setex_ret: HashMap<String, Result<(), CustomRedisError>>,
    batch_del_ret: Option<Result<(), CustomRedisError>>,
    scan_ret: HashMap<String, Result<Vec<String>, CustomRedisError>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<MockRedisCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get_ret(&mut self, key: &str, ret: Result<String, CustomRedisError>) -> Self {
        self.get_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn setex_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        self.setex_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn batch_del_ret(&mut self, ret: Result<(), CustomRedisError>) -> Self {
        self.batch_del_ret = Some(ret);
        self.clone()
    }

    pub fn scan_ret(&mut self, prefix: &str, ret: Result<Vec<String>, CustomRedisError>) -> Self {
        self.scan_ret.insert(prefix.to_owned(), ret);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_calls().clone()
    }
}

#[derive(Debug, Clone)]
pub enum MockRedisValue {
    None,
    String(String),
    StringWithTTL(String, u64),
    VecString(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: "get".to_string(),
            key: key.clone(),
            value: MockRedisValue::None,
        });

        self.get_ret
            .get(&key)
            .cloned()
            .unwrap_or(Err(CustomRedisError::NotFound))
    }

    async fn setex(
        &self,
        key: String,
        value: String,
        seconds: u64,
    ) -> Result<(), CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: "setex".to_string(),
            key: key.clone(),
            value: MockRedisValue::StringWithTTL(value, seconds),
        });

        self.setex_ret.get(&key).cloned().unwrap_or(Ok(()))
    }

    async fn batch_del(&self, keys: Vec<String>) -> Result<(), CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: "batch_del".to_string(),
            key: String::new(),
            value: MockRedisValue::VecString(keys),
        });

        self.batch_del_ret.clone().unwrap_or(Ok(()))
    }

    async fn scan_prefix(&self, prefix: String) -> Result<Vec<String>, CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: "scan_prefix".to_string(),
            key: prefix.clone(),
            value: MockRedisValue::None,
        });

        self.scan_ret.get(&prefix).cloned().unwrap_or(Ok(Vec::new()))
    }
}
