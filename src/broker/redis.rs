use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::{ConnectionManager, MultiplexedConnection};
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broker::{result_key, ExecutionQueue, ResultStore};
use crate::error::Result;
use crate::function::RuntimeFamily;
use crate::messages::ExecutionResult;

/// Redis-backed queue (`LPUSH` / `BRPOP` lists) and result store
/// (`SET EX` / `GET`).
///
/// Redis answers a connection's commands in order, so a waiting `BRPOP`
/// would stall everything pipelined behind it. Pops therefore run on a
/// dedicated connection per partition; pushes and results share `conn`.
#[derive(Clone)]
pub struct RedisBroker {
    client: ::redis::Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<HashMap<RuntimeFamily, MultiplexedConnection>>>,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        tracing::info!("Connected to Redis");
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn blocking_conn(&self, family: RuntimeFamily) -> Result<MultiplexedConnection> {
        let mut conns = self.blocking.lock().await;
        if let Some(conn) = conns.get(&family) {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        conns.insert(family, conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl ExecutionQueue for RedisBroker {
    async fn push_raw(&self, family: RuntimeFamily, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(family.queue_name(), payload).await?;
        Ok(())
    }

    async fn pop(&self, family: RuntimeFamily, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.blocking_conn(family).await?;
        let popped: ::redis::RedisResult<Option<(String, String)>> =
            conn.brpop(family.queue_name(), timeout.as_secs_f64()).await;
        match popped {
            Ok(popped) => Ok(popped.map(|(_, payload)| payload)),
            Err(e) => {
                // Reconnect on the next pop
                self.blocking.lock().await.remove(&family);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ResultStore for RedisBroker {
    async fn put(&self, result: &ExecutionResult, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(result)?;
        conn.set_ex::<_, _, ()>(result_key(result.invocation_id), payload, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, invocation_id: Uuid) -> Result<Option<ExecutionResult>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(result_key(invocation_id)).await?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
