use redis::{aio::ConnectionManager, AsyncCommands, RedisResult};
use tracing::{debug, error, info};

use crate::config::RedisConfig;
use crate::types::ReviewTicket;

/// Mirrors pending review tickets onto a Redis list for external labellers.
#[derive(Clone)]
pub struct ReviewQueue {
    manager: ConnectionManager,
    queue_name: String,
}

impl ReviewQueue {
    pub async fn connect(config: &RedisConfig) -> RedisResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;

        info!("Review queue connected, mirroring to {}", config.queue_name);
        Ok(Self {
            manager,
            queue_name: config.queue_name.clone(),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub async fn enqueue(&self, ticket: &ReviewTicket) -> RedisResult<()> {
        let serialized = serde_json::to_string(ticket).map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "JSON serialization failed",
                e.to_string(),
            ))
        })?;

        let mut manager = self.manager.clone();
        let length: i64 = manager.lpush(&self.queue_name, serialized).await?;
        debug!("Enqueued ticket {} to {}, length: {}", ticket.ticket_id, self.queue_name, length);
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        let mut manager = self.manager.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => true,
            Err(e) => {
                error!("Redis health check failed: {}", e);
                false
            }
        }
    }
}
