//! Queue state backing the message queue.
//!
//! A message is invisible while `visible_at` is in the future. Every receive
//! stamps a new receipt, so only the latest consumer can settle a message.

use std::time::Duration;

use rusqlite::{TransactionBehavior, params};

use super::models::QueueMessage;
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceResult};

const MESSAGE_COLUMNS: &str =
    "id, queue, body, receive_count, dead_lettered_at, last_error, created_at";

/// One delivery of a message to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub receipt: String,
    /// Deliveries so far, including this one
    pub receive_count: u32,
    pub body: String,
}

/// Outcome of a receive call
#[derive(Debug, Default)]
pub struct Received {
    pub deliveries: Vec<Delivery>,
    /// Messages that had exhausted their deliveries and were dead-lettered
    /// instead of being handed out
    pub dead_lettered: Vec<QueueMessage>,
}

impl Database {
    pub fn enqueue_message(&self, queue: &str, body: &str) -> ServiceResult<String> {
        let conn = self.conn();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO queue_messages (id, queue, body, receive_count, visible_at, created_at) \
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![id, queue, body, now_millis(), now_rfc3339()],
        )
        .map_err(DatabaseError::Query)?;

        Ok(id)
    }

    /// Claim up to `max` visible messages, hiding them for `visibility`.
    pub fn receive_messages(
        &self,
        queue: &str,
        max: usize,
        visibility: Duration,
        max_receive_count: u32,
    ) -> ServiceResult<Received> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DatabaseError::Query)?;

        let now = now_millis();
        let candidates = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM queue_messages \
                     WHERE queue = ?1 AND dead_lettered_at IS NULL AND visible_at <= ?2 \
                     ORDER BY created_at, rowid LIMIT ?3"
                ))
                .map_err(DatabaseError::Query)?;
            stmt.query_map(params![queue, now, max as i64], QueueMessage::from_row)
                .map_err(DatabaseError::Query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DatabaseError::Query)?
        };

        let mut received = Received::default();
        let visible_at = now + visibility.as_millis() as i64;

        for mut message in candidates {
            if message.receive_count >= max_receive_count {
                let dead_lettered_at = now_rfc3339();
                tx.execute(
                    "UPDATE queue_messages SET dead_lettered_at = ?1, receipt = NULL, \
                     last_error = COALESCE(last_error, 'maximum deliveries exceeded') WHERE id = ?2",
                    params![dead_lettered_at, message.id],
                )
                .map_err(DatabaseError::Query)?;
                message.dead_lettered_at = Some(chrono::Utc::now());
                received.dead_lettered.push(message);
                continue;
            }

            let receipt = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE queue_messages SET receipt = ?1, receive_count = receive_count + 1, \
                 visible_at = ?2 WHERE id = ?3",
                params![receipt, visible_at, message.id],
            )
            .map_err(DatabaseError::Query)?;

            received.deliveries.push(Delivery {
                message_id: message.id,
                receipt,
                receive_count: message.receive_count + 1,
                body: message.body,
            });
        }

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(received)
    }

    /// Remove a delivered message. `false` when the receipt is stale.
    pub fn ack_message(&self, receipt: &str) -> ServiceResult<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "DELETE FROM queue_messages WHERE receipt = ?1 AND dead_lettered_at IS NULL",
                params![receipt],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Give a delivery back. The message reappears once its visibility
    /// timeout lapses.
    pub fn release_message(&self, receipt: &str, error: &str) -> ServiceResult<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE queue_messages SET receipt = NULL, last_error = ?1 \
                 WHERE receipt = ?2 AND dead_lettered_at IS NULL",
                params![error, receipt],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Park a delivered message for good
    pub fn dead_letter_message(&self, receipt: &str, error: &str) -> ServiceResult<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE queue_messages SET receipt = NULL, last_error = ?1, dead_lettered_at = ?2 \
                 WHERE receipt = ?3 AND dead_lettered_at IS NULL",
                params![error, now_rfc3339(), receipt],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Dead-lettered messages of a queue, oldest first
    pub fn list_dead_letters(&self, queue: &str) -> ServiceResult<Vec<QueueMessage>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM queue_messages \
                 WHERE queue = ?1 AND dead_lettered_at IS NOT NULL ORDER BY created_at, rowid"
            ))
            .map_err(DatabaseError::Query)?;

        let messages = stmt
            .query_map(params![queue], QueueMessage::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(messages)
    }

    /// Live (not dead-lettered) messages in a queue, visible or in flight
    pub fn queue_depth(&self, queue: &str) -> ServiceResult<u64> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND dead_lettered_at IS NULL",
                params![queue],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count.max(0) as u64)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
