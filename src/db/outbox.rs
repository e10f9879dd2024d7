//! Outgoing mail queue.

use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{new_id, now, Repository};
use crate::errors::AppError;

/// A notification waiting for delivery by the mail relay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMail {
    pub id: String,
    pub recipient: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub created_at: String,
}

impl Repository {
    pub async fn queue_mail(
        &self,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<OutboundMail, AppError> {
        let mail = OutboundMail {
            id: new_id(),
            recipient: recipient.to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO mail_outbox (id, recipient, sender, subject, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&mail.id)
        .bind(&mail.recipient)
        .bind(&mail.sender)
        .bind(&mail.subject)
        .bind(&mail.body)
        .bind(&mail.created_at)
        .execute(&self.pool)
        .await?;

        Ok(mail)
    }

    /// Queued mails, newest first.
    pub async fn list_outbox(&self) -> Result<Vec<OutboundMail>, AppError> {
        let rows = sqlx::query(
            "SELECT id, recipient, sender, subject, body, created_at FROM mail_outbox ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(mail_from_row).collect())
    }
}

fn mail_from_row(row: &SqliteRow) -> OutboundMail {
    OutboundMail {
        id: row.get("id"),
        recipient: row.get("recipient"),
        sender: row.get("sender"),
        subject: row.get("subject"),
        body: row.get("body"),
        created_at: row.get("created_at"),
    }
}
