//! Notification mails.
//!
//! Mails are queued in the outbox table; an external relay delivers them.

use std::sync::Arc;

use crate::db::{OutboundMail, Repository};
use crate::errors::AppError;
use crate::models::{Ticket, TicketRequest, TicketStatus, User};

/// Subject and body of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

/// Queues notification mails for users.
pub struct Mailer {
    from: String,
    repo: Arc<Repository>,
}

impl Mailer {
    pub fn new(from: impl Into<String>, repo: Arc<Repository>) -> Self {
        Self {
            from: from.into(),
            repo,
        }
    }

    /// Queue `message` for `user`. Users without an email address are skipped.
    pub async fn send(
        &self,
        user: &User,
        message: Message,
    ) -> Result<Option<OutboundMail>, AppError> {
        let Some(recipient) = user.email.as_deref().filter(|e| !e.trim().is_empty()) else {
            tracing::debug!(user = %user.username, "No email address, skipping notification");
            return Ok(None);
        };

        let mail = self
            .repo
            .queue_mail(&self.from, recipient, &message.subject, &message.body)
            .await?;
        tracing::info!(to = %mail.recipient, subject = %mail.subject, "Queued notification");
        Ok(Some(mail))
    }

    pub async fn signup_reviewed(&self, user: &User, approved: bool) -> Result<(), AppError> {
        self.send(user, signup_message(user, approved)).await?;
        Ok(())
    }

    pub async fn ticket_reviewed(&self, user: &User, ticket: &Ticket) -> Result<(), AppError> {
        self.send(user, ticket_message(user, ticket)).await?;
        Ok(())
    }
}

pub fn signup_message(user: &User, approved: bool) -> Message {
    if approved {
        Message {
            subject: "Your SpaceY account is active".to_string(),
            body: format!(
                "Hello {},\n\nyour account has been approved. You can now sign in.\n",
                user.username
            ),
        }
    } else {
        Message {
            subject: "Your SpaceY signup was declined".to_string(),
            body: format!(
                "Hello {},\n\nan administrator declined your signup request.\n",
                user.username
            ),
        }
    }
}

pub fn ticket_message(user: &User, ticket: &Ticket) -> Message {
    let what = match &ticket.request {
        TicketRequest::GradeUpgrade { requested_grade } => {
            format!("upgrade to grade {}", requested_grade.as_str())
        }
        TicketRequest::MachineCreation(machine) => {
            format!("creation of machine {}", machine.name.trim())
        }
        TicketRequest::MachineDeletion { machine_id } => {
            format!("deletion of machine {}", machine_id)
        }
    };
    let verdict = match ticket.status {
        TicketStatus::Approved => "approved",
        TicketStatus::Rejected => "rejected",
        TicketStatus::Cancelled => "cancelled",
        TicketStatus::Pending => "pending",
    };

    let mut body = format!(
        "Hello {},\n\nyour request for {} was {}.\n",
        user.username, what, verdict
    );
    if let Some(comment) = ticket.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        body.push_str(&format!("\nComment: {}\n", comment.trim()));
    }

    Message {
        subject: format!("Ticket {}: {}", verdict, what),
        body,
    }
}
