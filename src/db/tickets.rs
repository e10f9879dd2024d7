//! Ticket operations and their effects on approval.

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::machines::{insert_machine, remove_machine};
use super::repository::{new_id, now, Repository};
use super::users::{fetch_user, set_grade};
use crate::errors::AppError;
use crate::models::{Machine, Ticket, TicketRequest, TicketStatus, User};

/// Outcome of an approval or rejection.
#[derive(Debug, Clone)]
pub struct TicketReview {
    pub ticket: Ticket,
    /// Machine created by an approved creation ticket
    pub created_machine: Option<Machine>,
}

impl Repository {
    /// File a ticket on behalf of `requester`.
    pub async fn create_ticket(
        &self,
        requester: &User,
        request: &TicketRequest,
    ) -> Result<Ticket, AppError> {
        match request {
            TicketRequest::GradeUpgrade { requested_grade } => {
                let next = requester.grade.next().ok_or_else(|| {
                    AppError::Validation("You already hold the highest grade".to_string())
                })?;
                if *requested_grade != next {
                    return Err(AppError::Validation(format!(
                        "Only the next grade ({}) can be requested",
                        next.as_str()
                    )));
                }
                if requester.points < next.min_points() {
                    return Err(AppError::Validation(format!(
                        "{} requires {} points, you have {}",
                        next.as_str(),
                        next.min_points(),
                        requester.points
                    )));
                }
            }
            TicketRequest::MachineCreation(machine) => {
                machine.validate().map_err(AppError::Validation)?;
            }
            TicketRequest::MachineDeletion { machine_id } => {
                if self.get_machine(machine_id).await?.is_none() {
                    return Err(AppError::NotFound(format!(
                        "Machine {} not found",
                        machine_id
                    )));
                }
            }
        }

        let pending: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM tickets WHERE requester_id = ? AND kind = ? AND status = 'pending'",
        )
        .bind(&requester.id)
        .bind(request.kind())
        .fetch_one(&self.pool)
        .await?
        .get("n");
        if pending > 0 {
            return Err(AppError::Conflict(format!(
                "You already have a pending {} ticket",
                request.kind()
            )));
        }

        let ticket = Ticket {
            id: new_id(),
            requester_id: requester.id.clone(),
            request: request.clone(),
            status: TicketStatus::Pending,
            comment: None,
            reviewed_by: None,
            created_at: now(),
            reviewed_at: None,
        };

        sqlx::query(
            "INSERT INTO tickets (id, requester_id, kind, request, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.id)
        .bind(&ticket.requester_id)
        .bind(request.kind())
        .bind(serde_json::to_string(request)?)
        .bind(ticket.status.as_str())
        .bind(&ticket.created_at)
        .execute(&self.pool)
        .await?;

        Ok(ticket)
    }

    /// Get a ticket by ID.
    pub async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_ticket(&mut conn, id).await
    }

    /// List tickets, newest first, optionally restricted to one requester and status.
    pub async fn list_tickets(
        &self,
        requester_id: Option<&str>,
        status: Option<TicketStatus>,
    ) -> Result<Vec<Ticket>, AppError> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(
            r#"SELECT id, requester_id, request, status, comment, reviewed_by, created_at, reviewed_at
               FROM tickets
               WHERE (? IS NULL OR requester_id = ?) AND (? IS NULL OR status = ?)
               ORDER BY created_at DESC"#,
        )
        .bind(requester_id)
        .bind(requester_id)
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ticket_from_row).collect()
    }

    /// Withdraw a pending ticket. Only its requester may do so.
    pub async fn cancel_ticket(&self, id: &str, requester_id: &str) -> Result<Ticket, AppError> {
        let ticket = self
            .get_ticket(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", id)))?;

        if ticket.requester_id != requester_id {
            return Err(AppError::Forbidden(
                "Only the requester can cancel a ticket".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE tickets SET status = 'cancelled' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Ticket is already {}",
                ticket.status.as_str()
            )));
        }

        Ok(Ticket {
            status: TicketStatus::Cancelled,
            ..ticket
        })
    }

    /// Approve or reject a pending ticket. Approval applies the request in
    /// the same transaction as the status change.
    pub async fn review_ticket(
        &self,
        id: &str,
        reviewer_id: &str,
        approve: bool,
        comment: Option<String>,
    ) -> Result<TicketReview, AppError> {
        let mut tx = self.pool.begin().await?;

        let ticket = fetch_ticket(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", id)))?;

        if ticket.status != TicketStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Ticket is already {}",
                ticket.status.as_str()
            )));
        }

        let now = now();
        let mut created_machine = None;
        if approve {
            match &ticket.request {
                TicketRequest::GradeUpgrade { requested_grade } => {
                    let requester = fetch_user(&mut tx, &ticket.requester_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("User {} not found", ticket.requester_id))
                        })?;
                    // An admin may already have raised the grade by hand.
                    if requester.grade < *requested_grade {
                        set_grade(&mut tx, &requester.id, *requested_grade, &now).await?;
                    }
                }
                TicketRequest::MachineCreation(request) => {
                    created_machine = Some(insert_machine(&mut tx, request).await?);
                }
                TicketRequest::MachineDeletion { machine_id } => {
                    remove_machine(&mut tx, machine_id).await?;
                }
            }
        }

        let status = if approve {
            TicketStatus::Approved
        } else {
            TicketStatus::Rejected
        };

        let result = sqlx::query(
            "UPDATE tickets SET status = ?, comment = ?, reviewed_by = ?, reviewed_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(&comment)
        .bind(reviewer_id)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "Ticket was reviewed concurrently".to_string(),
            ));
        }

        tx.commit().await?;

        Ok(TicketReview {
            ticket: Ticket {
                status,
                comment,
                reviewed_by: Some(reviewer_id.to_string()),
                reviewed_at: Some(now),
                ..ticket
            },
            created_machine,
        })
    }
}

async fn fetch_ticket(conn: &mut SqliteConnection, id: &str) -> Result<Option<Ticket>, AppError> {
    let row = sqlx::query(
        "SELECT id, requester_id, request, status, comment, reviewed_by, created_at, reviewed_at FROM tickets WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(ticket_from_row).transpose()
}

fn ticket_from_row(row: &SqliteRow) -> Result<Ticket, AppError> {
    let request: String = row.get("request");
    let status: String = row.get("status");
    Ok(Ticket {
        id: row.get("id"),
        requester_id: row.get("requester_id"),
        request: serde_json::from_str(&request)?,
        status: TicketStatus::parse(&status).unwrap_or(TicketStatus::Pending),
        comment: row.get("comment"),
        reviewed_by: row.get("reviewed_by"),
        created_at: row.get("created_at"),
        reviewed_at: row.get("reviewed_at"),
    })
}
