//! Ticket endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult, Json, Query};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::models::{ReviewRequest, Ticket, TicketFilter, TicketRequest};
use crate::AppState;

/// POST /api/tickets - File a request for admin review.
pub async fn create_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<TicketRequest>,
) -> ApiResult<Ticket> {
    let ticket = state.repo.create_ticket(&user, &request).await?;

    tracing::info!(
        ticket_id = %ticket.id,
        kind = request.kind(),
        user = %user.username,
        "Ticket filed"
    );
    success(ticket)
}

/// GET /api/tickets - Admins see every ticket, users their own.
pub async fn list_tickets(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<TicketFilter>,
) -> ApiResult<Vec<Ticket>> {
    let requester = (!user.is_admin).then_some(user.id.as_str());
    success(state.repo.list_tickets(requester, filter.status).await?)
}

/// GET /api/tickets/{id} - A ticket (owner or admin).
pub async fn get_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Ticket> {
    let ticket = state
        .repo
        .get_ticket(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", id)))?;

    if !user.is_admin && ticket.requester_id != user.id {
        return Err(AppError::Forbidden(
            "You can only access your own tickets".to_string(),
        ));
    }
    success(ticket)
}

/// POST /api/tickets/{id}/cancel - Withdraw one's own pending ticket.
pub async fn cancel_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Ticket> {
    success(state.repo.cancel_ticket(&id, &user.id).await?)
}

/// POST /api/tickets/{id}/approve - Approve and apply a ticket (admin).
pub async fn approve_ticket(
    State(state): State<AppState>,
    CurrentUser(reviewer): CurrentUser,
    Path(id): Path<String>,
    review: Option<Json<ReviewRequest>>,
) -> ApiResult<Ticket> {
    review_ticket(state, reviewer.id, id, true, review).await
}

/// POST /api/tickets/{id}/reject - Reject a ticket (admin).
pub async fn reject_ticket(
    State(state): State<AppState>,
    CurrentUser(reviewer): CurrentUser,
    Path(id): Path<String>,
    review: Option<Json<ReviewRequest>>,
) -> ApiResult<Ticket> {
    review_ticket(state, reviewer.id, id, false, review).await
}

async fn review_ticket(
    state: AppState,
    reviewer_id: String,
    id: String,
    approve: bool,
    review: Option<Json<ReviewRequest>>,
) -> ApiResult<Ticket> {
    let comment = review
        .and_then(|Json(r)| r.comment)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let outcome = state
        .repo
        .review_ticket(&id, &reviewer_id, approve, comment)
        .await?;
    let ticket = outcome.ticket;

    tracing::info!(
        ticket_id = %ticket.id,
        kind = ticket.request.kind(),
        status = ticket.status.as_str(),
        "Ticket reviewed"
    );

    if let Some(machine) = &outcome.created_machine {
        if let Err(e) = state.search.index_machine(machine).await {
            tracing::warn!("Failed to index machine: {}", e);
        }
    }
    if let (true, TicketRequest::MachineDeletion { machine_id }) = (approve, &ticket.request) {
        if let Err(e) = state.search.remove(machine_id).await {
            tracing::warn!("Failed to remove machine from index: {}", e);
        }
    }

    match state.repo.get_user(&ticket.requester_id).await {
        Ok(Some(requester)) => {
            if let Err(e) = state.mailer.ticket_reviewed(&requester, &ticket).await {
                tracing::warn!("Failed to queue ticket notification: {}", e);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to load ticket requester: {}", e),
    }

    success(ticket)
}
