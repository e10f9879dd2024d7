//! Tickets: admin-reviewable requests.

use serde::{Deserialize, Serialize};

use super::{CreateMachineRequest, Grade};

/// What a ticket asks for, with its payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum TicketRequest {
    #[serde(rename_all = "camelCase")]
    GradeUpgrade { requested_grade: Grade },
    MachineCreation(CreateMachineRequest),
    #[serde(rename_all = "camelCase")]
    MachineDeletion { machine_id: String },
}

impl TicketRequest {
    /// Stored `kind` column and serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TicketRequest::GradeUpgrade { .. } => "gradeUpgrade",
            TicketRequest::MachineCreation(_) => "machineCreation",
            TicketRequest::MachineDeletion { .. } => "machineDeletion",
        }
    }
}

/// Review state of a ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Approved => "approved",
            TicketStatus::Rejected => "rejected",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TicketStatus::Pending),
            "approved" => Some(TicketStatus::Approved),
            "rejected" => Some(TicketStatus::Rejected),
            "cancelled" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }
}

/// An admin-reviewable request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub requester_id: String,
    #[serde(flatten)]
    pub request: TicketRequest,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
}

/// Query parameters for listing tickets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilter {
    #[serde(default)]
    pub status: Option<TicketStatus>,
}

/// Body of an approve/reject call, for tickets and signups alike.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub comment: Option<String>,
}
