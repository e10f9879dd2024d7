//! User accounts, grades and points.

use serde::{Deserialize, Serialize};

/// Seniority tier gating access to machines and sensors.
///
/// Variants are declared in ascending order so `Ord` follows seniority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grade {
    Apprentice,
    Operator,
    Technician,
    Engineer,
    Chief,
}

impl Grade {
    pub const ALL: [Grade; 5] = [
        Grade::Apprentice,
        Grade::Operator,
        Grade::Technician,
        Grade::Engineer,
        Grade::Chief,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Apprentice => "Apprentice",
            Grade::Operator => "Operator",
            Grade::Technician => "Technician",
            Grade::Engineer => "Engineer",
            Grade::Chief => "Chief",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == s)
    }

    /// Points a user needs before this grade can be requested.
    pub fn min_points(&self) -> i64 {
        match self {
            Grade::Apprentice => 0,
            Grade::Operator => 100,
            Grade::Technician => 300,
            Grade::Engineer => 700,
            Grade::Chief => 1500,
        }
    }

    /// The grade directly above this one, if any.
    pub fn next(&self) -> Option<Self> {
        let idx = Self::ALL.iter().position(|g| g == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

/// Lifecycle of a signup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
    Pending,
    Active,
    Rejected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AccountStatus::Pending),
            "active" => Some(AccountStatus::Active),
            "rejected" => Some(AccountStatus::Rejected),
            _ => None,
        }
    }
}

/// A portal user. The password hash is never part of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub grade: Grade,
    pub points: i64,
    pub is_admin: bool,
    pub status: AccountStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for signing up.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

/// Request body for logging in.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Issued bearer token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

/// Request body for an admin edit of a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub grade: Option<Grade>,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub is_admin: Option<bool>,
}

/// One row of the points ranking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub grade: Grade,
    pub points: i64,
}
