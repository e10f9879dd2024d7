//! User accounts, signup review, points and the leaderboard.

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::repository::{new_id, now, Repository};
use crate::errors::AppError;
use crate::models::{AccountStatus, Grade, LeaderboardEntry, UpdateUserRequest, User};

impl Repository {
    /// Create a user. Usernames are unique.
    pub async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
        status: AccountStatus,
        is_admin: bool,
    ) -> Result<User, AppError> {
        let id = new_id();
        let now = now();

        let result = sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, grade, points, is_admin, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(Grade::Apprentice.as_str())
        .bind(is_admin as i32)
        .bind(status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::Conflict(format!(
                    "Username {} is already taken",
                    username
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(User {
            id,
            username: username.to_string(),
            email: email.map(str::to_string),
            grade: Grade::Apprentice,
            points: 0,
            is_admin,
            status,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT id, username, email, grade, points, is_admin, status, created_at, updated_at FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Get a user and their password hash by username.
    pub async fn get_user_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, AppError> {
        let row = sqlx::query(
            "SELECT id, username, email, grade, points, is_admin, status, created_at, updated_at, password_hash FROM users WHERE username = ?"
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| (user_from_row(&row), row.get("password_hash"))))
    }

    /// List all users.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(
            "SELECT id, username, email, grade, points, is_admin, status, created_at, updated_at FROM users ORDER BY username"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    /// List users in the given account state, oldest signup first.
    pub async fn list_users_by_status(&self, status: AccountStatus) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(
            "SELECT id, username, email, grade, points, is_admin, status, created_at, updated_at FROM users WHERE status = ? ORDER BY created_at"
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    /// Administrative edit of a user.
    pub async fn update_user(
        &self,
        id: &str,
        request: &UpdateUserRequest,
    ) -> Result<User, AppError> {
        let existing = self
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        if request.points.is_some_and(|p| p < 0) {
            return Err(AppError::Validation("Points cannot be negative".to_string()));
        }

        let now = now();
        let email = request.email.clone().or(existing.email.clone());
        let grade = request.grade.unwrap_or(existing.grade);
        let points = request.points.unwrap_or(existing.points);
        let is_admin = request.is_admin.unwrap_or(existing.is_admin);

        sqlx::query(
            "UPDATE users SET email = ?, grade = ?, points = ?, is_admin = ?, updated_at = ? WHERE id = ?"
        )
        .bind(&email)
        .bind(grade.as_str())
        .bind(points)
        .bind(is_admin as i32)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(User {
            email,
            grade,
            points,
            is_admin,
            updated_at: now,
            ..existing
        })
    }

    /// Approve or reject a pending signup.
    pub async fn review_signup(&self, id: &str, approve: bool) -> Result<User, AppError> {
        let existing = self
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        let status = if approve {
            AccountStatus::Active
        } else {
            AccountStatus::Rejected
        };
        let now = now();

        let result = sqlx::query(
            "UPDATE users SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "User {} is not awaiting approval",
                existing.username
            )));
        }

        Ok(User {
            status,
            updated_at: now,
            ..existing
        })
    }

    /// Delete a user. Refused while the user is on a machine.
    pub async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let open_cycles: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM cycles WHERE user_id = ? AND ended_at IS NULL")
                .bind(id)
                .fetch_one(&self.pool)
                .await?
                .get("n");
        if open_cycles > 0 {
            return Err(AppError::Conflict(
                "User is currently running a cycle".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        Ok(())
    }

    /// Active users ranked by points.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, AppError> {
        let rows = sqlx::query(
            "SELECT id, username, email, grade, points, is_admin, status, created_at, updated_at FROM users WHERE status = 'active' ORDER BY points DESC, username LIMIT ?"
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(user_from_row)
            .enumerate()
            .map(|(idx, user)| LeaderboardEntry {
                rank: idx + 1,
                user_id: user.id,
                username: user.username,
                grade: user.grade,
                points: user.points,
            })
            .collect())
    }

    /// Create the configured administrator, or promote and activate it if it exists.
    pub async fn ensure_admin(&self, username: &str, password_hash: &str) -> Result<User, AppError> {
        if let Some((user, _)) = self.get_user_credentials(username).await? {
            let now = now();
            sqlx::query(
                "UPDATE users SET is_admin = 1, status = 'active', password_hash = ?, updated_at = ? WHERE id = ?",
            )
            .bind(password_hash)
            .bind(&now)
            .bind(&user.id)
            .execute(&self.pool)
            .await?;

            return Ok(User {
                is_admin: true,
                status: AccountStatus::Active,
                updated_at: now,
                ..user
            });
        }

        self.create_user(username, None, password_hash, AccountStatus::Active, true)
            .await
    }
}

pub(super) async fn fetch_user(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<User>, AppError> {
    let row = sqlx::query(
        "SELECT id, username, email, grade, points, is_admin, status, created_at, updated_at FROM users WHERE id = ?"
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.as_ref().map(user_from_row))
}

/// Add points to a user and return the new total.
pub(super) async fn award_points(
    conn: &mut SqliteConnection,
    user_id: &str,
    points: i64,
    now: &str,
) -> Result<i64, AppError> {
    let row = sqlx::query(
        "UPDATE users SET points = points + ?, updated_at = ? WHERE id = ? RETURNING points",
    )
    .bind(points)
    .bind(now)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

    Ok(row.get("points"))
}

pub(super) async fn set_grade(
    conn: &mut SqliteConnection,
    user_id: &str,
    grade: Grade,
    now: &str,
) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE users SET grade = ?, updated_at = ? WHERE id = ?")
        .bind(grade.as_str())
        .bind(now)
        .bind(user_id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }
    Ok(())
}

fn user_from_row(row: &SqliteRow) -> User {
    let is_admin: i32 = row.get("is_admin");
    let grade: String = row.get("grade");
    let status: String = row.get("status");
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        grade: Grade::parse(&grade).unwrap_or(Grade::Apprentice),
        points: row.get("points"),
        is_admin: is_admin != 0,
        status: AccountStatus::parse(&status).unwrap_or(AccountStatus::Pending),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
