use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{AuthContext, Page, PageParams, User, UserDetail};
use crate::services::payments::normalize_msisdn;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone_number: Option<String>,
}

/// `username` may hold either the username or the email address.
#[derive(Debug, Clone, Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

/// An account and the bearer token it authenticates with. Tokens are only
/// ever returned here, at registration and login.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub user: User,
    pub api_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Hashes on the blocking pool; bcrypt is deliberately slow.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password check task failed: {e}")))?
        .map_err(|e| AppError::Internal(format!("password check failed: {e}")))
}

/// Creates the account. `password_hash` comes from [`hash_password`].
pub fn register(
    conn: &Connection,
    request: &RegisterUser,
    password_hash: &str,
) -> Result<Credentials, AppError> {
    let username = request.username.trim();
    let email = request.email.trim().to_lowercase();
    if username.len() < 3 || username.len() > 80 {
        return Err(AppError::InvalidInput(
            "username must be between 3 and 80 characters".to_string(),
        ));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::InvalidInput(format!("invalid email: {email}")));
    }
    let phone = match request.phone_number.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            normalize_msisdn(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("invalid phone number: {raw}")))?,
        ),
    };

    let api_token = uuid::Uuid::new_v4().to_string();
    let created = queries::create_user(
        conn,
        username,
        &email,
        phone.as_deref(),
        &api_token,
        Some(password_hash),
    );
    let user = match created {
        Ok(user) => user,
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(AppError::InvalidInput(
                "username or email already registered".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok(Credentials { user, api_token })
}

/// The account `identifier` names and its password hash. Unknown accounts
/// and accounts without a password look the same to the caller.
pub fn find_credentials(conn: &Connection, identifier: &str) -> Result<(User, String), AppError> {
    match queries::get_user_credentials(conn, identifier.trim())? {
        Some((user, Some(hash))) => Ok((user, hash)),
        _ => Err(AppError::Unauthenticated),
    }
}

/// Replaces the user's bearer token. The previous token stops working.
pub fn issue_token(conn: &Connection, user: User) -> Result<Credentials, AppError> {
    let api_token = uuid::Uuid::new_v4().to_string();
    if !queries::set_user_token(conn, user.id, &api_token)? {
        return Err(AppError::NotFound(format!("user {}", user.id)));
    }
    Ok(Credentials { user, api_token })
}

/// Password login by username or email. Issues a fresh bearer token.
pub async fn login(state: &AppState, request: &Login) -> Result<Credentials, AppError> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(AppError::InvalidInput(
            "username or email and password are required".to_string(),
        ));
    }

    let found = {
        let db = state.db();
        find_credentials(&db, &request.username)
    };
    let (user, hash) = match found {
        Ok(found) => found,
        Err(AppError::Unauthenticated) => {
            tracing::warn!(identifier = %request.username.trim(), "login for unknown account");
            return Err(AppError::Unauthenticated);
        }
        Err(e) => return Err(e),
    };
    if !verify_password(&request.password, &hash).await? {
        tracing::warn!(user_id = user.id, "login with wrong password");
        return Err(AppError::Unauthenticated);
    }

    let credentials = {
        let db = state.db();
        issue_token(&db, user)?
    };
    tracing::info!(user_id = credentials.user.id, "user logged in");
    Ok(credentials)
}

/// Resolves a bearer token to the caller.
pub fn authenticate(conn: &Connection, token: &str) -> Result<AuthContext, AppError> {
    if token.is_empty() {
        return Err(AppError::Unauthenticated);
    }
    queries::get_user_by_token(conn, token)?
        .map(|user| AuthContext { user })
        .ok_or(AppError::Unauthenticated)
}

pub fn list_users(
    conn: &Connection,
    ctx: &AuthContext,
    filter: &UserFilter,
) -> Result<Page<User>, AppError> {
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    let page = PageParams {
        page: filter.page,
        per_page: filter.per_page,
    };
    let search = filter.search.as_deref().map(str::trim);
    let (users, total) = queries::list_users(conn, search, &page)?;
    Ok(Page::new(users, total, &page))
}

pub fn get_user(conn: &Connection, ctx: &AuthContext, user_id: i64) -> Result<UserDetail, AppError> {
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    let user = queries::get_user(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
    let statistics = queries::user_statistics(conn, user_id)?;
    Ok(UserDetail { user, statistics })
}

/// Flips the admin flag on another account. Admins cannot demote themselves.
pub fn toggle_admin(conn: &Connection, ctx: &AuthContext, user_id: i64) -> Result<User, AppError> {
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    if user_id == ctx.user_id() {
        return Err(AppError::InvalidInput(
            "cannot change your own admin status".to_string(),
        ));
    }
    let user = queries::get_user(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
    queries::set_user_admin(conn, user_id, !user.is_admin)?;
    tracing::info!(user_id, is_admin = !user.is_admin, by = ctx.user_id(), "admin flag toggled");
    queries::get_user(conn, user_id)?.ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
}
