//! Fixtures shared by the service unit tests.

use chrono::{Duration, Utc};
use rusqlite::Connection;

use crate::db::{self, queries};
use crate::models::{Adventure, AuthContext, NewAdventure};

pub fn setup_db() -> Connection {
    db::init_db(":memory:").unwrap()
}

pub fn seed_user(conn: &Connection, username: &str) -> AuthContext {
    let user = queries::create_user(
        conn,
        username,
        &format!("{username}@example.com"),
        Some("0712345678"),
        &format!("token-{username}"),
        None,
    )
    .unwrap();
    AuthContext { user }
}

pub fn admin_ctx(conn: &Connection) -> AuthContext {
    queries::upsert_admin(conn, "admin-token").unwrap();
    let user = queries::get_user_by_token(conn, "admin-token").unwrap().unwrap();
    AuthContext { user }
}

pub fn seed_adventure(conn: &Connection, owner_id: i64, price: i64, capacity: i64) -> Adventure {
    queries::insert_adventure(
        conn,
        owner_id,
        &NewAdventure {
            title: "Mount Longonot day hike".to_string(),
            description: "Crater rim walk".to_string(),
            location: "Naivasha".to_string(),
            price,
            duration: None,
            difficulty: None,
            image_url: None,
            max_capacity: Some(capacity),
        },
    )
    .unwrap()
}

/// RFC 3339 timestamp `days` from now.
pub fn future(days: i64) -> String {
    (Utc::now() + Duration::days(days)).to_rfc3339()
}
