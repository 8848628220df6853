use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub is_admin: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStatistics {
    pub adventures_created: i64,
    pub bookings_made: i64,
    pub payments_made: i64,
    /// Sum of completed payments, in whole shillings.
    pub total_spent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub statistics: UserStatistics,
}

/// The caller of a core operation, resolved once from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
}

impl AuthContext {
    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin
    }

    /// Owners act on their own records; admins act on anyone's.
    pub fn can_act_for(&self, owner_id: i64) -> bool {
        self.user.is_admin || self.user.id == owner_id
    }
}
