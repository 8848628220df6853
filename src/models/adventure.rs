use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adventure {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub location: String,
    /// Whole Kenyan shillings per person.
    pub price: i64,
    pub duration: String,
    pub difficulty: String,
    pub image_url: Option<String>,
    pub max_capacity: i64,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAdventure {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub price: i64,
    pub duration: Option<String>,
    pub difficulty: Option<String>,
    pub image_url: Option<String>,
    pub max_capacity: Option<i64>,
}

impl NewAdventure {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::InvalidInput("title is required".to_string()));
        }
        validate_price(self.price)?;
        if let Some(capacity) = self.max_capacity {
            validate_capacity(capacity)?;
        }
        Ok(())
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdventurePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub price: Option<i64>,
    pub duration: Option<String>,
    pub difficulty: Option<String>,
    pub image_url: Option<String>,
    pub max_capacity: Option<i64>,
    pub is_active: Option<bool>,
}

impl AdventurePatch {
    /// True when the patch changes anything other than the active flag.
    pub fn touches_listing(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.location.is_some()
            || self.price.is_some()
            || self.duration.is_some()
            || self.difficulty.is_some()
            || self.image_url.is_some()
            || self.max_capacity.is_some()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(AppError::InvalidInput("title cannot be empty".to_string()));
            }
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(capacity) = self.max_capacity {
            validate_capacity(capacity)?;
        }
        Ok(())
    }

    pub fn apply(self, adventure: &mut Adventure) {
        if let Some(v) = self.title {
            adventure.title = v;
        }
        if let Some(v) = self.description {
            adventure.description = v;
        }
        if let Some(v) = self.location {
            adventure.location = v;
        }
        if let Some(v) = self.price {
            adventure.price = v;
        }
        if let Some(v) = self.duration {
            adventure.duration = v;
        }
        if let Some(v) = self.difficulty {
            adventure.difficulty = v;
        }
        if let Some(v) = self.image_url {
            adventure.image_url = Some(v);
        }
        if let Some(v) = self.max_capacity {
            adventure.max_capacity = v;
        }
        if let Some(v) = self.is_active {
            adventure.is_active = v;
        }
    }
}

fn validate_price(price: i64) -> Result<(), AppError> {
    if price < 0 {
        return Err(AppError::InvalidInput("price cannot be negative".to_string()));
    }
    Ok(())
}

fn validate_capacity(capacity: i64) -> Result<(), AppError> {
    if capacity < 1 {
        return Err(AppError::InvalidInput(
            "max_capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}
