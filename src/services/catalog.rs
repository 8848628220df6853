use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{Adventure, AdventurePatch, AuthContext, NewAdventure};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    #[default]
    All,
    Active,
    Inactive,
}

impl ListingStatus {
    fn as_filter(self) -> Option<bool> {
        match self {
            ListingStatus::All => None,
            ListingStatus::Active => Some(true),
            ListingStatus::Inactive => Some(false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub adventure_id: i64,
    pub date: NaiveDate,
    pub max_capacity: i64,
    pub confirmed_people: i64,
    pub available: i64,
}

fn require_admin(ctx: &AuthContext) -> Result<(), AppError> {
    if ctx.is_admin() {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

fn find(conn: &Connection, id: i64) -> Result<Adventure, AppError> {
    queries::get_adventure(conn, id)?.ok_or_else(|| AppError::NotFound(format!("adventure {id}")))
}

/// Loads an adventure the caller owns, or any adventure for admins.
fn find_owned(conn: &Connection, ctx: &AuthContext, id: i64) -> Result<Adventure, AppError> {
    let adventure = find(conn, id)?;
    if !ctx.can_act_for(adventure.user_id) {
        return Err(AppError::Unauthorized);
    }
    Ok(adventure)
}

/// Public listing: active adventures only.
pub fn list_active(conn: &Connection) -> Result<Vec<Adventure>, AppError> {
    Ok(queries::list_adventures(conn, None, Some(true))?)
}

/// Everything the caller has listed, active or not.
pub fn list_owned(conn: &Connection, ctx: &AuthContext) -> Result<Vec<Adventure>, AppError> {
    Ok(queries::list_adventures(conn, Some(ctx.user_id()), None)?)
}

/// Inactive adventures are hidden from everyone but their owner and admins.
pub fn get_adventure(
    conn: &Connection,
    ctx: Option<&AuthContext>,
    id: i64,
) -> Result<Adventure, AppError> {
    let adventure = find(conn, id)?;
    if !adventure.is_active && !ctx.is_some_and(|ctx| ctx.can_act_for(adventure.user_id)) {
        return Err(AppError::NotFound(format!("adventure {id}")));
    }
    Ok(adventure)
}

pub fn create_adventure(
    conn: &Connection,
    ctx: &AuthContext,
    new: &NewAdventure,
) -> Result<Adventure, AppError> {
    new.validate()?;
    let adventure = queries::insert_adventure(conn, ctx.user_id(), new)?;
    tracing::info!(adventure_id = adventure.id, title = %adventure.title, "adventure created");
    Ok(adventure)
}

/// Once an adventure has confirmed bookings its listing is frozen; only the
/// active flag may still change.
pub fn update_adventure(
    conn: &mut Connection,
    ctx: &AuthContext,
    id: i64,
    patch: AdventurePatch,
) -> Result<Adventure, AppError> {
    patch.validate()?;

    let adventure = db::retry_on_busy(conn, |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut adventure = find_owned(&tx, ctx, id)?;
        if patch.touches_listing() && queries::count_confirmed_bookings(&tx, id)? > 0 {
            return Err(AppError::InvalidStateTransition(format!(
                "adventure {id} has confirmed bookings; only its active status can change"
            )));
        }
        patch.clone().apply(&mut adventure);
        queries::update_adventure(&tx, &adventure)?;
        let adventure = find(&tx, id)?;
        tx.commit()?;
        Ok(adventure)
    })?;
    tracing::info!(adventure_id = adventure.id, "adventure updated");
    Ok(adventure)
}

/// Deletion is a soft deactivate so bookings and payments keep their reference.
pub fn deactivate_adventure(
    conn: &Connection,
    ctx: &AuthContext,
    id: i64,
) -> Result<Adventure, AppError> {
    let adventure = find_owned(conn, ctx, id)?;
    set_active(conn, adventure, false)
}

pub fn toggle_adventure_status(
    conn: &Connection,
    ctx: &AuthContext,
    id: i64,
) -> Result<Adventure, AppError> {
    require_admin(ctx)?;
    let adventure = find(conn, id)?;
    let next = !adventure.is_active;
    set_active(conn, adventure, next)
}

fn set_active(conn: &Connection, mut adventure: Adventure, active: bool) -> Result<Adventure, AppError> {
    let id = adventure.id;
    adventure.is_active = active;
    queries::update_adventure(conn, &adventure)?;
    tracing::info!(adventure_id = id, is_active = adventure.is_active, "adventure status set");
    find(conn, id)
}

pub fn list_all_adventures(
    conn: &Connection,
    ctx: &AuthContext,
    status: ListingStatus,
) -> Result<Vec<Adventure>, AppError> {
    require_admin(ctx)?;
    Ok(queries::list_adventures(conn, None, status.as_filter())?)
}

/// Seats left on the calendar date of `date`, counting confirmed bookings.
pub fn availability(conn: &Connection, adventure_id: i64, date: &str) -> Result<Availability, AppError> {
    let adventure = get_adventure(conn, None, adventure_id)?;
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .or_else(|_| {
            crate::services::booking::parse_adventure_date(date).map(|dt| dt.date())
        })
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{date}', expected YYYY-MM-DD")))?;
    let confirmed_people = queries::confirmed_people_on_date(conn, adventure_id, date)?;
    Ok(Availability {
        adventure_id,
        date,
        max_capacity: adventure.max_capacity,
        confirmed_people,
        available: (adventure.max_capacity - confirmed_people).max(0),
    })
}
