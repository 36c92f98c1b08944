//! Conflict resolver (spec.md §4.3): preserves invariant I1 — at most one
//! `ACTIVE` `HUMAN_VS_BOT` room per whitelisted number — under both the
//! guarded update path and administrative activation. A `STOPPED` or
//! `PAUSED` room may freely share a number with the currently `ACTIVE` one
//! on it (see DESIGN.md Open Question decisions); only a second `ACTIVE`
//! room on the same number is ever a real conflict.

use crate::db::Db;
use crate::errors::{ApiError, ApiResult};

/// Refuse the operation if `number` already appears on another `ACTIVE`
/// `HUMAN_VS_BOT` room. Used by `update` when `whitelisted_number` changes;
/// creation never calls this because a new room always starts `STOPPED`,
/// outside the uniqueness set.
pub fn guard_duplicate(db: &Db, number: &str, except_id: Option<&str>) -> ApiResult<()> {
    let clashing = db.human_rooms_with_number(number, except_id)?;
    if clashing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::DuplicateWhitelistedNumber(number.to_string()))
    }
}

/// Auto-pause: just before a room sharing `number` is activated, pause every
/// other `ACTIVE` `HUMAN_VS_BOT` room with that number (spec.md §4.3,
/// "taking precedence for the status-change endpoint"). Concurrent
/// activation attempts are serialised by the Store's single write lock, so
/// the sweep and the subsequent activation together preserve I1.
pub fn auto_pause_sweep(db: &Db, number: &str, activating_room_id: &str) -> ApiResult<()> {
    let paused = db.pause_other_active_human_rooms(number, activating_room_id)?;
    if paused > 0 {
        println!(
            "⏸ auto-paused {paused} other HUMAN_VS_BOT room(s) sharing whitelisted number"
        );
    }
    Ok(())
}
