//! Room validator (spec.md §4.1): create/update/changeStatus/restart/delete,
//! plus the status-transition table and the defaulting rules every operation
//! relies on.

use crate::conflict;
use crate::db::{Db, RoomFields};
use crate::errors::{ApiError, ApiResult};
use crate::models::{CreateRoomRequest, Room, RoomStatus, RoomType, UpdateRoomRequest};
use crate::phone;

const DEFAULT_INTERVAL_MIN: i64 = 5;
const DEFAULT_INTERVAL_MAX: i64 = 15;
const DEFAULT_REPLY_DELAY_MIN: i64 = 10;
const DEFAULT_REPLY_DELAY_MAX: i64 = 60;

fn default_interval(min: Option<i64>, max: Option<i64>) -> ApiResult<(i64, i64)> {
    let min = min.filter(|v| *v > 0).unwrap_or(DEFAULT_INTERVAL_MIN);
    let max = max.filter(|v| *v > 0).unwrap_or(DEFAULT_INTERVAL_MAX);
    if max < min {
        return Err(ApiError::IntervalInvalid(format!(
            "interval_max_seconds ({max}) must be >= interval_min_seconds ({min})"
        )));
    }
    Ok((min, max))
}

fn default_reply_delay(min: Option<i64>, max: Option<i64>) -> ApiResult<(i64, i64)> {
    let min = min.filter(|v| *v > 0).unwrap_or(DEFAULT_REPLY_DELAY_MIN);
    let max = max.filter(|v| *v > 0).unwrap_or(DEFAULT_REPLY_DELAY_MAX);
    if max < min {
        return Err(ApiError::IntervalInvalid(format!(
            "reply_delay_max ({max}) must be >= reply_delay_min ({min})"
        )));
    }
    Ok((min, max))
}

fn check_instances_online(
    db: &Db,
    sender: &str,
    receiver: Option<&str>,
) -> ApiResult<()> {
    if !db.instance_is_online(sender)? {
        return Err(ApiError::InstanceNotOnline(sender.to_string()));
    }
    if let Some(r) = receiver
        && !r.is_empty()
        && !db.instance_is_online(r)?
    {
        return Err(ApiError::InstanceNotOnline(r.to_string()));
    }
    Ok(())
}

/// Create a room, applying every rule in spec.md §4.1.
pub fn create(db: &Db, req: CreateRoomRequest, created_by: &str) -> ApiResult<Room> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::NameRequired);
    }

    let sender = req.sender_instance_id.trim().to_string();
    if sender.is_empty() {
        return Err(ApiError::SenderRequired);
    }

    if req.script_id <= 0 {
        return Err(ApiError::ScriptRequired);
    }
    if !db.script_exists(req.script_id)? {
        return Err(ApiError::ScriptNotFound);
    }

    let (interval_min, interval_max) =
        default_interval(req.interval_min_seconds, req.interval_max_seconds)?;

    let receiver = match req.room_type {
        RoomType::BotVsBot => {
            let r = req
                .receiver_instance_id
                .clone()
                .unwrap_or_default()
                .trim()
                .to_string();
            if r.is_empty() {
                return Err(ApiError::ReceiverRequired);
            }
            if r == sender {
                return Err(ApiError::SameInstance);
            }
            r
        }
        RoomType::HumanVsBot => String::new(),
    };

    check_instances_online(db, &sender, Some(receiver.as_str()))?;

    let mut fields = RoomFields {
        sender_instance_id: Some(sender),
        receiver_instance_id: Some(receiver),
        script_id: Some(req.script_id),
        interval_min_seconds: Some(interval_min),
        interval_max_seconds: Some(interval_max),
        send_real_message: Some(req.send_real_message.unwrap_or(true)),
        whitelisted_number: Some(None),
        reply_delay_min: Some(DEFAULT_REPLY_DELAY_MIN),
        reply_delay_max: Some(DEFAULT_REPLY_DELAY_MAX),
        ai_enabled: Some(req.ai_enabled.unwrap_or(false)),
        ai_provider: Some(req.ai_provider.clone()),
        ai_model: Some(req.ai_model.clone()),
        ai_system_prompt: Some(req.ai_system_prompt.clone()),
        ai_temperature: Some(req.ai_temperature),
        ai_max_tokens: Some(req.ai_max_tokens),
        fallback_to_script: Some(req.fallback_to_script.unwrap_or(false)),
        ..Default::default()
    };

    if req.room_type == RoomType::HumanVsBot {
        let raw = req
            .whitelisted_number
            .as_deref()
            .ok_or(ApiError::WhitelistedNumberRequired)?;
        let normalised = phone::normalize(raw);
        if normalised.is_empty() {
            return Err(ApiError::WhitelistedNumberRequired);
        }
        // A freshly created room always starts `STOPPED`, outside invariant
        // I1's `ACTIVE`-only uniqueness set, so creation never collides by
        // itself (spec.md §4.3; see DESIGN.md). The guard instead runs in
        // `update` (changing the number on a room that may already be
        // live) and in `change_status`'s auto-pause sweep (activation).

        let (delay_min, delay_max) =
            default_reply_delay(req.reply_delay_min, req.reply_delay_max)?;
        fields.whitelisted_number = Some(Some(normalised));
        fields.reply_delay_min = Some(delay_min);
        fields.reply_delay_max = Some(delay_max);
    }

    let id = uuid::Uuid::new_v4().to_string();
    db.create_room(&id, &name, req.room_type, &fields, created_by)
}

/// Update a room. Room type is immutable after creation (spec.md §4.1).
pub fn update(db: &Db, id: &str, req: UpdateRoomRequest) -> ApiResult<Room> {
    let existing = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;

    if let Some(ref name) = req.name
        && name.trim().is_empty()
    {
        return Err(ApiError::NameRequired);
    }

    let sender = req
        .sender_instance_id
        .clone()
        .unwrap_or(existing.sender_instance_id.clone());
    let receiver = req
        .receiver_instance_id
        .clone()
        .unwrap_or(existing.receiver_instance_id.clone());

    if existing.room_type == RoomType::BotVsBot {
        if sender.is_empty() {
            return Err(ApiError::SenderRequired);
        }
        if receiver.is_empty() {
            return Err(ApiError::ReceiverRequired);
        }
        if sender == receiver {
            return Err(ApiError::SameInstance);
        }
    }

    if let Some(script_id) = req.script_id {
        if script_id <= 0 {
            return Err(ApiError::ScriptRequired);
        }
        if !db.script_exists(script_id)? {
            return Err(ApiError::ScriptNotFound);
        }
    }

    let (interval_min, interval_max) = default_interval(
        Some(req.interval_min_seconds.unwrap_or(existing.interval_min_seconds)),
        Some(req.interval_max_seconds.unwrap_or(existing.interval_max_seconds)),
    )?;

    let mut fields = RoomFields {
        name: req.name.map(|n| n.trim().to_string()),
        sender_instance_id: req.sender_instance_id,
        receiver_instance_id: if existing.room_type == RoomType::HumanVsBot {
            Some(String::new())
        } else {
            req.receiver_instance_id
        },
        script_id: req.script_id,
        interval_min_seconds: Some(interval_min),
        interval_max_seconds: Some(interval_max),
        send_real_message: req.send_real_message,
        ai_enabled: req.ai_enabled,
        ai_provider: req.ai_provider.map(Some),
        ai_model: req.ai_model.map(Some),
        ai_system_prompt: req.ai_system_prompt.map(Some),
        ai_temperature: req.ai_temperature.map(Some),
        ai_max_tokens: req.ai_max_tokens.map(Some),
        fallback_to_script: req.fallback_to_script,
        ..Default::default()
    };

    if existing.room_type == RoomType::HumanVsBot {
        if let Some(raw) = req.whitelisted_number.as_deref() {
            let normalised = phone::normalize(raw);
            if normalised.is_empty() {
                return Err(ApiError::WhitelistedNumberRequired);
            }
            if Some(&normalised) != existing.whitelisted_number.as_ref() {
                conflict::guard_duplicate(db, &normalised, Some(id))?;
            }
            fields.whitelisted_number = Some(Some(normalised));
        }
        let (delay_min, delay_max) = default_reply_delay(
            Some(req.reply_delay_min.unwrap_or(existing.reply_delay_min)),
            Some(req.reply_delay_max.unwrap_or(existing.reply_delay_max)),
        )?;
        fields.reply_delay_min = Some(delay_min);
        fields.reply_delay_max = Some(delay_max);
    }

    db.update_room(id, &fields)
}

/// Explicit, administrative transitions (spec.md §4.1):
/// `STOPPED -> ACTIVE|PAUSED`, `ACTIVE -> PAUSED|STOPPED|FINISHED`,
/// `PAUSED -> ACTIVE|STOPPED`, `FINISHED -> ACTIVE` (via Restart only).
fn allowed_transition(from: RoomStatus, to: RoomStatus) -> bool {
    use RoomStatus::*;
    matches!(
        (from, to),
        (Stopped, Active)
            | (Stopped, Paused)
            | (Active, Paused)
            | (Active, Stopped)
            | (Active, Finished)
            | (Paused, Active)
            | (Paused, Stopped)
    )
}

/// `changeStatus`: applies the transition table, the `next_run_at` rule, and
/// (on activation of a `HUMAN_VS_BOT` room) the conflict resolver's
/// auto-pause sweep (spec.md §4.1, §4.3).
pub fn change_status(db: &Db, id: &str, new_status: RoomStatus) -> ApiResult<Room> {
    let room = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;

    if room.status == new_status {
        return Err(ApiError::AlreadyInStatus(new_status.as_str().to_string()));
    }
    if !allowed_transition(room.status, new_status) {
        return Err(ApiError::InvalidTransition(
            room.status.as_str().to_string(),
            new_status.as_str().to_string(),
        ));
    }

    if new_status == RoomStatus::Active && room.room_type == RoomType::HumanVsBot {
        if let Some(number) = &room.whitelisted_number {
            conflict::auto_pause_sweep(db, number, id)?;
        } else {
            return Err(ApiError::WhitelistedNumberRequired);
        }
    }

    let next_run_at = if new_status == RoomStatus::Active {
        let ts = chrono::Utc::now() + chrono::Duration::seconds(room.interval_min_seconds);
        Some(ts.to_rfc3339())
    } else {
        None
    };

    db.set_room_status(id, new_status, next_run_at.as_deref())?;
    db.get_room(id)?.ok_or(ApiError::NotFound("room"))
}

/// Restart: `current_sequence <- 0`, `status <- ACTIVE`,
/// `next_run_at <- now` (spec.md §4.1).
pub fn restart(db: &Db, id: &str) -> ApiResult<Room> {
    let room = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;
    if room.room_type == RoomType::HumanVsBot
        && let Some(number) = &room.whitelisted_number
    {
        conflict::auto_pause_sweep(db, number, id)?;
    }
    let now = chrono::Utc::now().to_rfc3339();
    db.restart_room(id, &now)?;
    db.get_room(id)?.ok_or(ApiError::NotFound("room"))
}

pub fn delete(db: &Db, id: &str) -> ApiResult<()> {
    db.delete_room(id)
}
