//! HTTP surface (spec.md §6): one handler per `/warming/...` endpoint,
//! wired through the `Actor` auth guard and a uniform `Envelope<T>`
//! response, grounded on the teacher's `routes.rs` handler shape (state
//! extraction, `Json<T>` bodies, a guard type per request) generalised from
//! ad hoc `Json<serde_json::Value>` to the typed envelope.

use crate::auth::Actor;
use crate::db::Db;
use crate::errors::{ApiError, ApiResult};
use crate::models::*;
use crate::reply::ReplyEngine;
use crate::template_expander;
use crate::validation;
use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post, put};
use std::sync::Arc;

fn parse_room_status(s: &str) -> ApiResult<RoomStatus> {
    RoomStatus::from_str(s).ok_or_else(|| ApiError::InvalidStatusValue(s.to_string()))
}

fn parse_log_status(s: &str) -> Option<LogStatus> {
    match s {
        "SUCCESS" => Some(LogStatus::Success),
        "FAILED" => Some(LogStatus::Failed),
        _ => None,
    }
}

// --- Rooms -----------------------------------------------------------------

#[post("/warming/rooms", format = "json", data = "<body>")]
pub fn create_room(db: &State<Db>, actor: Actor, body: Json<CreateRoomRequest>) -> ApiResult<Json<Envelope<Room>>> {
    let room = validation::create(db, body.into_inner(), &actor.user_id)?;
    Ok(Json(Envelope::ok("room created", room)))
}

#[get("/warming/rooms?<status>")]
pub fn list_rooms(db: &State<Db>, actor: Actor, status: Option<&str>) -> ApiResult<Json<Envelope<Vec<Room>>>> {
    let status = status.map(parse_room_status).transpose()?;
    let owner = if actor.is_admin() { None } else { Some(actor.user_id.as_str()) };
    let rooms = db.list_rooms(status, owner)?;
    Ok(Json(Envelope::ok("rooms listed", rooms)))
}

#[get("/warming/rooms/<id>")]
pub fn get_room(db: &State<Db>, actor: Actor, id: &str) -> ApiResult<Json<Envelope<Room>>> {
    let room = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;
    if !actor.may_access(&room.created_by) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(Envelope::ok("room fetched", room)))
}

#[put("/warming/rooms/<id>", format = "json", data = "<body>")]
pub fn update_room(
    db: &State<Db>,
    actor: Actor,
    id: &str,
    body: Json<UpdateRoomRequest>,
) -> ApiResult<Json<Envelope<Room>>> {
    let existing = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;
    if !actor.may_access(&existing.created_by) {
        return Err(ApiError::Forbidden);
    }
    let room = validation::update(db, id, body.into_inner())?;
    Ok(Json(Envelope::ok("room updated", room)))
}

#[delete("/warming/rooms/<id>")]
pub fn delete_room(db: &State<Db>, actor: Actor, id: &str) -> ApiResult<Json<Envelope<()>>> {
    let existing = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;
    if !actor.may_access(&existing.created_by) {
        return Err(ApiError::Forbidden);
    }
    validation::delete(db, id)?;
    Ok(Json(Envelope::ok("room deleted", ())))
}

#[patch("/warming/rooms/<id>/status", format = "json", data = "<body>")]
pub fn change_room_status(
    db: &State<Db>,
    actor: Actor,
    id: &str,
    body: Json<ChangeStatusRequest>,
) -> ApiResult<Json<Envelope<Room>>> {
    let existing = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;
    if !actor.may_access(&existing.created_by) {
        return Err(ApiError::Forbidden);
    }
    let status = parse_room_status(&body.status)?;
    let room = validation::change_status(db, id, status)?;
    Ok(Json(Envelope::ok("room status changed", room)))
}

#[post("/warming/rooms/<id>/restart")]
pub fn restart_room(db: &State<Db>, actor: Actor, id: &str) -> ApiResult<Json<Envelope<Room>>> {
    let existing = db.get_room(id)?.ok_or(ApiError::NotFound("room"))?;
    if !actor.may_access(&existing.created_by) {
        return Err(ApiError::Forbidden);
    }
    let room = validation::restart(db, id)?;
    Ok(Json(Envelope::ok("room restarted", room)))
}

// --- Scripts -----------------------------------------------------------------

#[post("/warming/scripts", format = "json", data = "<body>")]
pub fn create_script(db: &State<Db>, _actor: Actor, body: Json<CreateScriptRequest>) -> ApiResult<Json<Envelope<Script>>> {
    let script = db.create_script(&body.title, &body.category)?;
    Ok(Json(Envelope::ok("script created", script)))
}

#[get("/warming/scripts")]
pub fn list_scripts(db: &State<Db>, _actor: Actor) -> ApiResult<Json<Envelope<Vec<Script>>>> {
    let scripts = db.list_scripts()?;
    Ok(Json(Envelope::ok("scripts listed", scripts)))
}

#[get("/warming/scripts/<id>")]
pub fn get_script(db: &State<Db>, _actor: Actor, id: i64) -> ApiResult<Json<Envelope<Script>>> {
    let script = db.get_script(id)?.ok_or(ApiError::ScriptNotFound)?;
    Ok(Json(Envelope::ok("script fetched", script)))
}

#[put("/warming/scripts/<id>", format = "json", data = "<body>")]
pub fn update_script(
    db: &State<Db>,
    _actor: Actor,
    id: i64,
    body: Json<UpdateScriptRequest>,
) -> ApiResult<Json<Envelope<Script>>> {
    let script = db.update_script(id, body.title.as_deref(), body.category.as_deref())?;
    Ok(Json(Envelope::ok("script updated", script)))
}

#[delete("/warming/scripts/<id>")]
pub fn delete_script(db: &State<Db>, _actor: Actor, id: i64) -> ApiResult<Json<Envelope<()>>> {
    db.delete_script(id)?;
    Ok(Json(Envelope::ok("script deleted", ())))
}

// --- Script lines ------------------------------------------------------------

#[post("/warming/scripts/<script_id>/lines", format = "json", data = "<body>")]
pub fn create_script_line(
    db: &State<Db>,
    _actor: Actor,
    script_id: i64,
    body: Json<CreateScriptLineRequest>,
) -> ApiResult<Json<Envelope<ScriptLine>>> {
    if !db.script_exists(script_id)? {
        return Err(ApiError::ScriptNotFound);
    }
    let actor_role = ActorRole::from_str(&body.actor_role).ok_or(ApiError::ActorRoleInvalid)?;
    if body.message_content.trim().is_empty() {
        return Err(ApiError::MessageContentRequired);
    }
    if body.sequence_order <= 0 {
        return Err(ApiError::SequenceOrderInvalid);
    }
    let line = db.create_script_line(
        script_id,
        body.sequence_order,
        actor_role,
        &body.message_content,
        body.typing_duration_sec.unwrap_or(3),
    )?;
    Ok(Json(Envelope::ok("line created", line)))
}

#[post("/warming/scripts/<script_id>/lines/generate", format = "json", data = "<body>")]
pub fn generate_script_lines(
    db: &State<Db>,
    _actor: Actor,
    script_id: i64,
    body: Json<GenerateLinesRequest>,
) -> ApiResult<Json<Envelope<Vec<ScriptLine>>>> {
    if !db.script_exists(script_id)? {
        return Err(ApiError::ScriptNotFound);
    }
    let drafts = template_expander::expand(db, &body.category, body.line_count)?;
    let mut next_seq = db.max_sequence_order(script_id)? + 1;
    let mut created = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let line = db.create_script_line(
            script_id,
            next_seq,
            draft.actor_role,
            &draft.message_content,
            draft.typing_duration_sec,
        )?;
        next_seq += 1;
        created.push(line);
    }
    Ok(Json(Envelope::ok("lines generated", created)))
}

#[get("/warming/scripts/<script_id>/lines")]
pub fn list_script_lines(db: &State<Db>, _actor: Actor, script_id: i64) -> ApiResult<Json<Envelope<Vec<ScriptLine>>>> {
    if !db.script_exists(script_id)? {
        return Err(ApiError::ScriptNotFound);
    }
    let lines = db.list_script_lines(script_id)?;
    Ok(Json(Envelope::ok("lines listed", lines)))
}

#[put("/warming/scripts/<script_id>/lines/<id>", format = "json", data = "<body>")]
pub fn update_script_line(
    db: &State<Db>,
    _actor: Actor,
    script_id: i64,
    id: i64,
    body: Json<UpdateScriptLineRequest>,
) -> ApiResult<Json<Envelope<ScriptLine>>> {
    let _ = script_id;
    let actor_role = body
        .actor_role
        .as_deref()
        .map(|s| ActorRole::from_str(s).ok_or(ApiError::ActorRoleInvalid))
        .transpose()?;
    let line = db.update_script_line(
        id,
        body.sequence_order,
        actor_role,
        body.message_content.as_deref(),
        body.typing_duration_sec,
    )?;
    Ok(Json(Envelope::ok("line updated", line)))
}

#[delete("/warming/scripts/<script_id>/lines/<id>")]
pub fn delete_script_line(db: &State<Db>, _actor: Actor, script_id: i64, id: i64) -> ApiResult<Json<Envelope<()>>> {
    let _ = script_id;
    db.delete_script_line(id)?;
    Ok(Json(Envelope::ok("line deleted", ())))
}

#[post("/warming/scripts/<script_id>/lines/reorder", format = "json", data = "<body>")]
pub fn reorder_script_lines(
    db: &State<Db>,
    _actor: Actor,
    script_id: i64,
    body: Json<ReorderRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    db.reorder_script_lines(script_id, &body.order)?;
    Ok(Json(Envelope::ok("lines reordered", ())))
}

// --- Templates ---------------------------------------------------------------

#[post("/warming/templates", format = "json", data = "<body>")]
pub fn create_template(
    db: &State<Db>,
    actor: Actor,
    body: Json<CreateTemplateRequest>,
) -> ApiResult<Json<Envelope<Template>>> {
    let template = db.create_template(&body.category, &body.name, &body.structure, &actor.user_id)?;
    Ok(Json(Envelope::ok("template created", template)))
}

#[get("/warming/templates")]
pub fn list_templates(db: &State<Db>, actor: Actor) -> ApiResult<Json<Envelope<Vec<Template>>>> {
    let templates = db.list_templates()?;
    let visible = if actor.is_admin() {
        templates
    } else {
        templates.into_iter().filter(|t| t.created_by == actor.user_id).collect()
    };
    Ok(Json(Envelope::ok("templates listed", visible)))
}

#[get("/warming/templates/<id>")]
pub fn get_template(db: &State<Db>, actor: Actor, id: i64) -> ApiResult<Json<Envelope<Template>>> {
    let template = db.get_template(id)?.ok_or(ApiError::NotFound("template"))?;
    if !actor.may_access(&template.created_by) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(Envelope::ok("template fetched", template)))
}

#[put("/warming/templates/<id>", format = "json", data = "<body>")]
pub fn update_template(
    db: &State<Db>,
    actor: Actor,
    id: i64,
    body: Json<UpdateTemplateRequest>,
) -> ApiResult<Json<Envelope<Template>>> {
    let existing = db.get_template(id)?.ok_or(ApiError::NotFound("template"))?;
    if !actor.may_access(&existing.created_by) {
        return Err(ApiError::Forbidden);
    }
    let template = db.update_template(id, body.category.as_deref(), body.name.as_deref(), body.structure.as_ref())?;
    Ok(Json(Envelope::ok("template updated", template)))
}

#[delete("/warming/templates/<id>")]
pub fn delete_template(db: &State<Db>, actor: Actor, id: i64) -> ApiResult<Json<Envelope<()>>> {
    let existing = db.get_template(id)?.ok_or(ApiError::NotFound("template"))?;
    if !actor.may_access(&existing.created_by) {
        return Err(ApiError::Forbidden);
    }
    db.delete_template(id)?;
    Ok(Json(Envelope::ok("template deleted", ())))
}

// --- Logs ----------------------------------------------------------------

#[get("/warming/logs?<room_id>&<status>&<limit>")]
pub fn list_logs(
    db: &State<Db>,
    actor: Actor,
    room_id: Option<&str>,
    status: Option<&str>,
    limit: Option<i64>,
) -> ApiResult<Json<Envelope<Vec<WarmingLog>>>> {
    if let Some(rid) = room_id
        && let Some(room) = db.get_room(rid)?
        && !actor.may_access(&room.created_by)
    {
        return Err(ApiError::Forbidden);
    }
    let status = status.and_then(parse_log_status);
    let limit = limit.unwrap_or(100).clamp(1, 1000);
    let mut logs = db.list_logs(room_id, status, limit)?;
    if !actor.is_admin() && room_id.is_none() {
        // Without a room filter, drop logs belonging to rooms this actor
        // does not own (spec.md §6, "role=admin bypasses ownership checks").
        logs.retain(|l| {
            db.get_room(&l.room_id)
                .ok()
                .flatten()
                .map(|r| actor.may_access(&r.created_by))
                .unwrap_or(false)
        });
    }
    Ok(Json(Envelope::ok("logs listed", logs)))
}

#[get("/warming/logs/<id>")]
pub fn get_log(db: &State<Db>, actor: Actor, id: i64) -> ApiResult<Json<Envelope<WarmingLog>>> {
    let log = db.get_log(id)?.ok_or(ApiError::NotFound("log"))?;
    if let Some(room) = db.get_room(&log.room_id)?
        && !actor.may_access(&room.created_by)
    {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(Envelope::ok("log fetched", log)))
}

// --- Inbound webhook -----------------------------------------------------

/// Entry point for the messaging gateway's inbound-message webhook (spec.md
/// §4.4). Unauthenticated by design: the gateway, not an end user, calls
/// this, mirroring how the teacher's own webhook dispatcher is a one-way
/// push with no caller-side auth requirement.
#[post("/warming/inbound", format = "json", data = "<body>")]
pub async fn inbound_message(
    reply_engine: &State<Arc<ReplyEngine>>,
    body: Json<InboundMessageRequest>,
) -> Json<Envelope<serde_json::Value>> {
    let body = body.into_inner();
    match reply_engine
        .handle_inbound(&body.sender_whitelisted_number, &body.message)
        .await
    {
        Ok(crate::reply::ReplyOutcome::Replied(log)) => Json(Envelope::ok(
            "reply dispatched",
            serde_json::json!({"status": "replied", "log_id": log.id}),
        )),
        Ok(crate::reply::ReplyOutcome::NoMatchingRoom) => Json(Envelope::ok(
            "no matching active room",
            serde_json::json!({"status": "no_match"}),
        )),
        Ok(crate::reply::ReplyOutcome::ScriptExhausted) => Json(Envelope::ok(
            "room script exhausted, no reply sent",
            serde_json::json!({"status": "exhausted"}),
        )),
        Err(e) => {
            eprintln!("⚠️ inbound: reply engine failed: {e}");
            Json(Envelope::ok(
                "reply engine failed",
                serde_json::json!({"status": "error", "error": e.code()}),
            ))
        }
    }
}
