//! Dispatch scheduler (spec.md §4.2): claims ready rooms without
//! double-dispatch, drives each script forward by exactly one line, and
//! maintains durable progress. Grounded on the teacher's
//! `retention::run_retention` / `retention::spawn_retention_task` split — a
//! pure, unit-testable sweep wrapped by a spawn helper that loops on a fixed
//! interval.

use crate::db::{Db, NewLog};
use crate::models::{ActorRole, LogStatus, RoomType, SenderType};
use crate::outbound::{OutboundAdapter, OutboundMessage};
use rand::Rng;
use std::sync::Arc;

/// Outcome of a single claimed room's dispatch attempt, for observability
/// and tests.
#[derive(Debug, Clone)]
pub enum RoomOutcome {
    Dispatched { line_id: i64, success: bool },
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub claimed: usize,
    pub outcomes: Vec<(String, RoomOutcome)>,
}

/// One claim-then-process pass over every due, non-`HUMAN_VS_BOT` room
/// (spec.md §4.2). `HUMAN_VS_BOT` rooms are excluded from polling — their
/// cadence is event-driven via the reply engine.
pub async fn run_dispatch_pass(
    db: &Db,
    outbound: &dyn OutboundAdapter,
    batch_size: i64,
) -> DispatchReport {
    let now = chrono::Utc::now();
    let claimed = match db.claim_due_rooms(&now.to_rfc3339(), batch_size) {
        Ok(rooms) => rooms,
        Err(e) => {
            eprintln!("⚠️ scheduler: failed to claim rooms: {e}");
            return DispatchReport::default();
        }
    };

    let mut report = DispatchReport {
        claimed: claimed.len(),
        outcomes: Vec::with_capacity(claimed.len()),
    };

    for room in claimed {
        debug_assert_ne!(room.room_type, RoomType::HumanVsBot);

        let next_line = match db.next_line_after(room.script_id, room.current_sequence) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("⚠️ scheduler: failed to read next line for room {}: {e}", room.id);
                continue;
            }
        };

        let Some(line) = next_line else {
            if let Err(e) = db.finish_room(&room.id) {
                eprintln!("⚠️ scheduler: failed to finish room {}: {e}", room.id);
            }
            report.outcomes.push((room.id.clone(), RoomOutcome::Finished));
            continue;
        };

        let (from, to) = match line.actor_role {
            ActorRole::ActorA => (room.sender_instance_id.as_str(), room.receiver_instance_id.as_str()),
            ActorRole::ActorB => (room.receiver_instance_id.as_str(), room.sender_instance_id.as_str()),
        };

        let send_result = if room.send_real_message {
            outbound
                .send(OutboundMessage {
                    from,
                    to,
                    content: &line.message_content,
                    typing_duration_sec: line.typing_duration_sec,
                })
                .await
        } else {
            Ok(())
        };

        let success = send_result.is_ok();
        let log = NewLog {
            room_id: &room.id,
            script_line_id: Some(line.id),
            sender_instance_id: from,
            receiver_instance_id: to,
            message_content: &line.message_content,
            status: if success { LogStatus::Success } else { LogStatus::Failed },
            error_message: send_result.as_ref().err().map(|s| s.as_str()),
            sender_type: SenderType::Bot,
        };
        if let Err(e) = db.insert_log(log) {
            eprintln!("⚠️ scheduler: failed to write log for room {}: {e}", room.id);
        }

        // Advance-on-failure (spec.md §4.2 step 5): the failed attempt is
        // durably logged but does not retry the same line.
        let jitter = jittered_delay_secs(room.interval_min_seconds, room.interval_max_seconds);
        let next_run_at = (chrono::Utc::now() + chrono::Duration::seconds(jitter)).to_rfc3339();
        let now_str = chrono::Utc::now().to_rfc3339();
        if let Err(e) = db.advance_room(&room.id, line.sequence_order, &next_run_at, &now_str) {
            eprintln!("⚠️ scheduler: failed to advance room {}: {e}", room.id);
        }

        report
            .outcomes
            .push((room.id.clone(), RoomOutcome::Dispatched { line_id: line.id, success }));
    }

    report
}

/// Independent uniform sample from `[min, max]` seconds (spec.md §4.2: "any
/// uniformly-distributed source is acceptable").
pub fn jittered_delay_secs(min: i64, max: i64) -> i64 {
    if max <= min {
        return min.max(0);
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Spawns the long-running scheduler loop. One poll pass every
/// `poll_interval_secs`, bounded per spec.md §4.2 ("e.g. 1 s").
pub fn spawn_scheduler(db: Arc<Db>, outbound: Arc<dyn OutboundAdapter>, poll_interval_secs: u64, batch_size: i64) {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        loop {
            let report = run_dispatch_pass(&db, outbound.as_ref(), batch_size).await;
            if report.claimed > 0 {
                println!("🔁 scheduler pass: claimed {} room(s)", report.claimed);
            }
            tokio::time::sleep(std::time::Duration::from_secs(poll_interval_secs)).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Db, RoomFields};
    use crate::models::RoomType;
    use crate::outbound::NoopOutbound;

    fn seed_two_line_script(db: &Db) -> i64 {
        let script = db.create_script("warmup", "smalltalk").unwrap();
        db.create_script_line(script.id, 1, ActorRole::ActorA, "hi", 3).unwrap();
        db.create_script_line(script.id, 2, ActorRole::ActorB, "hey", 3).unwrap();
        script.id
    }

    fn seed_active_room(db: &Db, script_id: i64) -> String {
        db.upsert_instance("alice", "alice", "online").unwrap();
        db.upsert_instance("bob", "bob", "online").unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let fields = RoomFields {
            sender_instance_id: Some("alice".to_string()),
            receiver_instance_id: Some("bob".to_string()),
            script_id: Some(script_id),
            interval_min_seconds: Some(5),
            interval_max_seconds: Some(5),
            send_real_message: Some(false),
            whitelisted_number: Some(None),
            reply_delay_min: Some(10),
            reply_delay_max: Some(60),
            ai_enabled: Some(false),
            fallback_to_script: Some(false),
            ..Default::default()
        };
        db.create_room(&id, "warm room", RoomType::BotVsBot, &fields, "tester")
            .unwrap();
        db.set_room_status(&id, crate::models::RoomStatus::Active, Some(&chrono::Utc::now().to_rfc3339()))
            .unwrap();
        id
    }

    #[tokio::test]
    async fn dispatch_pass_advances_then_finishes() {
        let db = Db::in_memory();
        let script_id = seed_two_line_script(&db);
        let room_id = seed_active_room(&db, script_id);
        let outbound = NoopOutbound;

        let report = run_dispatch_pass(&db, &outbound, 10).await;
        assert_eq!(report.claimed, 1);
        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.current_sequence, 1);
        assert!(room.next_run_at.is_some());

        // Force the second pass to see the line as due.
        db.advance_room(&room_id, 1, &chrono::Utc::now().to_rfc3339(), &chrono::Utc::now().to_rfc3339()).unwrap();
        let report2 = run_dispatch_pass(&db, &outbound, 10).await;
        assert_eq!(report2.claimed, 1);
        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.current_sequence, 2);

        db.advance_room(&room_id, 2, &chrono::Utc::now().to_rfc3339(), &chrono::Utc::now().to_rfc3339()).unwrap();
        let report3 = run_dispatch_pass(&db, &outbound, 10).await;
        assert_eq!(report3.claimed, 1);
        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.status, crate::models::RoomStatus::Finished);
        assert!(room.next_run_at.is_none());
    }

    #[tokio::test]
    async fn human_vs_bot_rooms_are_never_claimed() {
        let db = Db::in_memory();
        let script_id = seed_two_line_script(&db);
        db.upsert_instance("alice", "alice", "online").unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let fields = RoomFields {
            sender_instance_id: Some("alice".to_string()),
            receiver_instance_id: Some(String::new()),
            script_id: Some(script_id),
            interval_min_seconds: Some(5),
            interval_max_seconds: Some(5),
            send_real_message: Some(false),
            whitelisted_number: Some(Some("628111".to_string())),
            reply_delay_min: Some(10),
            reply_delay_max: Some(60),
            ..Default::default()
        };
        db.create_room(&id, "human room", RoomType::HumanVsBot, &fields, "tester")
            .unwrap();
        db.set_room_status(&id, crate::models::RoomStatus::Active, Some(&chrono::Utc::now().to_rfc3339()))
            .unwrap();

        let report = run_dispatch_pass(&db, &NoopOutbound, 10).await;
        assert_eq!(report.claimed, 0);
    }
}
