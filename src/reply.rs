//! Reply engine (spec.md §4.4): answers an inbound whitelisted human
//! message with either an AI completion or the next scripted line, after a
//! jittered delay. Per-room replies are serialised through a per-room
//! `tokio::sync::Mutex` (spec.md §5, "Reply engine serialises replies using
//! a per-room logical queue").

use crate::ai::{AiAdapter, AiRequest, HistoryTurn};
use crate::db::{Db, NewLog};
use crate::errors::ApiResult;
use crate::models::{LogStatus, Room, RoomStatus, SenderType, WarmingLog};
use crate::outbound::{OutboundAdapter, OutboundMessage};
use crate::phone;
use crate::scheduler::jittered_delay_secs;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;

const AI_HISTORY_TURNS: i64 = 20;

#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    /// A reply was composed and handed to the Outbound adapter.
    Replied(WarmingLog),
    /// No `ACTIVE HUMAN_VS_BOT` room is whitelisted for this number.
    NoMatchingRoom,
    /// The room's script has no remaining line; the room was finished and
    /// no reply was sent.
    ScriptExhausted,
}

/// Holds one lock per room so inbound messages for the same room are
/// handled strictly in arrival order, while different rooms proceed
/// concurrently.
pub struct ReplyEngine {
    db: Arc<Db>,
    outbound: Arc<dyn OutboundAdapter>,
    ai: Arc<dyn AiAdapter>,
    room_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ReplyEngine {
    pub fn new(db: Arc<Db>, outbound: Arc<dyn OutboundAdapter>, ai: Arc<dyn AiAdapter>) -> Self {
        ReplyEngine {
            db,
            outbound,
            ai,
            room_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, room_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.room_locks.lock().unwrap();
        locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `(senderWhitelistedNumber, rawMessage)` from the inbound webhook
    /// (spec.md §4.4). Normalises the number, so callers may pass any raw
    /// Indonesian-style representation.
    pub async fn handle_inbound(&self, sender_number: &str, raw_message: &str) -> ApiResult<ReplyOutcome> {
        let number = phone::normalize(sender_number);
        let Some(room) = self.db.active_human_room_by_number(&number)? else {
            return Ok(ReplyOutcome::NoMatchingRoom);
        };

        let lock = self.lock_for(&room.id);
        let _guard = lock.lock().await;

        // Re-read under the per-room lock: a concurrent admin action may
        // have paused/stopped the room between the lookup above and here.
        let Some(room) = self.db.get_room(&room.id)? else {
            return Ok(ReplyOutcome::NoMatchingRoom);
        };
        if room.status != RoomStatus::Active {
            return Ok(ReplyOutcome::NoMatchingRoom);
        }

        self.db.insert_log(NewLog {
            room_id: &room.id,
            script_line_id: None,
            sender_instance_id: &number,
            receiver_instance_id: &room.sender_instance_id,
            message_content: raw_message,
            status: LogStatus::Success,
            error_message: None,
            sender_type: SenderType::Human,
        })?;

        let reply_text = self.compose_reply(&room, raw_message).await?;
        let Some(reply_text) = reply_text else {
            return Ok(ReplyOutcome::ScriptExhausted);
        };

        let delay = jittered_delay_secs(room.reply_delay_min, room.reply_delay_max);
        tokio::time::sleep(std::time::Duration::from_secs(delay.max(0) as u64)).await;

        let send_result = self
            .outbound
            .send(OutboundMessage {
                from: &room.sender_instance_id,
                to: &number,
                content: &reply_text,
                typing_duration_sec: 3,
            })
            .await;

        let log = self.db.insert_log(NewLog {
            room_id: &room.id,
            script_line_id: None,
            sender_instance_id: &room.sender_instance_id,
            receiver_instance_id: &number,
            message_content: &reply_text,
            status: if send_result.is_ok() { LogStatus::Success } else { LogStatus::Failed },
            error_message: send_result.as_ref().err().map(|s| s.as_str()),
            sender_type: SenderType::Bot,
        })?;

        Ok(ReplyOutcome::Replied(log))
    }

    /// Step 3 of spec.md §4.4: AI (with fallback) or scripted advance.
    async fn compose_reply(&self, room: &Room, raw_message: &str) -> ApiResult<Option<String>> {
        if room.ai_enabled {
            match self.try_ai(room, raw_message).await {
                Ok(text) => return Ok(Some(text)),
                Err(e) if room.fallback_to_script => {
                    eprintln!("⚠️ reply: AI adapter failed for room {}, falling back to script: {e}", room.id);
                }
                Err(e) => return Err(crate::errors::ApiError::AiUnavailable(e)),
            }
        }
        self.advance_script(room)
    }

    async fn try_ai(&self, room: &Room, raw_message: &str) -> Result<String, String> {
        let history_logs = self
            .db
            .recent_logs_for_room(&room.id, AI_HISTORY_TURNS)
            .map_err(|e| e.to_string())?;
        let history: Vec<HistoryTurn> = history_logs
            .into_iter()
            .map(|l| HistoryTurn {
                role: match l.sender_type {
                    SenderType::Human => "user".to_string(),
                    SenderType::Bot => "assistant".to_string(),
                },
                content: l.message_content,
            })
            .collect();

        self.ai
            .complete(AiRequest {
                provider: room.ai_provider.as_deref().unwrap_or(""),
                model: room.ai_model.as_deref().unwrap_or(""),
                system_prompt: room.ai_system_prompt.as_deref().unwrap_or(""),
                temperature: room.ai_temperature.unwrap_or(0.7),
                max_tokens: room.ai_max_tokens.unwrap_or(512),
                history: &history,
                message: raw_message,
            })
            .await
    }

    /// Same line-selection algorithm as the dispatch scheduler (spec.md
    /// §4.2), reused here per §4.4 step 3's "same algorithm" instruction.
    fn advance_script(&self, room: &Room) -> ApiResult<Option<String>> {
        let Some(line) = self.db.next_line_after(room.script_id, room.current_sequence)? else {
            self.db.finish_room(&room.id)?;
            return Ok(None);
        };
        let now = chrono::Utc::now().to_rfc3339();
        self.db.advance_room(&room.id, line.sequence_order, &now, &now)?;
        Ok(Some(line.message_content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::UnavailableAi;
    use crate::db::RoomFields;
    use crate::models::RoomType;
    use crate::outbound::NoopOutbound;

    fn seed_human_room(db: &Db, ai_enabled: bool, fallback: bool) -> String {
        let script = db.create_script("reply", "smalltalk").unwrap();
        db.create_script_line(script.id, 1, crate::models::ActorRole::ActorA, "how are you?", 3)
            .unwrap();
        db.upsert_instance("bot1", "bot1", "online").unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let fields = RoomFields {
            sender_instance_id: Some("bot1".to_string()),
            receiver_instance_id: Some(String::new()),
            script_id: Some(script.id),
            interval_min_seconds: Some(5),
            interval_max_seconds: Some(5),
            send_real_message: Some(false),
            whitelisted_number: Some(Some("628111".to_string())),
            reply_delay_min: Some(0),
            reply_delay_max: Some(0),
            ai_enabled: Some(ai_enabled),
            fallback_to_script: Some(fallback),
            ..Default::default()
        };
        db.create_room(&id, "human room", RoomType::HumanVsBot, &fields, "tester")
            .unwrap();
        db.set_room_status(&id, RoomStatus::Active, Some(&chrono::Utc::now().to_rfc3339()))
            .unwrap();
        id
    }

    #[tokio::test]
    async fn scripted_reply_advances_and_logs_both_sides() {
        let db = Arc::new(Db::in_memory());
        let room_id = seed_human_room(&db, false, false);
        let engine = ReplyEngine::new(db.clone(), Arc::new(NoopOutbound), Arc::new(UnavailableAi));

        let outcome = engine.handle_inbound("08111", "hai").await.unwrap();
        match outcome {
            ReplyOutcome::Replied(log) => {
                assert_eq!(log.message_content, "how are you?");
                assert_eq!(log.sender_type, SenderType::Bot);
            }
            other => panic!("expected Replied, got {other:?}"),
        }
        let logs = db.list_logs(Some(&room_id), None, 10).unwrap();
        assert_eq!(logs.len(), 2);
        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.current_sequence, 1);
    }

    #[tokio::test]
    async fn ai_failure_without_fallback_errors() {
        let db = Arc::new(Db::in_memory());
        seed_human_room(&db, true, false);
        let engine = ReplyEngine::new(db.clone(), Arc::new(NoopOutbound), Arc::new(UnavailableAi));
        let result = engine.handle_inbound("08111", "hai").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ai_failure_with_fallback_uses_script() {
        let db = Arc::new(Db::in_memory());
        let room_id = seed_human_room(&db, true, true);
        let engine = ReplyEngine::new(db.clone(), Arc::new(NoopOutbound), Arc::new(UnavailableAi));
        let outcome = engine.handle_inbound("08111", "hai").await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::Replied(_)));
        let room = db.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.current_sequence, 1);
    }

    #[tokio::test]
    async fn unmatched_number_is_a_noop() {
        let db = Arc::new(Db::in_memory());
        seed_human_room(&db, false, false);
        let engine = ReplyEngine::new(db.clone(), Arc::new(NoopOutbound), Arc::new(UnavailableAi));
        let outcome = engine.handle_inbound("08999", "hai").await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::NoMatchingRoom));
    }
}
