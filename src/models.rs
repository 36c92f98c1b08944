use serde::{Deserialize, Serialize};

// --- Envelope -----------------------------------------------------------

/// Uniform response envelope for every route handler (spec.md §6).
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Envelope {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

// --- Enums ---------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    BotVsBot,
    HumanVsBot,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Stopped,
    Active,
    Paused,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Stopped => "STOPPED",
            RoomStatus::Active => "ACTIVE",
            RoomStatus::Paused => "PAUSED",
            RoomStatus::Finished => "FINISHED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STOPPED" => Some(RoomStatus::Stopped),
            "ACTIVE" => Some(RoomStatus::Active),
            "PAUSED" => Some(RoomStatus::Paused),
            "FINISHED" => Some(RoomStatus::Finished),
            _ => None,
        }
    }
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::BotVsBot => "BOT_VS_BOT",
            RoomType::HumanVsBot => "HUMAN_VS_BOT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "BOT_VS_BOT" => Some(RoomType::BotVsBot),
            "HUMAN_VS_BOT" => Some(RoomType::HumanVsBot),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    ActorA,
    ActorB,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::ActorA => "ACTOR_A",
            ActorRole::ActorB => "ACTOR_B",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTOR_A" => Some(ActorRole::ActorA),
            "ACTOR_B" => Some(ActorRole::ActorB),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "SUCCESS",
            LogStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Bot,
    Human,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Bot => "bot",
            SenderType::Human => "human",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Question,
    Answer,
    AnswerAndQuestion,
    Statement,
    Greeting,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Question => "QUESTION",
            MessageType::Answer => "ANSWER",
            MessageType::AnswerAndQuestion => "ANSWER_AND_QUESTION",
            MessageType::Statement => "STATEMENT",
            MessageType::Greeting => "GREETING",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUESTION" => Some(MessageType::Question),
            "ANSWER" => Some(MessageType::Answer),
            "ANSWER_AND_QUESTION" => Some(MessageType::AnswerAndQuestion),
            "STATEMENT" => Some(MessageType::Statement),
            "GREETING" => Some(MessageType::Greeting),
            _ => None,
        }
    }
}

// --- Entities --------------------------------------------------------------

#[derive(Debug, Serialize, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub room_type: RoomType,
    pub sender_instance_id: String,
    pub receiver_instance_id: String,
    pub script_id: i64,
    pub current_sequence: i64,
    pub status: RoomStatus,
    pub interval_min_seconds: i64,
    pub interval_max_seconds: i64,
    pub send_real_message: bool,
    pub whitelisted_number: Option<String>,
    pub reply_delay_min: i64,
    pub reply_delay_max: i64,
    pub ai_enabled: bool,
    pub ai_provider: Option<String>,
    pub ai_model: Option<String>,
    pub ai_system_prompt: Option<String>,
    pub ai_temperature: Option<f64>,
    pub ai_max_tokens: Option<i64>,
    pub fallback_to_script: bool,
    pub next_run_at: Option<String>,
    pub last_run_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub created_by: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct Script {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ScriptLine {
    pub id: i64,
    pub script_id: i64,
    pub sequence_order: i64,
    pub actor_role: ActorRole,
    pub message_content: String,
    pub typing_duration_sec: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct Template {
    pub id: i64,
    pub category: String,
    pub name: String,
    pub structure: serde_json::Value,
    pub created_by: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct WarmingLog {
    pub id: i64,
    pub room_id: String,
    pub script_line_id: Option<i64>,
    pub sender_instance_id: String,
    pub receiver_instance_id: String,
    pub message_content: String,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub sender_type: SenderType,
    pub executed_at: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct Instance {
    pub id: String,
    pub label: String,
    pub status: String,
    pub created_at: String,
}

// --- Request DTOs ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub room_type: RoomType,
    pub sender_instance_id: String,
    #[serde(default)]
    pub receiver_instance_id: Option<String>,
    pub script_id: i64,
    #[serde(default)]
    pub interval_min_seconds: Option<i64>,
    #[serde(default)]
    pub interval_max_seconds: Option<i64>,
    #[serde(default)]
    pub send_real_message: Option<bool>,
    #[serde(default)]
    pub whitelisted_number: Option<String>,
    #[serde(default)]
    pub reply_delay_min: Option<i64>,
    #[serde(default)]
    pub reply_delay_max: Option<i64>,
    #[serde(default)]
    pub ai_enabled: Option<bool>,
    #[serde(default)]
    pub ai_provider: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub ai_system_prompt: Option<String>,
    #[serde(default)]
    pub ai_temperature: Option<f64>,
    #[serde(default)]
    pub ai_max_tokens: Option<i64>,
    #[serde(default)]
    pub fallback_to_script: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoomRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sender_instance_id: Option<String>,
    #[serde(default)]
    pub receiver_instance_id: Option<String>,
    #[serde(default)]
    pub script_id: Option<i64>,
    #[serde(default)]
    pub interval_min_seconds: Option<i64>,
    #[serde(default)]
    pub interval_max_seconds: Option<i64>,
    #[serde(default)]
    pub send_real_message: Option<bool>,
    #[serde(default)]
    pub whitelisted_number: Option<String>,
    #[serde(default)]
    pub reply_delay_min: Option<i64>,
    #[serde(default)]
    pub reply_delay_max: Option<i64>,
    #[serde(default)]
    pub ai_enabled: Option<bool>,
    #[serde(default)]
    pub ai_provider: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub ai_system_prompt: Option<String>,
    #[serde(default)]
    pub ai_temperature: Option<f64>,
    #[serde(default)]
    pub ai_max_tokens: Option<i64>,
    #[serde(default)]
    pub fallback_to_script: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateScriptRequest {
    pub title: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScriptRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateScriptLineRequest {
    pub sequence_order: i64,
    pub actor_role: String,
    pub message_content: String,
    #[serde(default)]
    pub typing_duration_sec: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScriptLineRequest {
    #[serde(default)]
    pub sequence_order: Option<i64>,
    #[serde(default)]
    pub actor_role: Option<String>,
    #[serde(default)]
    pub message_content: Option<String>,
    #[serde(default)]
    pub typing_duration_sec: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateLinesRequest {
    pub line_count: i64,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    /// (line_id, new_sequence_order) pairs.
    pub order: Vec<(i64, i64)>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub category: String,
    pub name: String,
    pub structure: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub structure: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessageRequest {
    pub sender_whitelisted_number: String,
    pub message: String,
}

// --- Template structure -----------------------------------------------------

/// One entry of a `Template.structure` JSON array.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TemplateTurn {
    #[serde(rename = "actorRole")]
    pub actor_role: String,
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(rename = "messageOptions")]
    pub message_options: Vec<String>,
}

/// One synthesised draft produced by the template expander, not yet persisted.
#[derive(Debug, Clone)]
pub struct ScriptLineDraft {
    pub actor_role: ActorRole,
    pub message_content: String,
    pub typing_duration_sec: i64,
}
