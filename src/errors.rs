use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde::Serialize;

/// Tagged error kind for the warming core.
///
/// The original system classified failures by matching on error message
/// strings; this crate instead carries a stable `code` per variant from day
/// one so callers (HTTP clients, the scheduler's log writer) never need to
/// parse prose. See `spec.md` §7 and the matching Design Notes redesign flag.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("name is required")]
    NameRequired,
    #[error("sender_instance_id is required")]
    SenderRequired,
    #[error("receiver_instance_id is required")]
    ReceiverRequired,
    #[error("script_id is required and must reference an existing script")]
    ScriptRequired,
    #[error("script not found")]
    ScriptNotFound,
    #[error("interval_min_seconds/interval_max_seconds are invalid: {0}")]
    IntervalInvalid(String),
    #[error("sender_instance_id and receiver_instance_id must differ")]
    SameInstance,
    #[error("actor_role must be ACTOR_A or ACTOR_B")]
    ActorRoleInvalid,
    #[error("message_content is required")]
    MessageContentRequired,
    #[error("sequence_order must be a positive integer")]
    SequenceOrderInvalid,
    #[error("template structure is invalid: {0}")]
    StructureInvalid(String),
    #[error("lineCount must be between 1 and 100")]
    InvalidLineCount,
    #[error("no template exists for category {0:?}")]
    InvalidCategory(String),
    #[error("instance {0:?} is not online")]
    InstanceNotOnline(String),
    #[error("whitelisted_number is required for HUMAN_VS_BOT rooms")]
    WhitelistedNumberRequired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("duplicate sequence_order within script")]
    DuplicateSequence,
    #[error("template already exists for this category and name")]
    DuplicateTemplate,
    #[error("room already in status {0}")]
    AlreadyInStatus(String),
    #[error("whitelisted_number {0:?} is already active on another room")]
    DuplicateWhitelistedNumber(String),
    #[error("invalid status transition {0} -> {1}")]
    InvalidTransition(String, String),

    #[error("missing authenticated user")]
    Unauthorized,
    #[error("not permitted to access this resource")]
    Forbidden,

    #[error("create failed: {0}")]
    CreateFailed(String),
    #[error("update failed: {0}")]
    UpdateFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("get failed: {0}")]
    GetFailed(String),
    #[error("restart failed: {0}")]
    RestartFailed(String),
    #[error("generate failed: {0}")]
    GenerateFailed(String),
    #[error("AI adapter unavailable: {0}")]
    AiUnavailable(String),
    #[error("unknown status {0:?}")]
    InvalidStatusValue(String),
}

impl ApiError {
    /// Stable machine-readable code, independent of the `Display` prose.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NameRequired => "NAME_REQUIRED",
            ApiError::SenderRequired => "SENDER_REQUIRED",
            ApiError::ReceiverRequired => "RECEIVER_REQUIRED",
            ApiError::ScriptRequired => "SCRIPT_REQUIRED",
            ApiError::ScriptNotFound => "SCRIPT_NOT_FOUND",
            ApiError::IntervalInvalid(_) => "INTERVAL_INVALID",
            ApiError::SameInstance => "SAME_INSTANCE",
            ApiError::ActorRoleInvalid => "ACTOR_ROLE_INVALID",
            ApiError::MessageContentRequired => "MESSAGE_CONTENT_REQUIRED",
            ApiError::SequenceOrderInvalid => "SEQUENCE_ORDER_INVALID",
            ApiError::StructureInvalid(_) => "STRUCTURE_INVALID",
            ApiError::InvalidLineCount => "INVALID_LINE_COUNT",
            ApiError::InvalidCategory(_) => "INVALID_CATEGORY",
            ApiError::InstanceNotOnline(_) => "INSTANCE_NOT_ONLINE",
            ApiError::WhitelistedNumberRequired => "WHITELISTED_NUMBER_REQUIRED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::DuplicateSequence => "DUPLICATE_SEQUENCE",
            ApiError::DuplicateTemplate => "DUPLICATE_TEMPLATE",
            ApiError::AlreadyInStatus(_) => "ALREADY_IN_STATUS",
            ApiError::DuplicateWhitelistedNumber(_) => "DUPLICATE_WHITELISTED_NUMBER",
            ApiError::InvalidTransition(_, _) => "INVALID_TRANSITION",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::CreateFailed(_) => "CREATE_FAILED",
            ApiError::UpdateFailed(_) => "UPDATE_FAILED",
            ApiError::DeleteFailed(_) => "DELETE_FAILED",
            ApiError::GetFailed(_) => "GET_FAILED",
            ApiError::RestartFailed(_) => "RESTART_FAILED",
            ApiError::GenerateFailed(_) => "GENERATE_FAILED",
            ApiError::AiUnavailable(_) => "AI_UNAVAILABLE",
            ApiError::InvalidStatusValue(_) => "INVALID_STATUS_VALUE",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::NameRequired
            | ApiError::SenderRequired
            | ApiError::ReceiverRequired
            | ApiError::ScriptRequired
            | ApiError::IntervalInvalid(_)
            | ApiError::SameInstance
            | ApiError::ActorRoleInvalid
            | ApiError::MessageContentRequired
            | ApiError::SequenceOrderInvalid
            | ApiError::StructureInvalid(_)
            | ApiError::InvalidLineCount
            | ApiError::InvalidCategory(_)
            | ApiError::InstanceNotOnline(_)
            | ApiError::WhitelistedNumberRequired
            | ApiError::InvalidStatusValue(_) => Status::BadRequest,

            ApiError::NotFound(_) | ApiError::ScriptNotFound => Status::NotFound,

            ApiError::DuplicateSequence
            | ApiError::DuplicateTemplate
            | ApiError::AlreadyInStatus(_)
            | ApiError::DuplicateWhitelistedNumber(_)
            | ApiError::InvalidTransition(_, _) => Status::Conflict,

            ApiError::Unauthorized => Status::Unauthorized,
            ApiError::Forbidden => Status::Forbidden,

            ApiError::CreateFailed(_)
            | ApiError::UpdateFailed(_)
            | ApiError::DeleteFailed(_)
            | ApiError::GetFailed(_)
            | ApiError::RestartFailed(_)
            | ApiError::GenerateFailed(_) => Status::InternalServerError,

            ApiError::AiUnavailable(_) => Status::BadGateway,
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::GetFailed(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        // `detail` is a non-authoritative field carrying the underlying cause;
        // it is never part of the stable contract (spec.md §7).
        let detail = match &self {
            ApiError::CreateFailed(d)
            | ApiError::UpdateFailed(d)
            | ApiError::DeleteFailed(d)
            | ApiError::GetFailed(d)
            | ApiError::RestartFailed(d)
            | ApiError::GenerateFailed(d) => Some(d.clone()),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            error: self.code().to_string(),
            detail,
        };
        Response::build_from(Json(body).respond_to(req)?)
            .status(status)
            .ok()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
