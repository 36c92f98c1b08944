//! Script-line generator (spec.md §4.5): expands a category's template into
//! concrete sequenced script-line drafts. Pure function of
//! (template JSON, count, RNG) once the template row has been picked.

use crate::db::Db;
use crate::errors::{ApiError, ApiResult};
use crate::models::{ActorRole, MessageType, ScriptLineDraft, TemplateTurn};
use rand::Rng;
use rand::seq::SliceRandom;

const MIN_LINE_COUNT: i64 = 1;
const MAX_LINE_COUNT: i64 = 100;
const MIN_TYPING_SEC: i64 = 3;
const MAX_TYPING_SEC: i64 = 7;

/// Expand `category`'s template into `count` drafts, cycling through the
/// template's turns and wrapping modulo its length.
pub fn expand(db: &Db, category: &str, count: i64) -> ApiResult<Vec<ScriptLineDraft>> {
    if !(MIN_LINE_COUNT..=MAX_LINE_COUNT).contains(&count) {
        return Err(ApiError::InvalidLineCount);
    }

    let template = db
        .random_template_for_category(category)?
        .ok_or_else(|| ApiError::InvalidCategory(category.to_string()))?;

    let turns: Vec<TemplateTurn> = serde_json::from_value(template.structure.clone())
        .map_err(|e| ApiError::StructureInvalid(e.to_string()))?;
    if turns.is_empty() {
        return Err(ApiError::StructureInvalid(
            "template structure must contain at least one turn".to_string(),
        ));
    }
    for turn in &turns {
        if turn.message_options.is_empty() {
            return Err(ApiError::StructureInvalid(
                "messageOptions must be non-empty".to_string(),
            ));
        }
        if ActorRole::from_str(&turn.actor_role).is_none() {
            return Err(ApiError::ActorRoleInvalid);
        }
        if MessageType::from_str(&turn.message_type).is_none() {
            return Err(ApiError::StructureInvalid(format!(
                "unknown messageType {:?}",
                turn.message_type
            )));
        }
    }

    let mut rng = rand::thread_rng();
    let mut drafts = Vec::with_capacity(count as usize);
    for i in 0..count {
        let turn = &turns[(i as usize) % turns.len()];
        let message = turn
            .message_options
            .choose(&mut rng)
            .expect("non-empty messageOptions checked above")
            .clone();
        let actor_role = ActorRole::from_str(&turn.actor_role)
            .expect("actor_role validity checked above");
        let typing_duration_sec = rng.gen_range(MIN_TYPING_SEC..=MAX_TYPING_SEC);
        drafts.push(ScriptLineDraft {
            actor_role,
            message_content: message,
            typing_duration_sec,
        });
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn seed_template(db: &Db, category: &str) {
        let structure = serde_json::json!([
            {"actorRole": "ACTOR_A", "messageType": "GREETING", "messageOptions": ["hi", "hello"]},
            {"actorRole": "ACTOR_B", "messageType": "ANSWER", "messageOptions": ["hey there"]},
        ]);
        db.create_template(category, "default", &structure, "system")
            .unwrap();
    }

    #[test]
    fn expands_and_wraps_modulo_structure_length() {
        let db = Db::in_memory();
        seed_template(&db, "smalltalk");
        let drafts = expand(&db, "smalltalk", 5).unwrap();
        assert_eq!(drafts.len(), 5);
        assert_eq!(drafts[0].actor_role, ActorRole::ActorA);
        assert_eq!(drafts[1].actor_role, ActorRole::ActorB);
        assert_eq!(drafts[2].actor_role, ActorRole::ActorA);
        for d in &drafts {
            assert!(d.typing_duration_sec >= 3 && d.typing_duration_sec <= 7);
        }
    }

    #[test]
    fn rejects_out_of_range_count() {
        let db = Db::in_memory();
        seed_template(&db, "smalltalk");
        assert!(expand(&db, "smalltalk", 0).is_err());
        assert!(expand(&db, "smalltalk", 101).is_err());
    }

    #[test]
    fn rejects_missing_category() {
        let db = Db::in_memory();
        assert!(expand(&db, "nonexistent", 3).is_err());
    }
}
