use crate::errors::{ApiError, ApiResult};
use crate::models::{
    ActorRole, Instance, LogStatus, Room, RoomStatus, RoomType, Script, ScriptLine, SenderType,
    Template, WarmingLog,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::Mutex;

/// The Store: typed persistence of rooms, scripts, lines, templates, logs,
/// and the conflict predicate over whitelisted numbers. Every
/// ordering/locking contract described in spec.md §3/§5 is implemented here.
///
/// SQLite has no row-level `SELECT ... FOR UPDATE` (spec.md §4.2); the single
/// `Mutex<Connection>` already serialising every write stands in for it, so
/// claims and the auto-pause sweep are each a single held-lock operation
/// (see DESIGN.md for the recorded Open Question decision).
pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    pub fn in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory database");
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'online',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS warming_scripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS warming_script_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                script_id INTEGER NOT NULL REFERENCES warming_scripts(id) ON DELETE CASCADE,
                sequence_order INTEGER NOT NULL,
                actor_role TEXT NOT NULL,
                message_content TEXT NOT NULL,
                typing_duration_sec INTEGER NOT NULL DEFAULT 3,
                UNIQUE(script_id, sequence_order)
            );
            CREATE INDEX IF NOT EXISTS idx_script_lines_script ON warming_script_lines(script_id);

            CREATE TABLE IF NOT EXISTS warming_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                name TEXT NOT NULL,
                structure TEXT NOT NULL,
                created_by TEXT NOT NULL DEFAULT 'system',
                UNIQUE(category, name)
            );
            CREATE INDEX IF NOT EXISTS idx_templates_category ON warming_templates(category);

            CREATE TABLE IF NOT EXISTS warming_rooms (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                room_type TEXT NOT NULL,
                sender_instance_id TEXT NOT NULL,
                receiver_instance_id TEXT NOT NULL DEFAULT '',
                script_id INTEGER NOT NULL REFERENCES warming_scripts(id),
                current_sequence INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'STOPPED',
                interval_min_seconds INTEGER NOT NULL DEFAULT 5,
                interval_max_seconds INTEGER NOT NULL DEFAULT 15,
                send_real_message INTEGER NOT NULL DEFAULT 1,
                whitelisted_number TEXT,
                reply_delay_min INTEGER NOT NULL DEFAULT 10,
                reply_delay_max INTEGER NOT NULL DEFAULT 60,
                ai_enabled INTEGER NOT NULL DEFAULT 0,
                ai_provider TEXT,
                ai_model TEXT,
                ai_system_prompt TEXT,
                ai_temperature REAL,
                ai_max_tokens INTEGER,
                fallback_to_script INTEGER NOT NULL DEFAULT 0,
                next_run_at TEXT,
                last_run_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT NOT NULL DEFAULT 'system'
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_whitelisted_active
                ON warming_rooms(whitelisted_number)
                WHERE room_type = 'HUMAN_VS_BOT' AND status = 'ACTIVE';
            CREATE INDEX IF NOT EXISTS idx_rooms_next_run
                ON warming_rooms(next_run_at) WHERE status = 'ACTIVE';

            CREATE TABLE IF NOT EXISTS warming_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL REFERENCES warming_rooms(id) ON DELETE CASCADE,
                script_line_id INTEGER,
                sender_instance_id TEXT NOT NULL,
                receiver_instance_id TEXT NOT NULL,
                message_content TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                sender_type TEXT NOT NULL DEFAULT 'bot',
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_room ON warming_logs(room_id);
            CREATE INDEX IF NOT EXISTS idx_logs_status ON warming_logs(status);",
        )
        .expect("Failed to run migrations");
    }
}

// --- Row mapping -------------------------------------------------------------

fn row_to_room(row: &Row) -> rusqlite::Result<Room> {
    let room_type: String = row.get("room_type")?;
    let status: String = row.get("status")?;
    Ok(Room {
        id: row.get("id")?,
        name: row.get("name")?,
        room_type: RoomType::from_str(&room_type).unwrap_or(RoomType::BotVsBot),
        sender_instance_id: row.get("sender_instance_id")?,
        receiver_instance_id: row.get("receiver_instance_id")?,
        script_id: row.get("script_id")?,
        current_sequence: row.get("current_sequence")?,
        status: RoomStatus::from_str(&status).unwrap_or(RoomStatus::Stopped),
        interval_min_seconds: row.get("interval_min_seconds")?,
        interval_max_seconds: row.get("interval_max_seconds")?,
        send_real_message: row.get::<_, i64>("send_real_message")? != 0,
        whitelisted_number: row.get("whitelisted_number")?,
        reply_delay_min: row.get("reply_delay_min")?,
        reply_delay_max: row.get("reply_delay_max")?,
        ai_enabled: row.get::<_, i64>("ai_enabled")? != 0,
        ai_provider: row.get("ai_provider")?,
        ai_model: row.get("ai_model")?,
        ai_system_prompt: row.get("ai_system_prompt")?,
        ai_temperature: row.get("ai_temperature")?,
        ai_max_tokens: row.get("ai_max_tokens")?,
        fallback_to_script: row.get::<_, i64>("fallback_to_script")? != 0,
        next_run_at: row.get("next_run_at")?,
        last_run_at: row.get("last_run_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        created_by: row.get("created_by")?,
    })
}

fn row_to_script(row: &Row) -> rusqlite::Result<Script> {
    Ok(Script {
        id: row.get("id")?,
        title: row.get("title")?,
        category: row.get("category")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_script_line(row: &Row) -> rusqlite::Result<ScriptLine> {
    let actor_role: String = row.get("actor_role")?;
    Ok(ScriptLine {
        id: row.get("id")?,
        script_id: row.get("script_id")?,
        sequence_order: row.get("sequence_order")?,
        actor_role: ActorRole::from_str(&actor_role).unwrap_or(ActorRole::ActorA),
        message_content: row.get("message_content")?,
        typing_duration_sec: row.get("typing_duration_sec")?,
    })
}

fn row_to_template(row: &Row) -> rusqlite::Result<Template> {
    let structure: String = row.get("structure")?;
    Ok(Template {
        id: row.get("id")?,
        category: row.get("category")?,
        name: row.get("name")?,
        structure: serde_json::from_str(&structure).unwrap_or(serde_json::Value::Null),
        created_by: row.get("created_by")?,
    })
}

fn row_to_log(row: &Row) -> rusqlite::Result<WarmingLog> {
    let status: String = row.get("status")?;
    let sender_type: String = row.get("sender_type")?;
    Ok(WarmingLog {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        script_line_id: row.get("script_line_id")?,
        sender_instance_id: row.get("sender_instance_id")?,
        receiver_instance_id: row.get("receiver_instance_id")?,
        message_content: row.get("message_content")?,
        status: if status == "SUCCESS" {
            LogStatus::Success
        } else {
            LogStatus::Failed
        },
        error_message: row.get("error_message")?,
        sender_type: if sender_type == "human" {
            SenderType::Human
        } else {
            SenderType::Bot
        },
        executed_at: row.get("executed_at")?,
    })
}

fn row_to_instance(row: &Row) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: row.get("id")?,
        label: row.get("label")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}

/// Fields accepted on room create/update. `None` means "leave unchanged" on
/// update, and "use the validator's default" on create.
#[derive(Debug, Default, Clone)]
pub struct RoomFields {
    pub name: Option<String>,
    pub sender_instance_id: Option<String>,
    pub receiver_instance_id: Option<String>,
    pub script_id: Option<i64>,
    pub interval_min_seconds: Option<i64>,
    pub interval_max_seconds: Option<i64>,
    pub send_real_message: Option<bool>,
    pub whitelisted_number: Option<Option<String>>,
    pub reply_delay_min: Option<i64>,
    pub reply_delay_max: Option<i64>,
    pub ai_enabled: Option<bool>,
    pub ai_provider: Option<Option<String>>,
    pub ai_model: Option<Option<String>>,
    pub ai_system_prompt: Option<Option<String>>,
    pub ai_temperature: Option<Option<f64>>,
    pub ai_max_tokens: Option<Option<i64>>,
    pub fallback_to_script: Option<bool>,
}

// --- Instances ---------------------------------------------------------------

impl Db {
    pub fn upsert_instance(&self, id: &str, label: &str, status: &str) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO instances (id, label, status, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET label = excluded.label, status = excluded.status",
            params![id, label, status, now],
        )?;
        Ok(())
    }

    pub fn get_instance(&self, id: &str) -> ApiResult<Option<Instance>> {
        let conn = self.conn.lock().unwrap();
        let inst = conn
            .query_row(
                "SELECT * FROM instances WHERE id = ?1",
                params![id],
                row_to_instance,
            )
            .optional()?;
        Ok(inst)
    }

    pub fn instance_is_online(&self, id: &str) -> ApiResult<bool> {
        Ok(self
            .get_instance(id)?
            .map(|i| i.status == "online")
            .unwrap_or(false))
    }
}

// --- Scripts -------------------------------------------------------------

impl Db {
    pub fn create_script(&self, title: &str, category: &str) -> ApiResult<Script> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO warming_scripts (title, category, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![title, category, now, now],
        )?;
        let id = conn.last_insert_rowid();
        let script = conn.query_row(
            "SELECT * FROM warming_scripts WHERE id = ?1",
            params![id],
            row_to_script,
        )?;
        Ok(script)
    }

    pub fn get_script(&self, id: i64) -> ApiResult<Option<Script>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_scripts WHERE id = ?1",
                params![id],
                row_to_script,
            )
            .optional()?)
    }

    pub fn script_exists(&self, id: i64) -> ApiResult<bool> {
        Ok(self.get_script(id)?.is_some())
    }

    pub fn list_scripts(&self) -> ApiResult<Vec<Script>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM warming_scripts ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], row_to_script)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_script(
        &self,
        id: i64,
        title: Option<&str>,
        category: Option<&str>,
    ) -> ApiResult<Script> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT * FROM warming_scripts WHERE id = ?1",
                params![id],
                row_to_script,
            )
            .optional()?
            .ok_or(ApiError::ScriptNotFound)?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE warming_scripts SET title = ?1, category = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                title.unwrap_or(&existing.title),
                category.unwrap_or(&existing.category),
                now,
                id
            ],
        )?;
        Ok(conn.query_row(
            "SELECT * FROM warming_scripts WHERE id = ?1",
            params![id],
            row_to_script,
        )?)
    }

    pub fn delete_script(&self, id: i64) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM warming_scripts WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(ApiError::ScriptNotFound);
        }
        Ok(())
    }
}

// --- Script lines ------------------------------------------------------------

impl Db {
    pub fn create_script_line(
        &self,
        script_id: i64,
        sequence_order: i64,
        actor_role: ActorRole,
        message_content: &str,
        typing_duration_sec: i64,
    ) -> ApiResult<ScriptLine> {
        let conn = self.conn.lock().unwrap();
        let dup: i64 = conn.query_row(
            "SELECT COUNT(*) FROM warming_script_lines WHERE script_id = ?1 AND sequence_order = ?2",
            params![script_id, sequence_order],
            |r| r.get(0),
        )?;
        if dup > 0 {
            return Err(ApiError::DuplicateSequence);
        }
        conn.execute(
            "INSERT INTO warming_script_lines (script_id, sequence_order, actor_role, message_content, typing_duration_sec)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![script_id, sequence_order, actor_role.as_str(), message_content, typing_duration_sec],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT * FROM warming_script_lines WHERE id = ?1",
            params![id],
            row_to_script_line,
        )?)
    }

    pub fn get_script_line(&self, id: i64) -> ApiResult<Option<ScriptLine>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_script_lines WHERE id = ?1",
                params![id],
                row_to_script_line,
            )
            .optional()?)
    }

    pub fn list_script_lines(&self, script_id: i64) -> ApiResult<Vec<ScriptLine>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM warming_script_lines WHERE script_id = ?1 ORDER BY sequence_order ASC",
        )?;
        let rows = stmt
            .query_map(params![script_id], row_to_script_line)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn max_sequence_order(&self, script_id: i64) -> ApiResult<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(sequence_order) FROM warming_script_lines WHERE script_id = ?1",
            params![script_id],
            |r| r.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    pub fn update_script_line(
        &self,
        id: i64,
        sequence_order: Option<i64>,
        actor_role: Option<ActorRole>,
        message_content: Option<&str>,
        typing_duration_sec: Option<i64>,
    ) -> ApiResult<ScriptLine> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT * FROM warming_script_lines WHERE id = ?1",
                params![id],
                row_to_script_line,
            )
            .optional()?
            .ok_or(ApiError::NotFound("script line"))?;

        let new_seq = sequence_order.unwrap_or(existing.sequence_order);
        if new_seq != existing.sequence_order {
            let dup: i64 = conn.query_row(
                "SELECT COUNT(*) FROM warming_script_lines WHERE script_id = ?1 AND sequence_order = ?2 AND id != ?3",
                params![existing.script_id, new_seq, id],
                |r| r.get(0),
            )?;
            if dup > 0 {
                return Err(ApiError::DuplicateSequence);
            }
        }

        let new_actor = actor_role.unwrap_or(existing.actor_role);
        let new_content = message_content.unwrap_or(&existing.message_content);
        let new_typing = typing_duration_sec.unwrap_or(existing.typing_duration_sec);

        conn.execute(
            "UPDATE warming_script_lines SET sequence_order = ?1, actor_role = ?2, message_content = ?3, typing_duration_sec = ?4 WHERE id = ?5",
            params![new_seq, new_actor.as_str(), new_content, new_typing, id],
        )?;

        Ok(conn.query_row(
            "SELECT * FROM warming_script_lines WHERE id = ?1",
            params![id],
            row_to_script_line,
        )?)
    }

    pub fn delete_script_line(&self, id: i64) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM warming_script_lines WHERE id = ?1",
            params![id],
        )?;
        if n == 0 {
            return Err(ApiError::NotFound("script line"));
        }
        Ok(())
    }

    /// The smallest `sequence_order` strictly greater than `current_sequence`
    /// for the given script (spec.md §4.2 step 1).
    pub fn next_line_after(
        &self,
        script_id: i64,
        current_sequence: i64,
    ) -> ApiResult<Option<ScriptLine>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_script_lines
                 WHERE script_id = ?1 AND sequence_order > ?2
                 ORDER BY sequence_order ASC LIMIT 1",
                params![script_id, current_sequence],
                row_to_script_line,
            )
            .optional()?)
    }

    /// Two-phase reorder (spec.md §4.6): vacate the positive sequence space
    /// with temporary negative values before assigning the final sequences,
    /// so the `(script_id, sequence_order)` uniqueness constraint is never
    /// transiently violated.
    pub fn reorder_script_lines(&self, script_id: i64, order: &[(i64, i64)]) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        for (line_id, _) in order {
            let belongs: i64 = tx.query_row(
                "SELECT COUNT(*) FROM warming_script_lines WHERE id = ?1 AND script_id = ?2",
                params![line_id, script_id],
                |r| r.get(0),
            )?;
            if belongs == 0 {
                return Err(ApiError::NotFound("script line"));
            }
        }

        for (i, (line_id, _)) in order.iter().enumerate() {
            tx.execute(
                "UPDATE warming_script_lines SET sequence_order = ?1 WHERE id = ?2",
                params![-(i as i64) - 1, line_id],
            )?;
        }

        for (line_id, new_seq) in order {
            tx.execute(
                "UPDATE warming_script_lines SET sequence_order = ?1 WHERE id = ?2",
                params![new_seq, line_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

// --- Templates -----------------------------------------------------------

impl Db {
    pub fn create_template(
        &self,
        category: &str,
        name: &str,
        structure: &serde_json::Value,
        created_by: &str,
    ) -> ApiResult<Template> {
        let conn = self.conn.lock().unwrap();
        let dup: i64 = conn.query_row(
            "SELECT COUNT(*) FROM warming_templates WHERE category = ?1 AND name = ?2",
            params![category, name],
            |r| r.get(0),
        )?;
        if dup > 0 {
            return Err(ApiError::DuplicateTemplate);
        }
        let structure_text = serde_json::to_string(structure)
            .map_err(|e| ApiError::StructureInvalid(e.to_string()))?;
        conn.execute(
            "INSERT INTO warming_templates (category, name, structure, created_by) VALUES (?1, ?2, ?3, ?4)",
            params![category, name, structure_text, created_by],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT * FROM warming_templates WHERE id = ?1",
            params![id],
            row_to_template,
        )?)
    }

    pub fn get_template(&self, id: i64) -> ApiResult<Option<Template>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_templates WHERE id = ?1",
                params![id],
                row_to_template,
            )
            .optional()?)
    }

    pub fn list_templates(&self) -> ApiResult<Vec<Template>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM warming_templates ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], row_to_template)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_template(
        &self,
        id: i64,
        category: Option<&str>,
        name: Option<&str>,
        structure: Option<&serde_json::Value>,
    ) -> ApiResult<Template> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT * FROM warming_templates WHERE id = ?1",
                params![id],
                row_to_template,
            )
            .optional()?
            .ok_or(ApiError::NotFound("template"))?;

        let new_category = category.unwrap_or(&existing.category);
        let new_name = name.unwrap_or(&existing.name);
        if new_category != existing.category || new_name != existing.name {
            let dup: i64 = conn.query_row(
                "SELECT COUNT(*) FROM warming_templates WHERE category = ?1 AND name = ?2 AND id != ?3",
                params![new_category, new_name, id],
                |r| r.get(0),
            )?;
            if dup > 0 {
                return Err(ApiError::DuplicateTemplate);
            }
        }
        let new_structure_text = match structure {
            Some(s) => serde_json::to_string(s).map_err(|e| ApiError::StructureInvalid(e.to_string()))?,
            None => serde_json::to_string(&existing.structure).unwrap_or_default(),
        };

        conn.execute(
            "UPDATE warming_templates SET category = ?1, name = ?2, structure = ?3 WHERE id = ?4",
            params![new_category, new_name, new_structure_text, id],
        )?;
        Ok(conn.query_row(
            "SELECT * FROM warming_templates WHERE id = ?1",
            params![id],
            row_to_template,
        )?)
    }

    pub fn delete_template(&self, id: i64) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM warming_templates WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(ApiError::NotFound("template"));
        }
        Ok(())
    }

    /// One template row for `category`, picked uniformly at random via the
    /// store's random ordering (spec.md §4.5).
    pub fn random_template_for_category(&self, category: &str) -> ApiResult<Option<Template>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_templates WHERE category = ?1 ORDER BY RANDOM() LIMIT 1",
                params![category],
                row_to_template,
            )
            .optional()?)
    }
}

// --- Rooms -----------------------------------------------------------------

impl Db {
    pub fn create_room(
        &self,
        id: &str,
        name: &str,
        room_type: RoomType,
        f: &RoomFields,
        created_by: &str,
    ) -> ApiResult<Room> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO warming_rooms (
                id, name, room_type, sender_instance_id, receiver_instance_id, script_id,
                current_sequence, status, interval_min_seconds, interval_max_seconds,
                send_real_message, whitelisted_number, reply_delay_min, reply_delay_max,
                ai_enabled, ai_provider, ai_model, ai_system_prompt, ai_temperature, ai_max_tokens,
                fallback_to_script, next_run_at, last_run_at, created_at, updated_at, created_by
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, 0, 'STOPPED', ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, NULL, NULL, ?20, ?20, ?21
            )",
            params![
                id,
                name,
                room_type.as_str(),
                f.sender_instance_id.clone().unwrap_or_default(),
                f.receiver_instance_id.clone().unwrap_or_default(),
                f.script_id,
                f.interval_min_seconds,
                f.interval_max_seconds,
                f.send_real_message.unwrap_or(true) as i64,
                f.whitelisted_number.clone().flatten(),
                f.reply_delay_min,
                f.reply_delay_max,
                f.ai_enabled.unwrap_or(false) as i64,
                f.ai_provider.clone().flatten(),
                f.ai_model.clone().flatten(),
                f.ai_system_prompt.clone().flatten(),
                f.ai_temperature.flatten(),
                f.ai_max_tokens.flatten(),
                f.fallback_to_script.unwrap_or(false) as i64,
                now,
                created_by,
            ],
        )?;
        Ok(conn.query_row(
            "SELECT * FROM warming_rooms WHERE id = ?1",
            params![id],
            row_to_room,
        )?)
    }

    pub fn get_room(&self, id: &str) -> ApiResult<Option<Room>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_rooms WHERE id = ?1",
                params![id],
                row_to_room,
            )
            .optional()?)
    }

    pub fn list_rooms(
        &self,
        status: Option<RoomStatus>,
        owner: Option<&str>,
    ) -> ApiResult<Vec<Room>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = "SELECT * FROM warming_rooms WHERE 1=1".to_string();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            values.push(Box::new(s.as_str().to_string()));
        }
        if let Some(o) = owner {
            sql.push_str(" AND created_by = ?");
            values.push(Box::new(o.to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC");
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_room)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_room(&self, id: &str, f: &RoomFields) -> ApiResult<Room> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT * FROM warming_rooms WHERE id = ?1",
                params![id],
                row_to_room,
            )
            .optional()?
            .ok_or(ApiError::NotFound("room"))?;
        let now = chrono::Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE warming_rooms SET
                name = ?1, sender_instance_id = ?2, receiver_instance_id = ?3, script_id = ?4,
                interval_min_seconds = ?5, interval_max_seconds = ?6, send_real_message = ?7,
                whitelisted_number = ?8, reply_delay_min = ?9, reply_delay_max = ?10,
                ai_enabled = ?11, ai_provider = ?12, ai_model = ?13, ai_system_prompt = ?14,
                ai_temperature = ?15, ai_max_tokens = ?16, fallback_to_script = ?17, updated_at = ?18
             WHERE id = ?19",
            params![
                f.name.clone().unwrap_or(existing.name),
                f.sender_instance_id.clone().unwrap_or(existing.sender_instance_id),
                f.receiver_instance_id.clone().unwrap_or(existing.receiver_instance_id),
                f.script_id.unwrap_or(existing.script_id),
                f.interval_min_seconds.unwrap_or(existing.interval_min_seconds),
                f.interval_max_seconds.unwrap_or(existing.interval_max_seconds),
                f.send_real_message.unwrap_or(existing.send_real_message) as i64,
                f.whitelisted_number.clone().unwrap_or(existing.whitelisted_number),
                f.reply_delay_min.unwrap_or(existing.reply_delay_min),
                f.reply_delay_max.unwrap_or(existing.reply_delay_max),
                f.ai_enabled.unwrap_or(existing.ai_enabled) as i64,
                f.ai_provider.clone().unwrap_or(existing.ai_provider),
                f.ai_model.clone().unwrap_or(existing.ai_model),
                f.ai_system_prompt.clone().unwrap_or(existing.ai_system_prompt),
                f.ai_temperature.unwrap_or(existing.ai_temperature),
                f.ai_max_tokens.unwrap_or(existing.ai_max_tokens),
                f.fallback_to_script.unwrap_or(existing.fallback_to_script) as i64,
                now,
                id,
            ],
        )?;

        Ok(conn.query_row(
            "SELECT * FROM warming_rooms WHERE id = ?1",
            params![id],
            row_to_room,
        )?)
    }

    pub fn delete_room(&self, id: &str) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM warming_rooms WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(ApiError::NotFound("room"));
        }
        Ok(())
    }

    /// Administrative status transition. `next_run_at` is `Some(ts)` when
    /// transitioning to ACTIVE, `None` for every other target (spec.md §4.1).
    pub fn set_room_status(
        &self,
        id: &str,
        status: RoomStatus,
        next_run_at: Option<&str>,
    ) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE warming_rooms SET status = ?1, next_run_at = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), next_run_at, now, id],
        )?;
        if n == 0 {
            return Err(ApiError::NotFound("room"));
        }
        Ok(())
    }

    /// Restart semantics (spec.md §4.1): `current_sequence <- 0`,
    /// `status <- ACTIVE`, `next_run_at <- now`. `last_run_at` is untouched.
    pub fn restart_room(&self, id: &str, now_ts: &str) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE warming_rooms SET current_sequence = 0, status = 'ACTIVE', next_run_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now_ts, id],
        )?;
        if n == 0 {
            return Err(ApiError::NotFound("room"));
        }
        Ok(())
    }

    /// Every `ACTIVE` `HUMAN_VS_BOT` room sharing `number`, excluding
    /// `except_id` (invariant I1 check, spec.md §4.3 — scoped to `ACTIVE`
    /// only, see DESIGN.md: a `PAUSED` room is allowed to keep the number
    /// that an auto-pause sweep handed off to the room now `ACTIVE` on it).
    pub fn human_rooms_with_number(
        &self,
        number: &str,
        except_id: Option<&str>,
    ) -> ApiResult<Vec<Room>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM warming_rooms
             WHERE room_type = 'HUMAN_VS_BOT' AND status = 'ACTIVE'
               AND whitelisted_number = ?1 AND id != ?2",
        )?;
        let rows = stmt
            .query_map(params![number, except_id.unwrap_or("")], row_to_room)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pause every other `ACTIVE` `HUMAN_VS_BOT` room sharing `number`
    /// (the pre-activation auto-pause sweep, spec.md §4.3).
    pub fn pause_other_active_human_rooms(&self, number: &str, except_id: &str) -> ApiResult<usize> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE warming_rooms SET status = 'PAUSED', next_run_at = NULL, updated_at = ?1
             WHERE room_type = 'HUMAN_VS_BOT' AND status = 'ACTIVE'
               AND whitelisted_number = ?2 AND id != ?3",
            params![now, number, except_id],
        )?;
        Ok(n)
    }

    /// The single `ACTIVE HUMAN_VS_BOT` room for `number`, if any
    /// (spec.md §4.4 step 1).
    pub fn active_human_room_by_number(&self, number: &str) -> ApiResult<Option<Room>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_rooms
                 WHERE room_type = 'HUMAN_VS_BOT' AND status = 'ACTIVE' AND whitelisted_number = ?1
                 LIMIT 1",
                params![number],
                row_to_room,
            )
            .optional()?)
    }

    /// Claim a batch of due `BOT_VS_BOT`/non-human rooms for dispatch
    /// (spec.md §4.2 claim contract). Claimed rooms have `next_run_at` set
    /// to `NULL` immediately so a concurrent claim cannot also pick them up;
    /// the scheduler writes the real next value back via `advance_room` or
    /// `finish_room` once dispatch completes.
    pub fn claim_due_rooms(&self, now_ts: &str, limit: i64) -> ApiResult<Vec<Room>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM warming_rooms
             WHERE status = 'ACTIVE' AND room_type != 'HUMAN_VS_BOT'
               AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC LIMIT ?2",
        )?;
        let rooms = stmt
            .query_map(params![now_ts, limit], row_to_room)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        for room in &rooms {
            conn.execute(
                "UPDATE warming_rooms SET next_run_at = NULL WHERE id = ?1",
                params![room.id],
            )?;
        }
        Ok(rooms)
    }

    /// Record one successful/failed dispatch and advance the room
    /// (spec.md §4.2 steps 4-5). `next_run_at` is only (re)populated while
    /// the room is still `ACTIVE`, so a pause/stop racing with an in-flight
    /// dispatch cannot resurrect scheduling for a room that was just taken
    /// out of rotation (spec.md §5, "Cancellation & timeouts").
    pub fn advance_room(
        &self,
        id: &str,
        new_sequence: i64,
        next_run_at: &str,
        last_run_at: &str,
    ) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE warming_rooms SET
                current_sequence = ?1,
                last_run_at = ?2,
                next_run_at = CASE WHEN status = 'ACTIVE' THEN ?3 ELSE NULL END,
                updated_at = ?2
             WHERE id = ?4",
            params![new_sequence, last_run_at, next_run_at, id],
        )?;
        Ok(())
    }

    /// No line remains after `current_sequence`: finish the room
    /// (spec.md §4.2 step 1).
    pub fn finish_room(&self, id: &str) -> ApiResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE warming_rooms SET status = 'FINISHED', next_run_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }
}

// --- Logs ------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewLog<'a> {
    pub room_id: &'a str,
    pub script_line_id: Option<i64>,
    pub sender_instance_id: &'a str,
    pub receiver_instance_id: &'a str,
    pub message_content: &'a str,
    pub status: LogStatus,
    pub error_message: Option<&'a str>,
    pub sender_type: SenderType,
}

impl Db {
    pub fn insert_log(&self, log: NewLog<'_>) -> ApiResult<WarmingLog> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO warming_logs (
                room_id, script_line_id, sender_instance_id, receiver_instance_id,
                message_content, status, error_message, sender_type, executed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.room_id,
                log.script_line_id,
                log.sender_instance_id,
                log.receiver_instance_id,
                log.message_content,
                log.status.as_str(),
                log.error_message,
                log.sender_type.as_str(),
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT * FROM warming_logs WHERE id = ?1",
            params![id],
            row_to_log,
        )?)
    }

    pub fn get_log(&self, id: i64) -> ApiResult<Option<WarmingLog>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM warming_logs WHERE id = ?1",
                params![id],
                row_to_log,
            )
            .optional()?)
    }

    pub fn list_logs(
        &self,
        room_id: Option<&str>,
        status: Option<LogStatus>,
        limit: i64,
    ) -> ApiResult<Vec<WarmingLog>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = "SELECT * FROM warming_logs WHERE 1=1".to_string();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(r) = room_id {
            sql.push_str(" AND room_id = ?");
            values.push(Box::new(r.to_string()));
        }
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            values.push(Box::new(s.as_str().to_string()));
        }
        sql.push_str(" ORDER BY executed_at DESC LIMIT ?");
        values.push(Box::new(limit));
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Last `k` logs for a room in chronological order, for AI reply
    /// context (spec.md §4.4 step 3).
    pub fn recent_logs_for_room(&self, room_id: &str, k: i64) -> ApiResult<Vec<WarmingLog>> {
        let mut rows = self.list_logs(Some(room_id), None, k)?;
        rows.reverse();
        Ok(rows)
    }
}
