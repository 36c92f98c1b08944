pub mod ai;
pub mod auth;
pub mod conflict;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod outbound;
pub mod phone;
pub mod reply;
pub mod routes;
pub mod scheduler;
pub mod template_expander;
pub mod validation;

use ai::{AiAdapter, HttpAiAdapter, UnavailableAi};
use config::Config;
use db::Db;
use outbound::{GatewayOutbound, NoopOutbound, OutboundAdapter};
use reply::ReplyEngine;
use rocket_cors::CorsOptions;
use std::sync::Arc;

/// Build the Rocket instance from `Config::from_env()`, matching the
/// teacher's `pub fn rocket()` entry point.
pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    rocket_with_config(config)
}

/// Build against an explicit database path, keeping every other setting at
/// its default — the shape integration tests use to get an isolated
/// per-test SQLite file (teacher's `rocket_with_db` pattern).
pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let mut config = Config::from_env();
    config.database_path = db_path.to_string();
    rocket_with_config(config)
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(&config.database_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).ok();
    }

    // The managed state backs every HTTP handler via `&State<Db>`. The
    // scheduler and reply engine each open their own connection to the same
    // file, mirroring the teacher's webhook dispatcher opening a second
    // `Connection` to `db_path` rather than sharing the managed one across
    // an async boundary (spec.md §5: SQLite has no row-level locking, so
    // every writer serialises through its own `Mutex<Connection>` and WAL
    // reconciles the file).
    let db = Db::new(&config.database_path);
    let scheduler_db = Arc::new(Db::new(&config.database_path));
    let reply_db = Arc::new(Db::new(&config.database_path));

    let outbound: Arc<dyn OutboundAdapter> = if config.outbound_gateway_base_url.is_empty() {
        Arc::new(NoopOutbound)
    } else {
        Arc::new(GatewayOutbound::new(&config))
    };

    let ai: Arc<dyn AiAdapter> = if config.ai_endpoint.is_empty() {
        Arc::new(UnavailableAi)
    } else {
        Arc::new(HttpAiAdapter::new(&config, config.ai_endpoint.clone()))
    };

    let reply_engine = Arc::new(ReplyEngine::new(reply_db, outbound.clone(), ai));

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let poll_interval = config.scheduler_poll_interval_secs;
    let batch_size = config.scheduler_batch_size;

    rocket::build()
        .manage(db)
        .manage(reply_engine)
        .attach(cors)
        .mount(
            "/",
            rocket::routes![
                routes::create_room,
                routes::list_rooms,
                routes::get_room,
                routes::update_room,
                routes::delete_room,
                routes::change_room_status,
                routes::restart_room,
                routes::create_script,
                routes::list_scripts,
                routes::get_script,
                routes::update_script,
                routes::delete_script,
                routes::create_script_line,
                routes::generate_script_lines,
                routes::list_script_lines,
                routes::update_script_line,
                routes::delete_script_line,
                routes::reorder_script_lines,
                routes::create_template,
                routes::list_templates,
                routes::get_template,
                routes::update_template,
                routes::delete_template,
                routes::list_logs,
                routes::get_log,
                routes::inbound_message,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Dispatch Scheduler",
            move |_rocket| {
                Box::pin(async move {
                    scheduler::spawn_scheduler(scheduler_db, outbound, poll_interval, batch_size);
                    println!(
                        "🔁 dispatch scheduler started (poll={poll_interval}s, batch={batch_size})"
                    );
                })
            },
        ))
}
