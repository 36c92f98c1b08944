#[rocket::main]
async fn main() {
    if let Err(e) = warming_scheduler::rocket().launch().await {
        eprintln!("🔥 server failed to launch: {e}");
        std::process::exit(1);
    }
}
