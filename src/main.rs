#[tokio::main]
async fn main() {
    callin_lib::logger::init();
    if let Err(e) = callin_lib::run().await {
        log::error!("callin stopped: {e:#}");
        eprintln!("callin: {e:#}");
        std::process::exit(1);
    }
}
