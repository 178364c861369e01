//! APS Broker CLI
//!
//! Run with: cargo run --bin aps-broker -- serve
//! Or after build: ./target/release/aps-broker app-token

#[tokio::main]
async fn main() {
    // Client credentials usually live in .env
    let _ = dotenvy::dotenv();

    if let Err(e) = aps_broker::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
