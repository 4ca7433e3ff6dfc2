//! Caches a slow lookup in a running `server-tcp`.
//!
//! Start the server first (`cargo run -p server-tcp`), then
//! `cargo run -p server-tcp --example read_through`.

use keeper::{BoxError, Cacher, Context, Keeper, StoreCacher};
use serde::{Deserialize, Serialize};
use server_tcp::TcpStore;
use shared::config::Config;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Report {
    region: String,
    orders: u64,
    revenue_cents: u64,
}

async fn slow_report(_ctx: Context) -> Result<(Report, Duration), BoxError> {
    // Stand-in for an expensive query
    tokio::time::sleep(Duration::from_millis(500)).await;
    let report = Report {
        region: "emea".to_string(),
        orders: 1_204,
        revenue_cents: 9_871_250,
    };
    Ok((report, Duration::from_secs(30)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env()?;

    let store = match TcpStore::connect(config.remote_addr.clone()).await {
        Ok(store) => store,
        Err(e) => {
            println!("{}", e);
            println!("Hint: start the server first with `cargo run -p server-tcp`");
            return Ok(());
        }
    };
    println!("Connected to server at {}", store.addr());

    let cacher = StoreCacher::from_config(Arc::new(store), &config)?;
    let keeper = Keeper::from_config(cacher, &config);
    let ctx = Context::from_config(&config);

    // Start clean so the first call is a miss
    keeper.cacher().remove(&ctx, "report:emea").await?;

    for attempt in 1..=3 {
        let started = Instant::now();
        let mut report = Report::default();
        let found = keeper
            .get(&ctx, "report:emea", slow_report, &mut report)
            .await?;

        println!(
            "attempt {}: found={} in {:?}: {:?}",
            attempt,
            found,
            started.elapsed(),
            report
        );
    }

    Ok(())
}
