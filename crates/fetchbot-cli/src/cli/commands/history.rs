//! `fetchbot history <identity>` – recent deliveries.

use anyhow::Result;
use fetchbot_core::delivery::HistoryLog;
use fetchbot_core::request::Identity;

use super::Runtime;

pub async fn run_history(runtime: &Runtime, identity: &str, limit: usize) -> Result<()> {
    let records = HistoryLog::new(runtime.store.clone())
        .list(&Identity::from(identity), limit)
        .await?;
    if records.is_empty() {
        println!("No deliveries for {identity}.");
        return Ok(());
    }
    println!("{:<14} {:<6} {:<6} {:<6} {}", "WHEN", "ITEM", "PARTS", "CACHE", "TITLE");
    for r in records {
        println!(
            "{:<14} {:<6} {:<6} {:<6} {}",
            r.delivered_at,
            r.index,
            r.artifact.parts.len(),
            if r.from_cache { "yes" } else { "no" },
            r.title
        );
    }
    Ok(())
}
