//! `fetchbot lookup <url>` – show cached items for a request.

use anyhow::Result;
use fetchbot_core::cache::FingerprintCache;
use fetchbot_core::request::RequestSpec;

use super::Runtime;

pub async fn run_lookup(runtime: &Runtime, request: &RequestSpec) -> Result<()> {
    let fp = request.fingerprint();
    let cache = FingerprintCache::new(runtime.store.clone());
    let result = cache.lookup(&fp, &request.range).await;

    println!("{} ({})", request, fp.short());
    if result.hits.is_empty() {
        println!("Nothing cached.");
    } else {
        println!("{:<6} {:<6} {}", "ITEM", "PARTS", "TITLE");
        for (index, entry) in &result.hits {
            println!(
                "{:<6} {:<6} {}",
                index,
                entry.artifact.parts.len(),
                entry.meta.title.as_deref().unwrap_or("-")
            );
        }
    }
    if !result.misses.is_empty() && request.range.is_batch() {
        let misses: Vec<String> = result.misses.iter().map(|i| i.to_string()).collect();
        println!("Missing: {}", misses.join(", "));
    }
    Ok(())
}
