//! `fetchbot forget <url>` – drop cache entries so the next request downloads again.

use anyhow::Result;
use fetchbot_core::cache::FingerprintCache;
use fetchbot_core::request::RequestSpec;

use super::Runtime;

pub async fn run_forget(runtime: &Runtime, request: &RequestSpec, item: Option<u32>) -> Result<()> {
    let cache = FingerprintCache::new(runtime.store.clone());
    let removed = cache.invalidate(&request.fingerprint(), item).await?;
    if removed == 0 {
        println!("Nothing cached for {}.", request.normalized_url);
    } else {
        println!("Removed {} cache entr{}.", removed, if removed == 1 { "y" } else { "ies" });
    }
    Ok(())
}
