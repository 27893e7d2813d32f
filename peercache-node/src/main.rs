use std::collections::HashMap;
use std::sync::Arc;

use peercache::api::ApiHandler;
use peercache::builder::Builder;
use peercache::group::GetterFunc;
use peercache::pool::HttpPool;
use peercache::registry::GroupRegistry;
use peercache::server::HttpServer;

/// Contains the "slow database" which is fronted by the scores group.
fn scores_db() -> HashMap<&'static str, &'static str> {
    [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
        .into_iter()
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Setup the scores group, which is backed by our "slow database"...
    let db = scores_db();
    let scores = platform.require::<GroupRegistry>().new_group(
        "scores",
        2 << 10,
        GetterFunc(move |key: &str| {
            log::info!("[SlowDB] search key {}", key);
            db.get(key)
                .map(|score| score.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
        }),
    )?;

    // Let the peers (as configured in peers.nodes) share the keys of the group...
    let pool = platform.require::<HttpPool>();
    scores.register_peers(pool.clone());

    // Serve external callers on api.port...
    let api = HttpServer::new(
        &platform,
        "api",
        peercache::api::DEFAULT_PORT,
        Arc::new(ApiHandler::new(platform.require::<GroupRegistry>())),
    );
    HttpServer::fork(&api);

    // ...and the peer protocol on server.port until the platform is terminated.
    HttpServer::new(&platform, "server", peercache::pool::DEFAULT_PORT, pool)
        .event_loop()
        .await;

    Ok(())
}
