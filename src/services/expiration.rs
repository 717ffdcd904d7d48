// License expiration worker: periodically sweeps Active licenses past their
// expiry into Expired with one batched update. The transition is monotonic,
// so overlapping sweeps on multiple nodes are harmless.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::DieselPool;
use crate::models::license::License;

pub fn spawn_expiration_worker(db_pool: DieselPool, interval_seconds: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("License expiration worker started (every {}s)", interval_seconds);

        loop {
            interval.tick().await;

            let mut conn = match db_pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Expiration sweep skipped, no database connection: {}", e);
                    continue;
                },
            };

            match License::expire_due(&mut conn, Utc::now()).await {
                Ok(0) => {},
                Ok(expired) => info!(expired, "Expired licenses swept"),
                Err(e) => error!("Expiration sweep failed: {}", e),
            }
        }
    })
}
