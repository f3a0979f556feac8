//! Periodic driver for an engine's scheduled work
//!
//! The engine never spawns anything itself; debounced history pushes and
//! saves run inside `CanvasEngine::tick`. The ticker calls it on a fixed
//! period and stops once the engine has been dropped. Engines configured
//! with `external_compaction` hand their compaction jobs to the ticker,
//! which compresses them on the blocking pool without holding the lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use canvas_engine::CanvasEngine;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Engine shared between the UI thread and background tasks
pub type SharedEngine = Arc<Mutex<CanvasEngine>>;

/// Spawn a task that ticks `engine` every `period`
pub fn spawn_ticker(engine: &SharedEngine, period: Duration) -> JoinHandle<()> {
    let engine: Weak<Mutex<CanvasEngine>> = Arc::downgrade(engine);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            let (outcome, job) = {
                let mut guard = engine.lock();
                let outcome = guard.tick();
                (outcome, guard.take_compaction_job())
            };
            if !outcome.is_idle() {
                log::trace!("Engine tick: {:?}", outcome);
            }
            if let Some(job) = job {
                let blobs = match tokio::task::spawn_blocking(move || job.compress()).await {
                    Ok(blobs) => blobs,
                    Err(e) => {
                        log::error!("History compaction task failed: {}", e);
                        Vec::new()
                    }
                };
                let compacted = engine.lock().finish_compaction(blobs);
                log::trace!("Compacted {} history entries", compacted);
            }
        }
        log::debug!("Engine dropped, ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_engine::{CanvasEngineBuilder, DataMap, EngineConfig, ManualClock, Position};

    #[tokio::test]
    async fn test_ticker_runs_due_work() {
        let clock = Arc::new(ManualClock::new());
        let engine = CanvasEngineBuilder::new("p")
            .clock(clock.clone())
            .build()
            .unwrap();
        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        let handle = spawn_ticker(&engine, Duration::from_millis(5));

        engine
            .lock()
            .add_node("text", Position::new(0.0, 0.0), DataMap::new());
        clock.advance(10_000);
        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let engine = engine.lock();
            assert_eq!(engine.save_status().saves, 1);
            assert_eq!(engine.history_len(), 2);
        }

        drop(engine);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_ticker_compacts_off_the_lock() {
        let clock = Arc::new(ManualClock::new());
        let config = EngineConfig {
            raw_keep: 2,
            external_compaction: true,
            ..EngineConfig::default()
        };
        let engine = CanvasEngineBuilder::new("p")
            .config(config)
            .clock(clock.clone())
            .build()
            .unwrap();
        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        {
            let mut engine = engine.lock();
            for i in 0..5 {
                engine.add_node("text", Position::new(i as f64 * 10.0, 0.0), DataMap::new());
                engine.flush_history();
            }
            assert_eq!(engine.history().raw_count(), 6);
        }

        let idle = engine.lock().config().compaction_idle_ms;
        clock.advance(idle);
        let handle = spawn_ticker(&engine, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(150)).await;

        {
            let engine = engine.lock();
            if engine.history().compaction_enabled() {
                assert_eq!(engine.history().raw_count(), 2);
                assert_eq!(engine.history().compressed_count(), 4);
            }
        }

        handle.abort();
    }
}
