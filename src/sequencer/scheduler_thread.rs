// Scheduler thread - Timer that drives Engine::tick
// The engine lock is held for one tick at a time, so UI calls interleave between ticks

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::engine::Engine;

pub struct SchedulerThread {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerThread {
    /// Start ticking `engine` every `period`
    pub fn spawn(engine: Arc<Mutex<Engine>>, period: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));

        let handle = {
            let running = Arc::clone(&running);
            let ticks = Arc::clone(&ticks);
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::sleep(period);

                    let mut engine = match engine.lock() {
                        Ok(engine) => engine,
                        Err(_) => {
                            tracing::error!("engine lock poisoned, scheduler thread exiting");
                            break;
                        }
                    };
                    if let Err(error) = engine.tick() {
                        tracing::error!(%error, "scheduling tick failed");
                    }
                    drop(engine);

                    ticks.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!("scheduler thread stopped");
            })
        };

        Self {
            running,
            ticks,
            handle: Some(handle),
        }
    }

    /// Ticks completed so far
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask the thread to finish and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::OfflineBackend;
    use crate::config::EngineConfig;
    use crate::sequencer::tempo_map::LocationToTime;

    #[test]
    fn test_thread_ticks_engine_until_stopped() {
        let backend = OfflineBackend::new();
        let engine = Engine::new(EngineConfig::default(), backend.clone(), LocationToTime::default())
            .unwrap();
        let engine = Arc::new(Mutex::new(engine));
        engine.lock().unwrap().start().unwrap();

        let mut scheduler = SchedulerThread::spawn(Arc::clone(&engine), Duration::from_millis(1));
        while scheduler.tick_count() < 3 {
            backend.advance(0.025);
            thread::sleep(Duration::from_millis(2));
        }
        scheduler.stop();
        assert!(!scheduler.is_running());

        let count = scheduler.tick_count();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(scheduler.tick_count(), count);
        assert!(engine.lock().unwrap().state().is_playing());
    }
}
