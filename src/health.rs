//! Liveness pings to the health registry.
//!
//! The reporter runs on its own thread and pings on a fixed interval regardless of
//! event activity. Failures are logged and otherwise ignored.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub trait HealthPing: Send {
    fn ping(&mut self, module: &str) -> Result<()>;
}

/// `POST <base_url>/health/ping/<module>` with an empty body.
pub struct HttpHealthPing {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpHealthPing {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl HealthPing for HttpHealthPing {
    fn ping(&mut self, module: &str) -> Result<()> {
        let url = format!("{}/health/ping/{}", self.base_url, module);
        self.agent
            .post(&url)
            .call()
            .with_context(|| format!("health ping to {}", url))?;
        Ok(())
    }
}

pub struct HealthReporter {
    handle: JoinHandle<u64>,
}

impl HealthReporter {
    /// Ping immediately, then every `interval` until `shutdown` is set.
    pub fn spawn<P: HealthPing + 'static>(
        mut pinger: P,
        module: &str,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let module = module.to_string();
        let handle = std::thread::Builder::new()
            .name("health-ping".to_string())
            .spawn(move || {
                let mut sent = 0u64;
                while !shutdown.load(Ordering::SeqCst) {
                    match pinger.ping(&module) {
                        Ok(()) => {
                            sent += 1;
                            log::debug!("health ping sent for {}", module);
                        }
                        Err(e) => log::warn!("could not send health ping: {:#}", e),
                    }
                    sleep_unless_shutdown(interval, &shutdown);
                }
                sent
            })
            .context("spawn health reporter")?;
        Ok(Self { handle })
    }

    /// Wait for the reporter to exit. Returns the number of successful pings.
    pub fn join(self) -> u64 {
        self.handle.join().unwrap_or_else(|_| {
            log::error!("health reporter panicked");
            0
        })
    }
}

/// Sleep for `total`, waking early once `shutdown` is set.
pub(crate) fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct Counting {
        pings: Arc<AtomicU64>,
        fail: bool,
    }

    impl HealthPing for Counting {
        fn ping(&mut self, module: &str) -> Result<()> {
            assert_eq!(module, "cv_watchtower");
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("registry down");
            }
            Ok(())
        }
    }

    #[test]
    fn pings_until_shutdown() {
        let pings = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let reporter = HealthReporter::spawn(
            Counting {
                pings: pings.clone(),
                fail: false,
            },
            "cv_watchtower",
            Duration::from_millis(20),
            shutdown.clone(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pings.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        let sent = reporter.join();
        assert!(sent >= 3);
        assert_eq!(sent, pings.load(Ordering::SeqCst));
    }

    #[test]
    fn failures_do_not_stop_reporter() {
        let pings = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let reporter = HealthReporter::spawn(
            Counting {
                pings: pings.clone(),
                fail: true,
            },
            "cv_watchtower",
            Duration::from_millis(10),
            shutdown.clone(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pings.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        assert_eq!(reporter.join(), 0);
        assert!(pings.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn long_interval_wakes_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reporter = HealthReporter::spawn(
            Counting {
                pings: Arc::new(AtomicU64::new(0)),
                fail: false,
            },
            "cv_watchtower",
            Duration::from_secs(3600),
            shutdown.clone(),
        )
        .unwrap();
        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::SeqCst);
        reporter.join();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
