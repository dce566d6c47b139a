//! Background job scheduling.
//!
//! Named jobs run on fixed periods, the first tick firing immediately.
//! A job declares which other jobs it must not overlap with; a tick that
//! collides with a running excluded job is skipped, not queued. Every
//! loop stops when the shutdown token fires, and a running job body sees
//! the same token so it can stop at its own safe points.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type JobFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Job {
    pub name: &'static str,
    pub period: Duration,
    /// Names of jobs this one must not run alongside.
    pub excludes: &'static [&'static str],
    pub run: JobFn,
}

#[derive(Default)]
pub struct JobScheduler {
    jobs: Vec<Job>,
    running: Arc<Mutex<HashSet<&'static str>>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Job) -> &mut Self {
        self.jobs.push(job);
        self
    }

    /// Spawns one loop per registered job and hands back their handles.
    pub fn spawn(self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let JobScheduler { jobs, running } = self;
        jobs.into_iter()
            .map(|job| {
                let running = running.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(job.period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!(job = job.name, "job loop stopped");
                                break;
                            }
                            _ = interval.tick() => {}
                        }
                        if !claim(&running, job.name, job.excludes) {
                            debug!(job = job.name, "tick skipped, excluded job running");
                            continue;
                        }
                        (job.run)(cancel.clone()).await;
                        running.lock().remove(job.name);
                    }
                })
            })
            .collect()
    }
}

/// Marks `name` as running unless it or anything it excludes already is.
fn claim(running: &Mutex<HashSet<&'static str>>, name: &'static str, excludes: &[&str]) -> bool {
    let mut running = running.lock();
    if running.contains(name) || excludes.iter().any(|other| running.contains(other)) {
        return false;
    }
    running.insert(name);
    true
}
