//! Background refreshes, independent of request traffic.
//!
//! All resources are refreshed once on startup. Resources with a `refresh_every` period are
//! grouped by that period, and each group is refreshed on its own interval. The refreshes go
//! through the shared coalescer, so they never race with refreshes started by requests.

use std::collections::BTreeMap;
use std::time::Duration;

use rinkside_service::caching::RefreshOutcome;
use rinkside_service::services::ResourceService;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Handles of the spawned scheduler tasks. Dropping this stops the schedule.
#[derive(Debug)]
pub struct Scheduler {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Spawns the startup refresh and one interval task per distinct refresh period.
///
/// Must be called from within a tokio runtime.
pub fn spawn(service: ResourceService) -> Scheduler {
    let mut tasks = Vec::new();

    let names: Vec<String> = service.resources().map(|r| r.name.clone()).collect();
    if !names.is_empty() {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            tracing::info!("Refreshing {} resources on startup", names.len());
            log_outcomes("startup", service.refresh_all(&names).await);
        }));
    }

    for (period, names) in group_by_period(&service) {
        tracing::info!(
            period = %humantime::format_duration(period),
            resources = ?names,
            "Scheduling periodic refresh",
        );
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                log_outcomes("schedule", service.refresh_all(&names).await);
            }
        }));
    }

    Scheduler { tasks }
}

fn group_by_period(service: &ResourceService) -> BTreeMap<Duration, Vec<String>> {
    let mut groups: BTreeMap<Duration, Vec<String>> = BTreeMap::new();
    for resource in service.resources() {
        match resource.refresh_every {
            Some(period) if period.is_zero() => {
                tracing::warn!(resource = %resource.name, "Ignoring zero refresh period");
            }
            Some(period) => groups.entry(period).or_default().push(resource.name.clone()),
            None => {}
        }
    }
    groups
}

fn log_outcomes(trigger: &str, outcomes: Vec<(String, Option<RefreshOutcome<Value>>)>) {
    for (name, outcome) in outcomes {
        match outcome {
            Some(RefreshOutcome::Success(_)) => {
                tracing::info!(resource = %name, trigger, "Refreshed resource");
            }
            Some(RefreshOutcome::Failure(err)) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    resource = %name,
                    trigger,
                    "Scheduled refresh failed",
                );
            }
            None => tracing::warn!(resource = %name, trigger, "Resource disappeared"),
        }
    }
}
