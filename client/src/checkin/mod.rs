// Check-in tracking: event model, debounced scheduler, and producers

pub mod cron;
pub mod event;
pub mod scheduler;

pub use cron::Cron;
pub use event::{deduplicate_cron, CheckInType, Event, EventKind};
pub use scheduler::{Scheduler, SchedulerConfig};

/// Schedule a heartbeat check-in for `identifier`
pub async fn heartbeat(scheduler: &Scheduler, identifier: impl Into<String>) {
    scheduler.schedule(Event::heartbeat(identifier)).await;
}
