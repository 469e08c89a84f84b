//! Routine scheduler: turns cron-configured routines into schedule events.

use chrono::{DateTime, Local, Timelike, Utc};
use hearth_config::RoutineConfig;
use hearth_core::event::{NewEvent, ScheduleChange, ScheduleChangeKind};
use hearth_core::ids::EventId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cron::CronExpr;
use crate::log::EventLog;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Routine '{routine}' has an invalid schedule: {reason}")]
    InvalidSchedule { routine: String, reason: String },

    #[error("Routine '{0}' is already registered")]
    Duplicate(String),
}

struct Routine {
    config: RoutineConfig,
    expr: CronExpr,
    last_fired: Option<DateTime<Utc>>,
}

pub struct RoutineScheduler {
    routines: Vec<Routine>,
    log: Arc<EventLog>,
    tick: Duration,
}

impl RoutineScheduler {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self {
            routines: Vec::new(),
            log,
            tick: Duration::from_secs(60),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Register every configured routine, failing on the first invalid one.
    pub fn from_config(log: Arc<EventLog>, routines: &[RoutineConfig]) -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new(log);
        for routine in routines {
            scheduler.register(routine.clone())?;
        }
        Ok(scheduler)
    }

    pub fn register(&mut self, config: RoutineConfig) -> Result<(), SchedulerError> {
        if self.routines.iter().any(|r| r.config.name == config.name) {
            return Err(SchedulerError::Duplicate(config.name));
        }
        let expr = CronExpr::parse(&config.schedule).map_err(|reason| {
            SchedulerError::InvalidSchedule {
                routine: config.name.clone(),
                reason,
            }
        })?;
        info!(routine = %config.name, schedule = %config.schedule, enabled = config.enabled, "Registered routine");
        self.routines.push(Routine {
            config,
            expr,
            last_fired: None,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    /// Fire every enabled routine whose schedule matches the local wall
    /// clock at `now` and that has not fired in this minute yet. Returns the
    /// ids of the submitted schedule events.
    pub fn check(&mut self, now: DateTime<Utc>) -> Vec<EventId> {
        let minute = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let wall_clock = now.with_timezone(&Local);
        let mut fired = Vec::new();

        for routine in &mut self.routines {
            if !routine.config.enabled || !routine.expr.matches(&wall_clock) {
                continue;
            }
            if routine.last_fired == Some(minute) {
                continue;
            }
            routine.last_fired = Some(minute);

            let change = ScheduleChange {
                entry_id: format!("routine.{}", routine.config.name),
                title: routine.config.name.clone(),
                starts_at: minute,
                ends_at: None,
                change: ScheduleChangeKind::Due,
                prompt: Some(routine.config.prompt.clone()),
            };
            let event = NewEvent::schedule(change)
                .at(now)
                .from_producer("routine-scheduler");

            match self.log.submit(event) {
                Ok(id) => {
                    info!(routine = %routine.config.name, event_id = %id, "Routine due");
                    fired.push(id);
                }
                Err(e) => {
                    warn!(routine = %routine.config.name, error = %e, "Failed to submit routine event");
                }
            }
        }

        fired
    }

    /// Run the scheduler until `shutdown` fires.
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Routine scheduler stopping");
                        return;
                    }
                    _ = interval.tick() => {
                        self.check(Utc::now());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hearth_core::bus::DiagnosticBus;
    use hearth_core::event::EventPayload;

    fn routine(name: &str, schedule: &str) -> RoutineConfig {
        RoutineConfig {
            name: name.into(),
            schedule: schedule.into(),
            prompt: format!("Run the {name} routine."),
            enabled: true,
        }
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn log() -> Arc<EventLog> {
        let (log, _feed) = EventLog::new(Arc::new(DiagnosticBus::default()));
        Arc::new(log)
    }

    #[test]
    fn invalid_schedule_rejected_at_registration() {
        let err = RoutineScheduler::from_config(log(), &[routine("bedtime", "99 * * * *")])
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut scheduler = RoutineScheduler::new(log());
        scheduler.register(routine("bedtime", "0 22 * * *")).unwrap();
        assert!(matches!(
            scheduler.register(routine("bedtime", "0 23 * * *")),
            Err(SchedulerError::Duplicate(_))
        ));
    }

    #[test]
    fn fires_once_per_minute_with_due_event() {
        let log = log();
        let mut scheduler =
            RoutineScheduler::from_config(log.clone(), &[routine("bedtime", "0 22 * * *")]).unwrap();

        let ten_pm = local(2025, 3, 14, 22, 0, 5);
        let fired = scheduler.check(ten_pm);
        assert_eq!(fired.len(), 1);
        assert!(scheduler.check(ten_pm + chrono::Duration::seconds(30)).is_empty());
        assert!(scheduler.check(ten_pm + chrono::Duration::minutes(1)).is_empty());

        let event = log.get(fired[0]).unwrap();
        assert_eq!(event.provenance.producer, "routine-scheduler");
        match &event.payload {
            EventPayload::Schedule(change) => {
                assert_eq!(change.change, ScheduleChangeKind::Due);
                assert_eq!(change.title, "bedtime");
                assert_eq!(change.prompt.as_deref(), Some("Run the bedtime routine."));
            }
            other => panic!("expected schedule payload, got {other:?}"),
        }
    }

    #[test]
    fn schedules_follow_local_time() {
        let log = log();
        let mut scheduler =
            RoutineScheduler::from_config(log.clone(), &[routine("bedtime", "30 22 * * *")]).unwrap();

        let bedtime = local(2025, 6, 10, 22, 30, 0);
        assert_eq!(scheduler.check(bedtime).len(), 1);
        // The hour learned habits are keyed by
        assert_eq!(bedtime.with_timezone(&Local).hour(), 22);
        assert!(scheduler.check(local(2025, 6, 10, 21, 30, 0)).is_empty());
    }

    #[test]
    fn disabled_routines_do_not_fire() {
        let mut disabled = routine("wake", "* * * * *");
        disabled.enabled = false;
        let mut scheduler = RoutineScheduler::from_config(log(), &[disabled]).unwrap();
        assert!(scheduler.check(Utc::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_scheduler_stops_on_shutdown() {
        let scheduler = RoutineScheduler::from_config(log(), &[routine("tick", "* * * * *")])
            .unwrap()
            .with_tick(Duration::from_secs(1));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
