//! Simulate command - drive a workload on a virtual clock
//!
//! Builds a store over the in-memory backend with a manual scheduler, reads
//! every key, then advances time and reports the event trace and which
//! entities are still cached.

use crate::audit::AuditLog;
use crate::cli::args::{OutputFormat, SimulateArgs};
use crate::config::Config;
use crate::entity::ReadyState;
use crate::error::{LifecacheError, LifecacheResult};
use crate::hooks::HookEvent;
use crate::resource::{MemoryResource, ProviderChain, SharedFactory};
use crate::scheduler::{ManualScheduler, Scheduler};
use crate::store::{spawn_event_logger, CacheStore, StoreEvent};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

/// One event observed on the store
#[derive(Debug, Clone, Serialize)]
pub struct TraceRow {
    /// Virtual time, in life units
    pub at: f64,
    pub key: String,
    pub event: String,
    pub details: Value,
}

/// An entity still cached when the simulation ends
#[derive(Debug, Clone, Serialize)]
pub struct Survivor {
    pub key: String,
    pub state: ReadyState,
    pub life: f64,
    /// Virtual time of eviction, in life units
    pub expires_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Virtual time at the end, in life units
    pub elapsed: f64,
    pub trace: Vec<TraceRow>,
    pub survivors: Vec<Survivor>,
}

/// Execute the simulate command
pub async fn execute(args: SimulateArgs, config: &Config) -> LifecacheResult<()> {
    let report = simulate(&args, config).await?;

    match args.format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Plain => print_plain(&report),
    }

    Ok(())
}

/// Run the workload described by `args` and collect what happened
pub async fn simulate(args: &SimulateArgs, config: &Config) -> LifecacheResult<SimulationReport> {
    let mut settings = config.store_settings();
    settings.default_options.create = false;
    if args.keep {
        settings.default_options.keep = true;
    }

    let unit = settings.life_unit;
    if unit.is_zero() {
        return Err(LifecacheError::User("life unit must be greater than zero".to_string()));
    }

    let memory = MemoryResource::new();
    for key in &args.keys {
        memory.insert(key.clone(), Value::String(args.payload.clone()));
    }

    let scheduler = Arc::new(ManualScheduler::new());
    let label = settings.label.clone();
    let store = CacheStore::builder(SharedFactory::new(ProviderChain::new(Arc::new(memory))))
        .settings(settings)
        .scheduler(scheduler.clone())
        .build();

    let mut recorder = Recorder::new(&store, Arc::clone(&scheduler), unit);
    spawn_event_logger(&store, label);
    let audit = AuditLog::new(config).spawn(&store);

    for key in &args.keys {
        let fresh = !store.contains(key);
        let entity = store.get(key).await?;
        if fresh && entity.options().check {
            recorder.settle(key).await?;
        }
        recorder.drain();

        if entity.ready_state() == ReadyState::Failed {
            continue;
        }
        for _ in 0..args.reads {
            entity.get_data().await?;
            recorder.drain();
        }
    }

    let target = match args.advance {
        Some(units) => scheduler.now() + units_to_duration(unit, units)?,
        None => store
            .keys()
            .iter()
            .filter_map(|key| store.peek(key))
            .map(|entity| entity.expires_at())
            .max()
            .unwrap_or_else(|| scheduler.now()),
    };
    debug!("Advancing virtual clock to {:?}", target);

    // Step from deadline to deadline so every event is stamped with the
    // time it fired at
    while scheduler.now() < target {
        let now = scheduler.now();
        let next = scheduler
            .next_deadline()
            .filter(|deadline| *deadline <= target)
            .unwrap_or(target);
        scheduler.advance(next.saturating_sub(now)).await;
        recorder.drain();
    }

    let survivors = store
        .keys()
        .iter()
        .filter_map(|key| store.peek(key))
        .map(|entity| Survivor {
            key: entity.key().to_string(),
            state: entity.ready_state(),
            life: entity.life(),
            expires_at: recorder.units(entity.expires_at()),
        })
        .collect();

    let report = SimulationReport {
        elapsed: recorder.units(scheduler.now()),
        trace: recorder.trace,
        survivors,
    };

    drop(store);
    if let Some(handle) = audit {
        if let Err(e) = handle.await {
            warn!("Audit log task failed: {}", e);
        }
    }

    Ok(report)
}

fn units_to_duration(unit: Duration, units: f64) -> LifecacheResult<Duration> {
    if !(units.is_finite() && units >= 0.0) {
        return Err(LifecacheError::User(format!(
            "--advance must be a non-negative number, got {}",
            units
        )));
    }
    Duration::try_from_secs_f64(unit.as_secs_f64() * units)
        .map_err(|e| LifecacheError::User(format!("--advance {} is out of range: {}", units, e)))
}

/// Collects store events stamped with virtual time
struct Recorder {
    rx: broadcast::Receiver<StoreEvent>,
    scheduler: Arc<ManualScheduler>,
    unit: Duration,
    trace: Vec<TraceRow>,
}

impl Recorder {
    fn new(store: &CacheStore, scheduler: Arc<ManualScheduler>, unit: Duration) -> Self {
        Self {
            rx: store.subscribe(),
            scheduler,
            unit,
            trace: Vec::new(),
        }
    }

    fn units(&self, at: Duration) -> f64 {
        at.as_secs_f64() / self.unit.as_secs_f64()
    }

    fn push(&mut self, event: StoreEvent) {
        let at = self.units(self.scheduler.now());
        self.trace.push(TraceRow {
            at,
            key: event.key().to_string(),
            event: event.name().to_string(),
            details: event.event.details(),
        });
    }

    /// Record everything already broadcast
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Simulation trace dropped events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Record events until the readiness check of `key` has settled
    async fn settle(&mut self, key: &str) -> LifecacheResult<()> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let settled = event.key() == key
                        && matches!(event.event, HookEvent::Ready | HookEvent::CheckFail(_));
                    self.push(event);
                    if settled {
                        return Ok(());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Simulation trace dropped events");
                }
                Err(RecvError::Closed) => {
                    return Err(LifecacheError::Internal("store closed".to_string()));
                }
            }
        }
    }
}

fn print_table(report: &SimulationReport) {
    let ctx = UiContext::detect();
    ui::section(&ctx, "Event trace");

    println!(
        "{:<10} {:<12} {:<16} {}",
        style("AT").bold(),
        style("KEY").bold(),
        style("EVENT").bold(),
        style("DETAILS").bold()
    );
    println!("{}", "-".repeat(60));

    for row in &report.trace {
        let details = match &row.details {
            Value::Object(map) if map.is_empty() => String::new(),
            other => other.to_string(),
        };
        println!("{:<10.2} {:<12} {:<16} {}", row.at, row.key, row.event, details);
    }

    ui::section(&ctx, "Survivors");
    if report.survivors.is_empty() {
        ui::remark(&ctx, "No entities left in the store");
    }
    for survivor in &report.survivors {
        ui::key_value(
            &ctx,
            &survivor.key,
            &format!(
                "{} (life {:.2}, expires at {:.2})",
                survivor.state, survivor.life, survivor.expires_at
            ),
        );
    }

    println!();
    println!(
        "{} event(s), {} survivor(s) after {:.2} unit(s)",
        report.trace.len(),
        report.survivors.len(),
        report.elapsed
    );
}

fn print_json(report: &SimulationReport) -> LifecacheResult<()> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(report: &SimulationReport) {
    for row in &report.trace {
        println!("{:.2} {} {}", row.at, row.key, row.event);
    }
    for survivor in &report.survivors {
        println!("alive {}", survivor.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(keys: &[&str], keep: bool, advance: Option<f64>) -> SimulateArgs {
        SimulateArgs {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            reads: 2,
            payload: "ab".to_string(),
            keep,
            advance,
            format: OutputFormat::Json,
        }
    }

    fn events_for<'a>(report: &'a SimulationReport, key: &str) -> Vec<&'a str> {
        report
            .trace
            .iter()
            .filter(|row| row.key == key)
            .map(|row| row.event.as_str())
            .collect()
    }

    #[tokio::test]
    async fn reads_without_keep_expire_at_initial_life() {
        let report = simulate(&args(&["a"], false, None), &Config::default())
            .await
            .unwrap();

        assert_eq!(
            events_for(&report, "a"),
            vec![
                "ready",
                "beforeGetData",
                "afterGetData",
                "beforeGetData",
                "afterGetData",
                "beforeRelease",
                "afterRelease"
            ]
        );
        let released = report.trace.last().unwrap();
        assert_eq!(released.at, 10.0);
        assert!(report.survivors.is_empty());
        assert_eq!(report.elapsed, 10.0);
    }

    #[tokio::test]
    async fn keep_compounds_life() {
        let report = simulate(&args(&["a"], true, None), &Config::default())
            .await
            .unwrap();

        let extensions = events_for(&report, "a")
            .into_iter()
            .filter(|e| *e == "extendLife")
            .count();
        assert_eq!(extensions, 4);

        let released = report.trace.last().unwrap();
        assert_eq!(released.event, "afterRelease");
        assert_eq!(released.at, 62.5);
    }

    #[tokio::test]
    async fn partial_advance_reports_survivors() {
        let report = simulate(&args(&["a", "b", "a"], false, Some(5.0)), &Config::default())
            .await
            .unwrap();

        let keys: Vec<&str> = report.survivors.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(report.survivors[0].life, 10.0);
        assert_eq!(report.survivors[0].expires_at, 10.0);
        assert_eq!(report.elapsed, 5.0);
    }

    #[tokio::test]
    async fn negative_advance_is_rejected() {
        let err = simulate(&args(&["a"], false, Some(-1.0)), &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecacheError::User(_)));
    }
}
