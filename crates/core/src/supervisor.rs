//! Run lifecycle: prepares segment cells, starts the authority server when
//! control is centralized, runs every train, then tears everything down.

use std::fs;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{
    authority::{AuthorityEvent, AuthorityServer, AuthoritySummary},
    config::{AppConfig, ControlLevel},
    dispatch::Dispatcher,
    error::{ControlError, ControlResult},
    journal::AuditJournal,
    map::{TrackLayout, TRAINS},
    segment::SegmentStore,
    train::{Train, TrainReport},
};

/// Outcome of a complete run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Reports of trains that completed, by train id.
    pub trains: Vec<TrainReport>,
    /// Station arrivals granted by the authority, in the order observed.
    pub stations_reached: Vec<AuthorityEvent>,
    /// Authority totals; `None` when control was not centralized.
    pub authority: Option<AuthoritySummary>,
}

/// Owns one simulation run.
pub struct Supervisor {
    config: AppConfig,
    layout: TrackLayout,
}

impl Supervisor {
    /// Supervisor for one run with `config`.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            layout: TrackLayout::default(),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Execute the run. Fails with the first train's fatal error, after
    /// cleanup, if any train failed.
    pub async fn run(&self) -> Result<RunReport> {
        let config = &self.config;
        info!(level = %config.level, map = config.map, "Run starting");
        let dispatcher = Dispatcher::for_map(config.map)?;

        fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("failed to create log directory {}", config.log_dir.display()))?;
        fs::create_dir_all(&config.segment_dir).with_context(|| {
            format!("failed to create segment directory {}", config.segment_dir.display())
        })?;
        let store = SegmentStore::new(&config.segment_dir);
        for id in self.layout.segment_ids() {
            store.initialize(id)?;
        }

        let (events_tx, mut events_rx) = mpsc::channel(TRAINS as usize * 2);
        let authority = match config.level {
            ControlLevel::Centralized => {
                let (broadcast_tx, broadcast_rx) = oneshot::channel();
                dispatcher.send_broadcast(broadcast_tx);
                let server =
                    AuthorityServer::start(config, store.clone(), broadcast_rx, events_tx).await?;
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                Some((shutdown_tx, tokio::spawn(server.run(shutdown_rx))))
            }
            ControlLevel::Local => {
                AuditJournal::new(config.audit_log_path()).discard()?;
                drop(events_tx);
                None
            }
        };

        let (done_tx, mut done_rx) = mpsc::channel(TRAINS as usize);
        let mut expected = 0;
        for id in dispatcher.trains() {
            let (itinerary_tx, itinerary_rx) = oneshot::channel();
            let train = Train::new(id, config, store.clone());
            let done = done_tx.clone();
            tokio::spawn(async move {
                let result = train.run(itinerary_rx).await;
                if done.send((id, result)).await.is_err() {
                    warn!(train = id, "Supervisor gone before train completion");
                }
            });
            dispatcher.send_itinerary(id, itinerary_tx);
            expected += 1;
        }
        drop(done_tx);

        let mut report = RunReport::default();
        let mut failures: Vec<(u32, ControlError)> = Vec::new();
        let mut events_open = true;
        loop {
            tokio::select! {
                finished = done_rx.recv() => match finished {
                    Some((id, Ok(train))) => {
                        info!(train = id, hops = train.hops, attempts = train.attempts, "Train completed");
                        report.trains.push(train);
                    }
                    Some((id, Err(err))) => {
                        error!(train = id, %err, "Train failed");
                        failures.push((id, err));
                    }
                    None => break,
                },
                event = events_rx.recv(), if events_open => match event {
                    Some(event) => {
                        info!(?event, "Terminal station reached");
                        report.stations_reached.push(event);
                    }
                    None => events_open = false,
                },
            }
        }
        let accounted = report.trains.len() + failures.len();
        if accounted < expected {
            error!(missing = expected - accounted, "Trains ended without reporting");
        }
        info!("All trains completed");

        if let Some((shutdown_tx, handle)) = authority {
            if shutdown_tx.send(()).is_err() {
                warn!("Authority server already stopped");
            }
            let summary = handle
                .await
                .context("authority server task panicked")?
                .context("authority server failed")?;
            while let Ok(event) = events_rx.try_recv() {
                report.stations_reached.push(event);
            }
            info!(decisions = summary.decisions, granted = summary.granted, "Authority stopped");
            report.authority = Some(summary);
        }

        self.release_segments(&store);
        report.trains.sort_by_key(|train| train.train);

        if let Some((id, err)) = failures.into_iter().next() {
            return Err(anyhow::Error::new(err).context(format!("train {id} failed")));
        }
        if accounted < expected {
            anyhow::bail!("{} train(s) ended without reporting", expected - accounted);
        }
        Ok(report)
    }

    fn release_segments(&self, store: &SegmentStore) {
        for id in self.layout.segment_ids() {
            if let Err(err) = store.destroy(id) {
                warn!(segment = id, %err, "Failed to remove segment cell");
            }
        }
    }
}

/// Build a supervisor from launch arguments applied over a loaded config.
pub fn prepare<I, S>(mut config: AppConfig, args: I) -> ControlResult<Supervisor>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    config.apply_args(args)?;
    Ok(Supervisor::new(config))
}
