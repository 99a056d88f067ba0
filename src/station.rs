//! # Station Driver
//!
//! [`Station`] owns every core component and runs one cycle per
//! [`Station::tick`]:
//!
//! 1. read the sensor, if the sampling interval has elapsed
//! 2. feed the sample to the pipeline
//! 3. push a frame to the display
//! 4. let the publisher decide what to send
//! 5. advance the network supervisor
//! 6. advance the broker supervisor, only while the network is connected
//!
//! Publishing always sees the connectivity of the previous cycle, so a
//! reading is never sent on a link that is about to change state in the
//! same tick.

use crate::config::Config;
use crate::display::{DisplayFrame, StatusDisplay};
use crate::pipeline::LevelPipeline;
use crate::publisher::{LinkState, PublishReport, Publisher, PublisherSettings};
use crate::sensor::SensorSource;
use crate::supervisor::{ConnectivitySupervisor, Link, Transition};
use crate::transport::{BroadcastTransport, BrokerTransport};
use log::{error, warn};
use std::time::{Duration, Instant};

/// Exit status asking the service manager for a restart after fail-safe.
pub const RESTART_EXIT_CODE: i32 = 75;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The network never came back; the process should exit and be restarted
    Restart,
}

pub struct Station<S, B, N, M>
where
    S: SensorSource,
    B: BroadcastTransport,
    N: Link,
    M: Link + BrokerTransport,
{
    sensor: S,
    pipeline: LevelPipeline,
    publisher: Publisher<B>,
    network: ConnectivitySupervisor<N>,
    broker: ConnectivitySupervisor<M>,
    display: Option<Box<dyn StatusDisplay>>,
    started: Instant,
    sampling_interval: Duration,
    last_sample: Option<Instant>,
    last_report: PublishReport,
}

impl<S, B, N, M> Station<S, B, N, M>
where
    S: SensorSource,
    B: BroadcastTransport,
    N: Link,
    M: Link + BrokerTransport,
{
    /// Assemble a station from configuration and its collaborators.
    pub fn new(
        config: &Config,
        started: Instant,
        sensor: S,
        broadcast: B,
        network: N,
        broker: M,
    ) -> Self {
        let pipeline = LevelPipeline::new(
            config.sensor.filter_window,
            config.tank.height_mm,
            config.sensor.no_sensor_threshold,
        );
        let publisher = Publisher::new(
            broadcast,
            PublisherSettings {
                topics: config.broker.topics.clone(),
                client_id: config.broker.client_id.clone(),
                transducer: config.tank.transducer.clone(),
                repeat: config.broadcast.repeat,
                status_every_ticks: config.broker.status_every_ticks,
            },
        );

        Self {
            sensor,
            pipeline,
            publisher,
            network: ConnectivitySupervisor::new("network", network, config.network.retry_policy()),
            broker: ConnectivitySupervisor::new("mqtt", broker, config.broker.retry_policy()),
            display: None,
            started,
            sampling_interval: Duration::from_millis(config.sensor.sampling_interval_ms),
            last_sample: None,
            last_report: PublishReport::default(),
        }
    }

    /// Attach a display that receives a frame every tick.
    pub fn with_display(mut self, display: Box<dyn StatusDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    /// Run one cycle.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.sample_due(now) {
            self.last_sample = Some(now);
            if let Some(sample) = self.sensor.read(now) {
                self.pipeline.on_raw_sample(sample);
            }
        }

        let links = self.link_state();
        let uptime = now.saturating_duration_since(self.started);

        if let Some(display) = self.display.as_mut() {
            let reading = self.pipeline.current_reading();
            display.update(&DisplayFrame {
                height_mm: reading.filtered_height_mm,
                fill_percent: reading.fill_percent,
                sensor_ok: reading.sensor_ok,
                network_up: links.network_up,
                broker_up: links.broker_up,
                uptime,
            });
        }

        let uptime_ms = u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX);
        let broker = self.broker.link_mut();
        self.last_report = self.publisher.tick(&mut self.pipeline, links, uptime_ms, broker);

        if self.network.tick(now) == Some(Transition::RestartRequired) {
            error!("Network fail-safe period over, requesting restart");
            return TickOutcome::Restart;
        }

        if self.network.is_connected() {
            if self.broker.tick(now) == Some(Transition::Connected) {
                if let Err(e) = self.publisher.announce_online(self.broker.link_mut()) {
                    warn!("Could not announce online status: {}", e);
                }
            }
        } else {
            self.broker.link_lost();
        }

        TickOutcome::Continue
    }

    fn sample_due(&self, now: Instant) -> bool {
        self.last_sample
            .map_or(true, |last| now.saturating_duration_since(last) >= self.sampling_interval)
    }

    /// Connectivity as the publisher sees it this tick.
    pub fn link_state(&self) -> LinkState {
        LinkState {
            network_up: self.network.is_connected(),
            broker_up: self.network.is_connected() && self.broker.is_connected(),
        }
    }

    pub fn pipeline(&self) -> &LevelPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut LevelPipeline {
        &mut self.pipeline
    }

    pub fn publisher(&self) -> &Publisher<B> {
        &self.publisher
    }

    pub fn network(&self) -> &ConnectivitySupervisor<N> {
        &self.network
    }

    pub fn broker(&self) -> &ConnectivitySupervisor<M> {
        &self.broker
    }

    /// What the publisher sent on the most recent tick.
    pub fn last_report(&self) -> PublishReport {
        self.last_report
    }
}
