//! # Publisher
//!
//! Decides what goes out on each tick and hands it to the transports.
//!
//! | condition                          | action                                        |
//! |------------------------------------|-----------------------------------------------|
//! | network down                       | nothing (new data stays pending)              |
//! | network up + new reading           | XDR sentence via UDP broadcast (`repeat` times)|
//! | ... and broker up                  | sentence, height and percent to their topics  |
//! | network + broker up, every Kth tick| link/sensor status strings and a JSON summary |
//!
//! Send failures are logged and counted, never retried: the next reading
//! supersedes a lost one, and a backlog of stale levels is worse than a gap.

use crate::config::TopicConfig;
use crate::nmea;
use crate::pipeline::LevelPipeline;
use crate::transport::{BroadcastTransport, BrokerTransport, TransportError};
use crate::LevelReading;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Connectivity as seen at the start of a publish decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkState {
    pub network_up: bool,
    pub broker_up: bool,
}

/// Aggregate status document published on the status topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub height_mm: u32,
    pub level_percent: u8,
    pub wifi_connected: bool,
    pub sensor_ok: bool,
    /// Milliseconds since process start
    pub timestamp: u64,
    pub client_id: String,
}

/// What a single tick sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// UDP datagrams written
    pub datagrams: u32,
    /// Broker messages accepted
    pub broker_messages: u32,
    /// Sends that failed on either transport
    pub failures: u32,
    /// Whether this tick carried the periodic status payload
    pub status_published: bool,
}

impl PublishReport {
    /// True when nothing at all was attempted.
    pub fn is_idle(&self) -> bool {
        self.datagrams == 0 && self.broker_messages == 0 && self.failures == 0
    }
}

/// Publisher tuning.
#[derive(Clone, Debug)]
pub struct PublisherSettings {
    pub topics: TopicConfig,
    pub client_id: String,
    pub transducer: String,
    /// Copies of each sentence per new reading
    pub repeat: u32,
    /// Ticks between periodic status payloads
    pub status_every_ticks: u32,
}

/// Turns readings into outgoing messages.
pub struct Publisher<B: BroadcastTransport> {
    broadcast: B,
    settings: PublisherSettings,
    tick_count: u64,
}

impl<B: BroadcastTransport> Publisher<B> {
    pub fn new(broadcast: B, mut settings: PublisherSettings) -> Self {
        settings.repeat = settings.repeat.max(1);
        settings.status_every_ticks = settings.status_every_ticks.max(1);
        Self {
            broadcast,
            settings,
            tick_count: 0,
        }
    }

    /// Run one publish cycle.
    ///
    /// The new-data flag is only consumed while the network is up, so a
    /// reading taken during an outage goes out on the first connected tick.
    pub fn tick(
        &mut self,
        pipeline: &mut LevelPipeline,
        links: LinkState,
        uptime_ms: u64,
        broker: &mut dyn BrokerTransport,
    ) -> PublishReport {
        self.tick_count += 1;
        let mut report = PublishReport::default();

        if !links.network_up {
            return report;
        }

        let reading = pipeline.current_reading();

        if pipeline.consume_data_ready() {
            let sentence = nmea::encode_xdr(&reading.fill_text(), &self.settings.transducer);
            self.broadcast_sentence(&sentence, &mut report);

            if links.broker_up {
                let topics = &self.settings.topics;
                let messages = [
                    (topics.height.as_str(), reading.filtered_height_mm.to_string()),
                    (topics.percent.as_str(), reading.fill_text()),
                    (topics.sentence.as_str(), sentence.clone()),
                ];
                for (topic, payload) in &messages {
                    send_to_broker(broker, topic, payload, false, &mut report);
                }
            }
        }

        if links.broker_up && self.tick_count % u64::from(self.settings.status_every_ticks) == 0 {
            self.publish_status(broker, reading, links, uptime_ms, &mut report);
            report.status_published = true;
        }

        report
    }

    /// Retained "online" marker, sent once per broker connection.
    pub fn announce_online(&self, broker: &mut dyn BrokerTransport) -> Result<(), TransportError> {
        broker.publish(&self.settings.topics.status, "online", true)
    }

    /// JSON summary for the status topic.
    pub fn status_payload(
        &self,
        reading: LevelReading,
        links: LinkState,
        uptime_ms: u64,
    ) -> StatusPayload {
        StatusPayload {
            height_mm: reading.filtered_height_mm,
            level_percent: reading.fill_percent,
            wifi_connected: links.network_up,
            sensor_ok: reading.sensor_ok,
            timestamp: uptime_ms,
            client_id: self.settings.client_id.clone(),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn broadcast(&self) -> &B {
        &self.broadcast
    }

    fn broadcast_sentence(&mut self, sentence: &str, report: &mut PublishReport) {
        for _ in 0..self.settings.repeat {
            match self.broadcast.send(sentence.as_bytes()) {
                Ok(_) => report.datagrams += 1,
                Err(e) => {
                    warn!("UDP send failed: {}", e);
                    report.failures += 1;
                }
            }
        }
        debug!("Broadcast {}", sentence);
    }

    fn publish_status(
        &self,
        broker: &mut dyn BrokerTransport,
        reading: LevelReading,
        links: LinkState,
        uptime_ms: u64,
        report: &mut PublishReport,
    ) {
        let topics = &self.settings.topics;
        let link_text = if links.network_up { "connected" } else { "disconnected" };
        let sensor_text = if reading.sensor_ok { "ok" } else { "error" };
        send_to_broker(broker, &topics.link_status, link_text, false, report);
        send_to_broker(broker, &topics.sensor_status, sensor_text, false, report);

        match serde_json::to_string(&self.status_payload(reading, links, uptime_ms)) {
            Ok(json) => send_to_broker(broker, &topics.status, &json, false, report),
            Err(e) => {
                warn!("Could not encode status payload: {}", e);
                report.failures += 1;
            }
        }
    }
}

fn send_to_broker(
    broker: &mut dyn BrokerTransport,
    topic: &str,
    payload: &str,
    retain: bool,
    report: &mut PublishReport,
) {
    match broker.publish(topic, payload, retain) {
        Ok(()) => report.broker_messages += 1,
        Err(e) => {
            warn!("MQTT publish to {} failed: {}", topic, e);
            report.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RawSample, SensorStatus};

    #[derive(Default)]
    struct RecordingBroadcast {
        sent: Vec<String>,
        fail: bool,
    }

    impl BroadcastTransport for RecordingBroadcast {
        fn send(&mut self, payload: &[u8]) -> Result<usize, TransportError> {
            if self.fail {
                return Err(TransportError::Io(std::io::Error::other("unreachable")));
            }
            self.sent.push(String::from_utf8_lossy(payload).into_owned());
            Ok(payload.len())
        }
    }

    #[derive(Default)]
    struct RecordingBroker {
        messages: Vec<(String, String, bool)>,
    }

    impl BrokerTransport for RecordingBroker {
        fn publish(
            &mut self,
            topic: &str,
            payload: &str,
            retain: bool,
        ) -> Result<(), TransportError> {
            self.messages
                .push((topic.to_string(), payload.to_string(), retain));
            Ok(())
        }
    }

    fn settings() -> PublisherSettings {
        PublisherSettings {
            topics: TopicConfig::default(),
            client_id: "tank-1".to_string(),
            transducer: "FUEL".to_string(),
            repeat: 1,
            status_every_ticks: 100,
        }
    }

    fn pipeline_with(value_mm: u32) -> LevelPipeline {
        let mut pipeline = LevelPipeline::new(10, 400, 3);
        pipeline.on_raw_sample(RawSample {
            value_mm,
            status: SensorStatus::Valid,
        });
        pipeline
    }

    const ALL_UP: LinkState = LinkState {
        network_up: true,
        broker_up: true,
    };

    #[test]
    fn test_network_down_is_noop_and_keeps_data_pending() {
        let mut publisher = Publisher::new(RecordingBroadcast::default(), settings());
        let mut broker = RecordingBroker::default();
        let mut pipeline = pipeline_with(100);

        let report = publisher.tick(&mut pipeline, LinkState::default(), 0, &mut broker);
        assert!(report.is_idle());
        assert!(publisher.broadcast().sent.is_empty());

        // Reading is delivered once the network comes back
        let report = publisher.tick(
            &mut pipeline,
            LinkState {
                network_up: true,
                broker_up: false,
            },
            50,
            &mut broker,
        );
        assert_eq!(report.datagrams, 1);
        assert_eq!(publisher.broadcast().sent, vec!["$IIXDR,V,25,P,FUEL*55"]);
        assert!(broker.messages.is_empty());
    }

    #[test]
    fn test_new_reading_goes_to_both_transports() {
        let mut publisher = Publisher::new(RecordingBroadcast::default(), settings());
        let mut broker = RecordingBroker::default();
        let mut pipeline = pipeline_with(100);

        let report = publisher.tick(&mut pipeline, ALL_UP, 0, &mut broker);
        assert_eq!(report.datagrams, 1);
        assert_eq!(report.broker_messages, 3);
        assert!(!report.status_published);

        let topics: Vec<&str> = broker.messages.iter().map(|(t, _, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "sensors/level/height_mm",
                "sensors/level/percent",
                "sensors/level/nmea_xdr"
            ]
        );
        assert_eq!(broker.messages[0].1, "100");
        assert_eq!(broker.messages[1].1, "25");
        assert_eq!(broker.messages[2].1, "$IIXDR,V,25,P,FUEL*55");

        // Flag consumed: next tick sends nothing
        let report = publisher.tick(&mut pipeline, ALL_UP, 50, &mut broker);
        assert!(report.is_idle());
    }

    #[test]
    fn test_repeat_count_sends_copies() {
        let mut publisher = Publisher::new(
            RecordingBroadcast::default(),
            PublisherSettings {
                repeat: 4,
                ..settings()
            },
        );
        let mut broker = RecordingBroker::default();
        let mut pipeline = pipeline_with(200);

        let report = publisher.tick(&mut pipeline, ALL_UP, 0, &mut broker);
        assert_eq!(report.datagrams, 4);
        assert!(publisher
            .broadcast()
            .sent
            .iter()
            .all(|s| s == "$IIXDR,V,50,P,FUEL*57"));
    }

    #[test]
    fn test_periodic_status_every_kth_tick() {
        let mut publisher = Publisher::new(
            RecordingBroadcast::default(),
            PublisherSettings {
                status_every_ticks: 3,
                ..settings()
            },
        );
        let mut broker = RecordingBroker::default();
        let mut pipeline = pipeline_with(100);
        pipeline.consume_data_ready();

        let mut status_ticks = Vec::new();
        for tick in 1..=9u64 {
            let report = publisher.tick(&mut pipeline, ALL_UP, tick * 50, &mut broker);
            if report.status_published {
                status_ticks.push(tick);
            }
        }
        assert_eq!(status_ticks, vec![3, 6, 9]);
        assert_eq!(broker.messages.len(), 9);

        let (topic, json, retain) = &broker.messages[2];
        assert_eq!(topic, "sensors/level/status");
        assert!(!retain);
        let payload: StatusPayload = serde_json::from_str(json).unwrap();
        assert_eq!(
            payload,
            StatusPayload {
                height_mm: 100,
                level_percent: 25,
                wifi_connected: true,
                sensor_ok: true,
                timestamp: 150,
                client_id: "tank-1".to_string(),
            }
        );
        assert_eq!(broker.messages[0].1, "connected");
        assert_eq!(broker.messages[1].1, "ok");
    }

    #[test]
    fn test_status_requires_broker() {
        let mut publisher = Publisher::new(
            RecordingBroadcast::default(),
            PublisherSettings {
                status_every_ticks: 1,
                ..settings()
            },
        );
        let mut broker = RecordingBroker::default();
        let mut pipeline = LevelPipeline::new(10, 400, 3);
        let links = LinkState {
            network_up: true,
            broker_up: false,
        };

        let report = publisher.tick(&mut pipeline, links, 0, &mut broker);
        assert!(!report.status_published);
        assert!(broker.messages.is_empty());
    }

    #[test]
    fn test_broadcast_failure_is_counted_not_retried() {
        let mut publisher = Publisher::new(
            RecordingBroadcast {
                fail: true,
                ..Default::default()
            },
            settings(),
        );
        let mut broker = RecordingBroker::default();
        let mut pipeline = pipeline_with(100);

        let report = publisher.tick(&mut pipeline, ALL_UP, 0, &mut broker);
        assert_eq!(report.failures, 1);
        assert_eq!(report.datagrams, 0);
        // Broker still gets the reading
        assert_eq!(report.broker_messages, 3);

        let report = publisher.tick(&mut pipeline, ALL_UP, 50, &mut broker);
        assert!(report.is_idle());
    }

    #[test]
    fn test_announce_online_is_retained() {
        let publisher = Publisher::new(RecordingBroadcast::default(), settings());
        let mut broker = RecordingBroker::default();
        publisher.announce_online(&mut broker).unwrap();
        assert_eq!(
            broker.messages,
            vec![("sensors/level/status".to_string(), "online".to_string(), true)]
        );
    }
}
