//! Periodic publisher
//!
//! Publishes one message per period through a [`MessageSink`]. The first tick
//! fires immediately. The sequence number advances on every tick whether or not
//! the sink accepted the message, so a reader of the payloads can see gaps
//! caused by disconnects.

use crate::protocol::{DeliveryResult, OutboundMessage, Qos};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Anything that can accept an outbound publish
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn publish(&self, message: OutboundMessage) -> DeliveryResult;
}

/// What to publish and how often
#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub period: Duration,
    /// Supports `{seq}`, `{client_id}` and `{timestamp}` placeholders
    pub payload_template: String,
    pub client_id: String,
}

impl PublishSettings {
    pub fn render_payload(&self, seq: u64) -> String {
        let mut payload = self
            .payload_template
            .replace("{seq}", &seq.to_string())
            .replace("{client_id}", &self.client_id);
        if payload.contains("{timestamp}") {
            payload = payload.replace("{timestamp}", &chrono::Utc::now().to_rfc3339());
        }
        payload
    }
}

pub struct Publisher<S: MessageSink> {
    sink: Arc<S>,
    settings: PublishSettings,
}

impl<S: MessageSink> Publisher<S> {
    pub fn new(sink: Arc<S>, settings: PublishSettings) -> Self {
        Self { sink, settings }
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<u64> {
        tokio::spawn(self.run(stop))
    }

    /// Publish until `stop` flips to true (or its sender is dropped).
    /// Returns the number of ticks performed.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq = 0u64;

        info!(
            topic = %self.settings.topic,
            period = ?self.settings.period,
            "Publisher started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            // Stop may have been requested while we were waiting on the tick
            if *stop.borrow() {
                break;
            }

            let payload = self.settings.render_payload(seq);
            let message = OutboundMessage::new(
                self.settings.topic.clone(),
                payload.clone(),
                self.settings.qos,
                self.settings.retain,
            );

            let result = self.sink.publish(message).await;
            match result.message_id {
                Some(message_id) if result.accepted => {
                    info!(seq, %message_id, topic = %self.settings.topic, %payload, "Published message");
                }
                _ => {
                    warn!(seq, topic = %self.settings.topic, "Failed to publish message");
                }
            }
            seq += 1;
        }

        debug!(ticks = seq, "Publisher stopped");
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSink;

    fn settings(period: Duration) -> PublishSettings {
        PublishSettings {
            topic: "test 10".to_string(),
            qos: Qos::AtLeastOnce,
            retain: false,
            period,
            payload_template: "Hello from mqtt-session! Message #{seq}".to_string(),
            client_id: "client-123".to_string(),
        }
    }

    #[test]
    fn test_render_payload_placeholders() {
        let mut settings = settings(Duration::from_secs(5));
        assert_eq!(
            settings.render_payload(3),
            "Hello from mqtt-session! Message #3"
        );

        settings.payload_template = "{client_id}:{seq}".to_string();
        assert_eq!(settings.render_payload(0), "client-123:0");

        settings.payload_template = "at {timestamp}".to_string();
        let rendered = settings.render_payload(0);
        assert!(!rendered.contains("{timestamp}"));
        assert!(rendered.starts_with("at "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_sequence_on_each_tick() {
        let sink = Arc::new(MockSink::accepting());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = Publisher::new(sink.clone(), settings(Duration::from_secs(5))).spawn(stop_rx);

        // Ticks at t=0, 5 and 10
        tokio::time::sleep(Duration::from_secs(11)).await;
        stop_tx.send(true).unwrap();
        let ticks = handle.await.unwrap();

        assert_eq!(ticks, 3);
        let payloads: Vec<String> = sink
            .published()
            .iter()
            .map(|message| String::from_utf8_lossy(&message.payload).into_owned())
            .collect();
        assert_eq!(
            payloads,
            vec![
                "Hello from mqtt-session! Message #0",
                "Hello from mqtt-session! Message #1",
                "Hello from mqtt-session! Message #2",
            ]
        );
        assert!(sink
            .published()
            .iter()
            .all(|message| message.topic == "test 10" && message.qos == Qos::AtLeastOnce));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_advances_when_rejected() {
        let sink = Arc::new(MockSink::rejecting());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = Publisher::new(sink.clone(), settings(Duration::from_secs(1))).spawn(stop_rx);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        stop_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 3);
        let last = sink.published().last().cloned().unwrap();
        assert_eq!(last.payload, "Hello from mqtt-session! Message #2".as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick_publishes_nothing() {
        let sink = Arc::new(MockSink::accepting());
        let (_stop_tx, stop_rx) = watch::channel(true);

        let ticks = Publisher::new(sink.clone(), settings(Duration::from_secs(1)))
            .run(stop_rx)
            .await;

        assert_eq!(ticks, 0);
        assert!(sink.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stop_sender_ends_loop() {
        let sink = Arc::new(MockSink::accepting());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = Publisher::new(sink.clone(), settings(Duration::from_secs(60))).spawn(stop_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(stop_tx);

        assert_eq!(handle.await.unwrap(), 1);
    }
}
