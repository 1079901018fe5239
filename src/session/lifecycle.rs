//! Session lifecycle: connect, publish periodically, react to losses, shut down
//!
//! The core never reconnects by itself. When a [`ReconnectPolicy`] is
//! configured, this is the caller that applies it: an unexpected drop to
//! `Disconnected` triggers `connect()` attempts with the policy's backoff.

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::{SessionError, SessionResult};
use crate::protocol::ConnectAck;
use crate::session::dispatcher::EventDispatcher;
use crate::session::manager::ConnectionManager;
use crate::session::publisher::{PublishSettings, Publisher};
use crate::session::state::ConnectionState;
use crate::transport::Connector;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Owns the connection manager and the publisher task
pub struct SessionLifecycle<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    publish_settings: Option<PublishSettings>,
    reconnect: Option<ReconnectPolicy>,
    publisher_stop: Option<watch::Sender<bool>>,
    publisher_handle: Option<JoinHandle<u64>>,
}

impl<C: Connector> SessionLifecycle<C> {
    pub fn new(config: &ClientConfig, connector: C, dispatcher: EventDispatcher) -> Self {
        let publish_settings = config.publish.enabled.then(|| config.publish_settings());
        Self {
            manager: Arc::new(ConnectionManager::new(
                config.session.clone(),
                connector,
                dispatcher,
            )),
            publish_settings,
            reconnect: config.reconnect.clone(),
            publisher_stop: None,
            publisher_handle: None,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    pub fn is_publishing(&self) -> bool {
        self.publisher_handle.is_some()
    }

    /// Connect and start the publisher
    pub async fn start(&mut self) -> SessionResult<ConnectAck> {
        let ack = self.manager.connect().await?;

        if let Some(settings) = self.publish_settings.clone() {
            let (stop_tx, stop_rx) = watch::channel(false);
            let span = crate::publish_span!(topic = %settings.topic);
            let publisher = Publisher::new(self.manager.clone(), settings);
            let handle = tokio::spawn(publisher.run(stop_rx).instrument(span));
            self.publisher_stop = Some(stop_tx);
            self.publisher_handle = Some(handle);
            info!("Publisher task started");
        }

        Ok(ack)
    }

    /// Run until `shutdown` completes, then shut down gracefully
    ///
    /// Returns [`SessionError::ReconnectExhausted`] if a reconnect policy
    /// gave up; the session is shut down before returning in every case.
    pub async fn run_until<F>(&mut self, shutdown: F) -> SessionResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut state_rx = self.manager.state_receiver();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    if state != ConnectionState::Disconnected {
                        continue;
                    }
                    let Some(policy) = self.reconnect.clone() else {
                        warn!("Connection lost and no reconnect policy configured");
                        continue;
                    };
                    match self
                        .reconnect_with_backoff(&policy, &mut state_rx, &mut shutdown)
                        .await
                    {
                        Reconnect::Connected => {}
                        Reconnect::ShutdownRequested => break,
                        Reconnect::GaveUp(attempts) => {
                            outcome = Err(SessionError::ReconnectExhausted(attempts));
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await?;
        outcome
    }

    /// Retry `connect()` until the session stays up, the policy gives up or
    /// shutdown is requested
    ///
    /// A connection that is lost again before this returns counts as a failed
    /// attempt; losses after it returns are reported through `state_rx`.
    async fn reconnect_with_backoff<F>(
        &self,
        policy: &ReconnectPolicy,
        state_rx: &mut watch::Receiver<ConnectionState>,
        shutdown: &mut Pin<&mut F>,
    ) -> Reconnect
    where
        F: Future<Output = ()>,
    {
        let mut attempts = 0u32;
        while policy.allows_attempt(attempts) {
            attempts += 1;
            let delay = policy.calculate_backoff_delay(attempts);
            let max_display = policy
                .max_attempts
                .map_or("∞".to_string(), |max| max.to_string());
            info!(
                "Attempting reconnection {}/{} after {}ms delay",
                attempts,
                max_display,
                delay.as_millis()
            );

            tokio::select! {
                _ = shutdown.as_mut() => {
                    info!("Shutdown requested during reconnection delay");
                    return Reconnect::ShutdownRequested;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.manager.connect().await {
                Ok(_) => {
                    // Mark seen before reading, so a later loss still wakes run_until
                    state_rx.borrow_and_update();
                    if self.manager.state() == ConnectionState::Disconnected {
                        warn!(attempt = attempts, "Connection lost right after reconnecting");
                        continue;
                    }
                    info!(attempts, "Reconnected to MQTT broker");
                    return Reconnect::Connected;
                }
                Err(e) => warn!(attempt = attempts, error = %e, "Reconnection attempt failed"),
            }
        }

        error!(attempts, "Reconnection attempts exhausted");
        Reconnect::GaveUp(attempts)
    }

    /// Stop the publisher, then disconnect gracefully
    ///
    /// Returns the number of publisher ticks. Safe to call more than once.
    pub async fn shutdown(&mut self) -> SessionResult<u64> {
        info!("Shutting down MQTT session");
        let mut ticks = 0;

        if let Some(stop_tx) = self.publisher_stop.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.publisher_handle.take() {
            match handle.await {
                Ok(count) => ticks = count,
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!("Publisher shutdown error: {}", e);
                    return Err(SessionError::Task(e));
                }
            }
        }

        if let Err(e) = self.manager.disconnect(true).await {
            warn!(error = %e, "Graceful disconnect did not complete cleanly");
        }

        info!(ticks, "MQTT session shutdown complete");
        Ok(ticks)
    }
}

enum Reconnect {
    Connected,
    ShutdownRequested,
    GaveUp(u32),
}
