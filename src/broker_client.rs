// =============================================================================
// Broker Client — single WebSocket ingest worker for synthetic-index ticks
// =============================================================================
//
// Generalizes the kline-stream reader's connect/parse/reconnect shape to a
// single multi-symbol tick feed: one socket, a subscribe frame per symbol,
// and a dedicated heartbeat task. Every transport failure is recoverable and
// silent to downstream consumers beyond log output and the monitoring
// counters exposed here; tick delivery is best-effort.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::event_bus::EventBus;
use crate::types::Tick;

/// Monitoring counters exposed for external observability, in lieu of
/// surfacing transport failures to downstream consumers.
#[derive(Debug, Default)]
pub struct BrokerCounters {
    pub ticks_received: AtomicU64,
    pub last_tick_epoch: AtomicI64,
    pub reconnect_attempts: AtomicU64,
    pub connected_since: AtomicI64,
}

pub struct BrokerClientConfig {
    pub ws_url: String,
    pub symbols: Vec<String>,
    pub reconnect_base_delay: f64,
    pub reconnect_max_delay: f64,
    pub heartbeat_interval: Duration,
}

pub struct BrokerClient {
    config: BrokerClientConfig,
    counters: Arc<BrokerCounters>,
    cancel: Arc<AtomicBool>,
}

impl BrokerClient {
    pub fn new(config: BrokerClientConfig) -> Self {
        Self {
            config,
            counters: Arc::new(BrokerCounters::default()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn counters(&self) -> Arc<BrokerCounters> {
        self.counters.clone()
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Signal cooperative shutdown; the read loop and heartbeat observe this
    /// at their next suspension point.
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Runs until cancelled. Reconnects on any transport error with
    /// exponential backoff plus jitter, resetting the attempt counter on a
    /// successful open.
    pub async fn run(&self, bus: Arc<EventBus>) {
        let mut attempt: u32 = 0;

        while !self.cancel.load(Ordering::SeqCst) {
            match self.connect_and_stream(&bus).await {
                Ok(()) => {
                    info!("broker stream ended cleanly; reconnecting");
                    attempt = 0;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "broker stream disconnected");
                    self.counters.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                    attempt = attempt.saturating_add(1);
                }
            }

            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            let delay = self.backoff_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
                _ = self.wait_for_cancel() => break,
            }
        }

        info!("broker client stopped");
    }

    fn backoff_delay(&self, attempt: u32) -> f64 {
        let base = self.config.reconnect_base_delay * 2f64.powi(attempt as i32);
        let capped = base.min(self.config.reconnect_max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..(0.3 * capped));
        capped + jitter
    }

    async fn wait_for_cancel(&self) {
        while !self.cancel.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn connect_and_stream(&self, bus: &Arc<EventBus>) -> anyhow::Result<()> {
        info!(url = %self.config.ws_url, "connecting to broker websocket");
        let (ws_stream, _response) = connect_async(&self.config.ws_url).await?;
        info!("broker websocket connected");
        self.counters.connected_since.store(now_epoch(), Ordering::Relaxed);

        let (write, mut read) = ws_stream.split();
        let write = Arc::new(AsyncMutex::new(write));

        for symbol in &self.config.symbols {
            let frame = serde_json::json!({ "ticks": symbol, "subscribe": 1 });
            write.lock().await.send(Message::Text(frame.to_string())).await?;
        }

        // A failed ping send is treated as a disconnect: the heartbeat task
        // flips this flag and the read loop below observes it at its next
        // suspension point rather than the task silently dying.
        let heartbeat_failed = Arc::new(AtomicBool::new(false));

        let heartbeat_interval = self.config.heartbeat_interval;
        let cancel = self.cancel.clone();
        let hb_write = write.clone();
        let hb_failed = heartbeat_failed.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                let ping = serde_json::json!({ "ping": 1 });
                if let Err(e) = hb_write.lock().await.send(Message::Text(ping.to_string())).await {
                    warn!(error = %e, "heartbeat ping failed, treating as disconnect");
                    hb_failed.store(true, Ordering::SeqCst);
                    return;
                }
                debug!("heartbeat ping sent");
            }
        });

        let result = loop {
            if self.cancel.load(Ordering::SeqCst) {
                break Ok(());
            }
            if heartbeat_failed.load(Ordering::SeqCst) {
                break Err(anyhow::anyhow!("heartbeat ping failed"));
            }
            // Race the next frame against a short poll so a heartbeat
            // failure is observed promptly even while the socket is idle,
            // not just the next time a frame happens to arrive.
            let next = tokio::select! {
                frame = read.next() => frame,
                _ = tokio::time::sleep(Duration::from_millis(500)) => continue,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    self.handle_frame(&text, bus);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    warn!("broker closed the connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "broker websocket read error");
                    break Err(anyhow::anyhow!(e));
                }
                None => break Ok(()),
            }
        };

        heartbeat.abort();
        result
    }

    fn handle_frame(&self, text: &str, bus: &Arc<EventBus>) {
        let parsed: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed broker frame, dropping");
                return;
            }
        };

        if let Some(err) = parsed.get("error") {
            error!(error = %err, "broker error envelope");
            return;
        }

        let Some(tick_val) = parsed.get("tick") else {
            debug!("non-tick frame ignored");
            return;
        };

        let tick: Tick = match serde_json::from_value(tick_val.clone()) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "malformed tick payload, dropping");
                return;
            }
        };

        self.counters.ticks_received.fetch_add(1, Ordering::Relaxed);
        self.counters.last_tick_epoch.store(tick.epoch, Ordering::Relaxed);

        let payload = serde_json::to_value(&tick).unwrap_or(Value::Null);
        bus.publish("tick", payload);
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BrokerClientConfig {
        BrokerClientConfig {
            ws_url: "wss://example.invalid/ws".into(),
            symbols: vec!["R_100".into()],
            reconnect_base_delay: 1.0,
            reconnect_max_delay: 60.0,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn backoff_delay_caps_at_max_delay() {
        let client = BrokerClient::new(config());
        let delay = client.backoff_delay(20);
        assert!(delay <= 60.0 * 1.3 + 0.001);
    }

    #[test]
    fn backoff_delay_grows_with_attempt_below_cap() {
        let client = BrokerClient::new(config());
        let d0 = client.backoff_delay(0);
        let d1 = client.backoff_delay(1);
        assert!(d1 >= d0);
    }

    #[test]
    fn handle_frame_publishes_valid_tick() {
        let client = BrokerClient::new(config());
        let bus = Arc::new(EventBus::new(10));
        let queue = bus.subscribe("tick", "test");
        let frame = serde_json::json!({ "tick": { "symbol": "R_100", "epoch": 100, "quote": 123.45 } });
        client.handle_frame(&frame.to_string(), &bus);
        assert_eq!(client.counters.ticks_received.load(Ordering::Relaxed), 1);
        assert!(queue.try_recv().is_some());
    }

    #[test]
    fn handle_frame_ignores_non_tick_frames() {
        let client = BrokerClient::new(config());
        let bus = Arc::new(EventBus::new(10));
        let queue = bus.subscribe("tick", "test");
        let frame = serde_json::json!({ "pong": 1 });
        client.handle_frame(&frame.to_string(), &bus);
        assert_eq!(client.counters.ticks_received.load(Ordering::Relaxed), 0);
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn handle_frame_logs_error_envelope_and_drops() {
        let client = BrokerClient::new(config());
        let bus = Arc::new(EventBus::new(10));
        let queue = bus.subscribe("tick", "test");
        let frame = serde_json::json!({ "error": { "code": 1, "message": "bad request" } });
        client.handle_frame(&frame.to_string(), &bus);
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn handle_frame_drops_malformed_json() {
        let client = BrokerClient::new(config());
        let bus = Arc::new(EventBus::new(10));
        client.handle_frame("not json", &bus);
        assert_eq!(client.counters.ticks_received.load(Ordering::Relaxed), 0);
    }
}
