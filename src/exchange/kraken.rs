//! Kraken adapter: public `book` subscription (depth 10, array-framed
//! messages) over `wss://ws.kraken.com`, REST `/0/public/OHLC` for history.
//! Kraken's `book` feed is incremental: an initial snapshot (`as`/`bs`)
//! followed by patches (`a`/`b`) that only carry the changed levels. This
//! adapter keeps a small per-symbol depth map and reduces it to a top-N
//! `Book` on every frame — the same pattern `coinbase.rs` uses for its
//! `level2` channel — rather than replacing the book wholesale per frame.

use super::ws_common::{rest_client, Backoff};
use super::{book::build_book, BookUpdate, ExchangeAdapter};
use crate::error::GatewayError;
use crate::models::{Candle, ExchangeId, PriceLevel};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const WS_URL: &str = "wss://ws.kraken.com";
const REST_BASE: &str = "https://api.kraken.com";

#[derive(Debug)]
enum WsCommand {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Default)]
struct SideBook {
    // keyed by Kraken's own price-string spelling to avoid float hashing
    // pitfalls; rebuilt/sorted numerically on every read.
    levels: HashMap<String, f64>,
}

impl SideBook {
    fn apply(&mut self, price: &str, qty: f64) {
        if qty <= 0.0 {
            self.levels.remove(price);
        } else {
            self.levels.insert(price.to_string(), qty);
        }
    }

    fn replace(&mut self, rows: &[Vec<String>]) {
        self.levels.clear();
        for row in rows {
            apply_row(self, row);
        }
    }

    fn to_levels(&self) -> Vec<PriceLevel> {
        self.levels
            .iter()
            .filter_map(|(p, q)| {
                p.parse::<f64>().ok().map(|price| PriceLevel {
                    price,
                    quantity: *q,
                })
            })
            .collect()
    }
}

fn apply_row(side: &mut SideBook, row: &[String]) {
    let Some(price) = row.first() else { return };
    let Some(qty) = row.get(1).and_then(|q| q.parse::<f64>().ok()) else {
        return;
    };
    side.apply(price, qty);
}

#[derive(Default)]
struct SymbolBook {
    bids: SideBook,
    asks: SideBook,
}

pub struct KrakenAdapter {
    cmd_tx: mpsc::Sender<WsCommand>,
    update_tx: broadcast::Sender<BookUpdate>,
    http: reqwest::Client,
    reconnect_cap: Duration,
    books: Arc<Mutex<HashMap<String, SymbolBook>>>,
}

impl KrakenAdapter {
    pub fn spawn(rest_timeout: Duration, reconnect_cap: Duration) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(1024);
        let (update_tx, _) = broadcast::channel(4096);
        let adapter = Arc::new(Self {
            cmd_tx,
            update_tx,
            http: rest_client(rest_timeout),
            reconnect_cap,
            books: Arc::new(Mutex::new(HashMap::new())),
        });

        let worker = adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.run(cmd_rx).await {
                warn!(error = %e, "kraken ws worker exited");
            }
        });

        adapter
    }

    async fn run(self: Arc<Self>, mut cmd_rx: mpsc::Receiver<WsCommand>) -> anyhow::Result<()> {
        let mut desired: HashSet<String> = HashSet::new();
        let mut backoff = Backoff::new(self.reconnect_cap);

        loop {
            while desired.is_empty() {
                match cmd_rx.recv().await {
                    Some(WsCommand::Subscribe(s)) => {
                        desired.insert(s);
                    }
                    Some(WsCommand::Unsubscribe(_)) => {}
                    None => return Ok(()),
                }
            }

            match self.connect_and_stream(&mut cmd_rx, &mut desired).await {
                Ok(()) => backoff.reset(),
                Err(e) => {
                    warn!(error = %e, "kraken ws disconnected; reconnecting");
                    sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        cmd_rx: &mut mpsc::Receiver<WsCommand>,
        desired: &mut HashSet<String>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        // Fresh connection, fresh per-symbol depth state.
        self.books.lock().clear();

        if !desired.is_empty() {
            let pairs: Vec<_> = desired.iter().cloned().collect();
            let sub = serde_json::json!({
                "event": "subscribe",
                "pair": pairs,
                "subscription": {"name": "book", "depth": 10},
            });
            write.send(Message::Text(sub.to_string())).await?;
        }

        let mut ping = interval(Duration::from_secs(20));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let _ = write.send(Message::Text(r#"{"event":"ping"}"#.to_string())).await;
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()) };
                    match cmd {
                        WsCommand::Subscribe(pair) => {
                            if desired.insert(pair.clone()) {
                                let msg = serde_json::json!({
                                    "event": "subscribe",
                                    "pair": [pair],
                                    "subscription": {"name": "book", "depth": 10},
                                });
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                        WsCommand::Unsubscribe(pair) => {
                            if desired.remove(&pair) {
                                let msg = serde_json::json!({
                                    "event": "unsubscribe",
                                    "pair": [pair],
                                    "subscription": {"name": "book", "depth": 10},
                                });
                                let _ = write.send(Message::Text(msg.to_string())).await;
                                self.books.lock().remove(&pair);
                            }
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Err(anyhow::anyhow!("kraken ws stream ended"));
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_text_message(&text),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "kraken ws close");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow::anyhow!("kraken ws error: {e}")),
                    }
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return;
        };
        // Event frames (heartbeat/systemStatus/subscriptionStatus/pong) are objects.
        if value.is_object() {
            return;
        }

        let Some(arr) = value.as_array() else { return };
        if arr.len() < 4 {
            return;
        }
        let pair = arr.last().and_then(|v| v.as_str()).unwrap_or("").to_string();
        if pair.is_empty() {
            return;
        }

        let mut books = self.books.lock();
        let entry = books.entry(pair.clone()).or_default();

        // Depth-10 snapshot payload is a single object at index 1 with
        // "as"/"bs" (full replace); update payloads can carry one or two
        // book-side objects across indices 1..arr.len()-2, each with "a"/"b"
        // (incremental patch — zero quantity removes the level).
        for item in &arr[1..arr.len() - 2] {
            let Some(obj) = item.as_object() else { continue };
            if let Some(rows) = obj.get("as").and_then(|v| v.as_array()) {
                entry.asks.replace(&rows_to_string_vecs(rows));
            }
            if let Some(rows) = obj.get("bs").and_then(|v| v.as_array()) {
                entry.bids.replace(&rows_to_string_vecs(rows));
            }
            if let Some(rows) = obj.get("a").and_then(|v| v.as_array()) {
                for row in rows_to_string_vecs(rows) {
                    apply_row(&mut entry.asks, &row);
                }
            }
            if let Some(rows) = obj.get("b").and_then(|v| v.as_array()) {
                for row in rows_to_string_vecs(rows) {
                    apply_row(&mut entry.bids, &row);
                }
            }
        }

        let book = build_book(entry.bids.to_levels(), entry.asks.to_levels());
        drop(books);
        let _ = self.update_tx.send(BookUpdate {
            native_symbol: pair,
            book,
        });
    }
}

fn rows_to_string_vecs(rows: &[serde_json::Value]) -> Vec<Vec<String>> {
    rows.iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(
                row.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect(),
            )
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct KrakenAssetPairsResponse {
    result: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct KrakenOhlcResponse {
    error: Vec<String>,
    result: std::collections::HashMap<String, serde_json::Value>,
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Kraken
    }

    async fn list_symbols(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{REST_BASE}/0/public/AssetPairs");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        let parsed: KrakenAssetPairsResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(parsed
            .result
            .values()
            .filter_map(|v| v.get("wsname").and_then(|w| w.as_str()).map(String::from))
            .collect())
    }

    async fn fetch_candles(
        &self,
        native_symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, GatewayError> {
        let minutes = parse_interval_minutes(interval)
            .ok_or_else(|| GatewayError::UnsupportedInterval(interval.to_string()))?;

        let url = format!("{REST_BASE}/0/public/OHLC");
        let pair = native_symbol.replace('/', "");
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("pair", pair.as_str()),
                ("interval", minutes.to_string().as_str()),
                ("since", (start_ms / 1000).to_string().as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let parsed: KrakenOhlcResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if !parsed.error.is_empty() {
            return Err(GatewayError::UnsupportedInterval(interval.to_string()));
        }

        let rows = parsed
            .result
            .iter()
            .find(|(k, _)| *k != "last")
            .map(|(_, v)| v.clone())
            .unwrap_or(serde_json::Value::Null);

        let mut out = Vec::new();
        if let Some(rows) = rows.as_array() {
            for row in rows {
                if let Some(candle) = parse_kraken_row(row) {
                    if candle.timestamp_ms >= start_ms && candle.timestamp_ms < end_ms {
                        out.push(candle);
                    }
                }
            }
        }

        out.sort_by_key(|c| c.timestamp_ms);
        out.dedup_by_key(|c| c.timestamp_ms);
        Ok(out)
    }

    fn request_subscribe(&self, native_symbol: &str) {
        let _ = self
            .cmd_tx
            .try_send(WsCommand::Subscribe(native_symbol.to_string()));
    }

    fn request_unsubscribe(&self, native_symbol: &str) {
        let _ = self
            .cmd_tx
            .try_send(WsCommand::Unsubscribe(native_symbol.to_string()));
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<BookUpdate> {
        self.update_tx.subscribe()
    }
}

fn parse_interval_minutes(interval: &str) -> Option<i64> {
    match interval {
        "1m" => Some(1),
        "5m" => Some(5),
        "15m" => Some(15),
        "1h" => Some(60),
        "4h" => Some(240),
        "1d" => Some(1440),
        _ => None,
    }
}

fn parse_kraken_row(row: &serde_json::Value) -> Option<Candle> {
    let row = row.as_array()?;
    Some(Candle {
        timestamp_ms: row.first()?.as_i64()? * 1000,
        open: row.get(1)?.as_str()?.parse().ok()?,
        high: row.get(2)?.as_str()?.parse().ok()?,
        low: row.get(3)?.as_str()?.parse().ok()?,
        close: row.get(4)?.as_str()?.parse().ok()?,
        volume: row.get(6)?.as_str()?.parse().ok()?,
    })
}
