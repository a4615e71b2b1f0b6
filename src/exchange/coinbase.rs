//! Coinbase Pro (Coinbase Exchange) adapter. Its public feed is
//! incremental (`level2` channel: `snapshot` then `l2update` diffs), so this
//! adapter keeps a small per-symbol full-depth map and reduces it to a
//! top-N `Book` on every update — the "adapter is responsible for
//! reducing...to a full top-N snapshot" rule in spec §3 applies directly
//! here, unlike Binance/OKX/Kraken which already publish top-N snapshots.

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

use super::ws_common::{rest_client, Backoff};

const WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const REST_BASE: &str = "https://api.exchange.coinbase.com";
const REST_PAGE_LIMIT: u32 = 300;

#[derive(Debug)]
enum WsCommand {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Default)]
struct SideBook {
    // keyed by the exchange's own price-string spelling to avoid float
    // hashing pitfalls; rebuilt/sorted numerically on every read.
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

#[derive(Default)]
struct SymbolBook {
    bids: SideBook,
    asks: SideBook,
}

pub struct CoinbaseAdapter {
    cmd_tx: mpsc::Sender<WsCommand>,
    update_tx: broadcast::Sender<BookUpdate>,
    http: reqwest::Client,
    reconnect_cap: Duration,
    books: Arc<Mutex<HashMap<String, SymbolBook>>>,
}

impl CoinbaseAdapter {
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
                warn!(error = %e, "coinbase ws worker exited");
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
                    warn!(error = %e, "coinbase ws disconnected; reconnecting");
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
            let ids: Vec<_> = desired.iter().cloned().collect();
            let sub = serde_json::json!({
                "type": "subscribe",
                "product_ids": ids,
                "channels": ["level2"],
            });
            write.send(Message::Text(sub.to_string())).await?;
        }

        let mut ping = interval(Duration::from_secs(25));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let _ = write.send(Message::Text(r#"{"type":"heartbeat"}"#.to_string())).await;
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()) };
                    match cmd {
                        WsCommand::Subscribe(sym) => {
                            if desired.insert(sym.clone()) {
                                let msg = serde_json::json!({
                                    "type": "subscribe",
                                    "product_ids": [sym],
                                    "channels": ["level2"],
                                });
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                        WsCommand::Unsubscribe(sym) => {
                            if desired.remove(&sym) {
                                let msg = serde_json::json!({
                                    "type": "unsubscribe",
                                    "product_ids": [sym],
                                    "channels": ["level2"],
                                });
                                let _ = write.send(Message::Text(msg.to_string())).await;
                                self.books.lock().remove(&sym);
                            }
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Err(anyhow::anyhow!("coinbase ws stream ended"));
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_text_message(&text),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "coinbase ws close");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow::anyhow!("coinbase ws error: {e}")),
                    }
                }
            }
        }
    }

    fn emit(&self, native_symbol: &str) {
        let books = self.books.lock();
        let Some(sb) = books.get(native_symbol) else {
            return;
        };
        let book = build_book(sb.bids.to_levels(), sb.asks.to_levels());
        let _ = self.update_tx.send(BookUpdate {
            native_symbol: native_symbol.to_string(),
            book,
        });
    }

    fn handle_text_message(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return;
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("snapshot") => {
                let Ok(msg) = serde_json::from_value::<SnapshotMessage>(value) else {
                    return;
                };
                let mut books = self.books.lock();
                let entry = books.entry(msg.product_id.clone()).or_default();
                entry.bids = SideBook::default();
                entry.asks = SideBook::default();
                for [price, qty] in &msg.bids {
                    if let Ok(q) = qty.parse::<f64>() {
                        entry.bids.apply(price, q);
                    }
                }
                for [price, qty] in &msg.asks {
                    if let Ok(q) = qty.parse::<f64>() {
                        entry.asks.apply(price, q);
                    }
                }
                drop(books);
                self.emit(&msg.product_id);
            }
            Some("l2update") => {
                let Ok(msg) = serde_json::from_value::<L2UpdateMessage>(value) else {
                    return;
                };
                {
                    let mut books = self.books.lock();
                    let entry = books.entry(msg.product_id.clone()).or_default();
                    for change in &msg.changes {
                        if change.len() != 3 {
                            continue;
                        }
                        let Ok(qty) = change[2].parse::<f64>() else {
                            continue;
                        };
                        match change[0].as_str() {
                            "buy" => entry.bids.apply(&change[1], qty),
                            "sell" => entry.asks.apply(&change[1], qty),
                            _ => {}
                        }
                    }
                }
                self.emit(&msg.product_id);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotMessage {
    product_id: String,
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct L2UpdateMessage {
    product_id: String,
    #[serde(default)]
    changes: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CbProductInfo {
    id: String,
    status: String,
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::CoinbasePro
    }

    async fn list_symbols(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{REST_BASE}/products");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        let products: Vec<CbProductInfo> = resp
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(products
            .into_iter()
            .filter(|p| p.status == "online")
            .map(|p| p.id)
            .collect())
    }

    async fn fetch_candles(
        &self,
        native_symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, GatewayError> {
        let granularity = parse_granularity_secs(interval)
            .ok_or_else(|| GatewayError::UnsupportedInterval(interval.to_string()))?;

        let mut out = Vec::new();
        let page_span_ms = i64::from(REST_PAGE_LIMIT) * granularity * 1000;
        let mut cursor = start_ms;

        while cursor < end_ms {
            let page_end = (cursor + page_span_ms).min(end_ms);
            let url = format!("{REST_BASE}/products/{native_symbol}/candles");
            let resp = self
                .http
                .get(&url)
                .query(&[
                    ("start", ms_to_rfc3339(cursor)),
                    ("end", ms_to_rfc3339(page_end)),
                    ("granularity", granularity.to_string()),
                ])
                .send()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            if resp.status().as_u16() == 400 {
                return Err(GatewayError::UnsupportedInterval(interval.to_string()));
            }

            let rows: Vec<[f64; 6]> = resp
                .json()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            for row in &rows {
                let candle = Candle {
                    timestamp_ms: (row[0] as i64) * 1000,
                    open: row[3],
                    high: row[2],
                    low: row[1],
                    close: row[4],
                    volume: row[5],
                };
                if candle.timestamp_ms >= start_ms && candle.timestamp_ms < end_ms {
                    out.push(candle);
                }
            }

            cursor = page_end;
            if cursor < end_ms {
                sleep(Duration::from_millis(350)).await;
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

fn parse_granularity_secs(interval: &str) -> Option<i64> {
    match interval {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "1h" => Some(3600),
        "6h" => Some(21600),
        "1d" => Some(86400),
        _ => None,
    }
}

fn ms_to_rfc3339(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339()
}
