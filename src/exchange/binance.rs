//! Binance spot adapter: combined partial-depth stream (`@depth10@100ms`)
//! plus REST `/api/v3/klines` for history. Wire shapes per Binance's public
//! spot API docs; connection/command-channel shape grounded on
//! `scrapers/polymarket_ws.rs::PolymarketMarketWsCache`.

use super::ws_common::{parse_level_pairs, rest_client, Backoff};
use super::{book::build_book, BookUpdate, ExchangeAdapter};
use crate::error::GatewayError;
use crate::models::{Candle, ExchangeId};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

// The combined-stream endpoint wraps every payload as `{"stream": "...", "data": {...}}`,
// which is what lets us recover the symbol for a depth-stream payload (the
// raw per-symbol endpoint's depth payload carries no symbol field at all).
const WS_BASE: &str = "wss://stream.binance.com:9443/stream";
const REST_BASE: &str = "https://api.binance.com";
const REST_PAGE_LIMIT: u32 = 1000;

#[derive(Debug)]
enum WsCommand {
    Subscribe(String),
    Unsubscribe(String),
}

pub struct BinanceAdapter {
    cmd_tx: mpsc::Sender<WsCommand>,
    update_tx: broadcast::Sender<BookUpdate>,
    http: reqwest::Client,
    reconnect_cap: Duration,
}

impl BinanceAdapter {
    pub fn spawn(rest_timeout: Duration, reconnect_cap: Duration) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(1024);
        let (update_tx, _) = broadcast::channel(4096);
        let adapter = Arc::new(Self {
            cmd_tx,
            update_tx,
            http: rest_client(rest_timeout),
            reconnect_cap,
        });

        let worker = adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.run(cmd_rx).await {
                warn!(error = %e, "binance ws worker exited");
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
                    warn!(error = %e, "binance ws disconnected; reconnecting");
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
        let (ws_stream, _) = connect_async(WS_BASE).await?;
        let (mut write, mut read) = ws_stream.split();

        let streams: Vec<String> = desired
            .iter()
            .map(|s| format!("{}@depth10@100ms", s.to_lowercase()))
            .collect();
        if !streams.is_empty() {
            let sub = serde_json::json!({"method": "SUBSCRIBE", "params": streams, "id": 1});
            write.send(Message::Text(sub.to_string())).await?;
        }

        let mut ping = interval(Duration::from_secs(20));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let _ = write.send(Message::Ping(Vec::new())).await;
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()) };
                    match cmd {
                        WsCommand::Subscribe(sym) => {
                            if desired.insert(sym.clone()) {
                                let stream = format!("{}@depth10@100ms", sym.to_lowercase());
                                let msg = serde_json::json!({"method": "SUBSCRIBE", "params": [stream], "id": 2});
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                        WsCommand::Unsubscribe(sym) => {
                            if desired.remove(&sym) {
                                let stream = format!("{}@depth10@100ms", sym.to_lowercase());
                                let msg = serde_json::json!({"method": "UNSUBSCRIBE", "params": [stream], "id": 3});
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Err(anyhow::anyhow!("binance ws stream ended"));
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_text_message(&text),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "binance ws close");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow::anyhow!("binance ws error: {e}")),
                    }
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<DepthMessage>(text) else {
            return;
        };
        let Some(native_symbol) = msg.symbol() else {
            return;
        };
        let Some(data) = &msg.data else {
            return;
        };
        let bids = parse_level_pairs(&data.bids);
        let asks = parse_level_pairs(&data.asks);
        let book = build_book(bids, asks);
        let _ = self.update_tx.send(BookUpdate { native_symbol, book });
    }
}

/// Combined-stream depth frames carry `{"stream": "...", "data": {...}}`;
/// direct single-stream frames are the payload itself. The partial-depth
/// payload itself has no symbol field, so the combined wrapper is required
/// to recover it; we subscribe only via the combined form's `stream` name.
#[derive(Debug, Deserialize)]
struct DepthMessage {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    data: Option<DepthPayload>,
}

#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

impl DepthMessage {
    fn symbol(&self) -> Option<String> {
        // e.g. "btcusdt@depth10@100ms" -> "BTCUSDT"
        let name = self.stream.as_deref()?;
        name.split('@').next().map(|s| s.to_uppercase())
    }
}

#[derive(Debug, Deserialize)]
struct BinanceSymbolInfo {
    symbol: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<BinanceSymbolInfo>,
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn list_symbols(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{REST_BASE}/api/v3/exchangeInfo");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        let info: ExchangeInfoResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect())
    }

    async fn fetch_candles(
        &self,
        native_symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, GatewayError> {
        let mut out = Vec::new();
        let mut cursor = start_ms;

        while cursor < end_ms {
            let url = format!("{REST_BASE}/api/v3/klines");
            let resp = self
                .http
                .get(&url)
                .query(&[
                    ("symbol", native_symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("startTime", cursor.to_string()),
                    ("endTime", end_ms.to_string()),
                    ("limit", REST_PAGE_LIMIT.to_string()),
                ])
                .send()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            if resp.status().as_u16() == 400 {
                return Err(GatewayError::UnsupportedInterval(interval.to_string()));
            }

            let rows: Vec<Vec<serde_json::Value>> = resp
                .json()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            if rows.is_empty() {
                break;
            }

            let page_len = rows.len();
            for row in &rows {
                if let Some(candle) = parse_kline_row(row) {
                    if candle.timestamp_ms >= start_ms && candle.timestamp_ms < end_ms {
                        out.push(candle);
                    }
                }
            }

            let last_open_time = rows
                .last()
                .and_then(|r| r.first())
                .and_then(|v| v.as_i64())
                .unwrap_or(cursor);
            cursor = last_open_time + 1;

            if (page_len as u32) < REST_PAGE_LIMIT {
                break;
            }

            sleep(Duration::from_millis(150)).await;
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

fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    Some(Candle {
        timestamp_ms: row.first()?.as_i64()?,
        open: row.get(1)?.as_str()?.parse().ok()?,
        high: row.get(2)?.as_str()?.parse().ok()?,
        low: row.get(3)?.as_str()?.parse().ok()?,
        close: row.get(4)?.as_str()?.parse().ok()?,
        volume: row.get(5)?.as_str()?.parse().ok()?,
    })
}
