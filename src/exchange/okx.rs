//! OKX public adapter: `books5` channel over `/ws/v5/public`, REST
//! `/api/v5/market/history-candles` for history. Wire shapes per OKX's
//! public v5 API docs; connection/command-channel shape grounded on
//! `scrapers/polymarket_ws.rs::PolymarketMarketWsCache`.

use super::ws_common::{parse_level_rows, rest_client, Backoff};
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

const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const REST_BASE: &str = "https://www.okx.com";
const REST_PAGE_LIMIT: u32 = 300;

#[derive(Debug)]
enum WsCommand {
    Subscribe(String),
    Unsubscribe(String),
}

pub struct OkxAdapter {
    cmd_tx: mpsc::Sender<WsCommand>,
    update_tx: broadcast::Sender<BookUpdate>,
    http: reqwest::Client,
    reconnect_cap: Duration,
}

impl OkxAdapter {
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
                warn!(error = %e, "okx ws worker exited");
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
                    warn!(error = %e, "okx ws disconnected; reconnecting");
                    sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    fn sub_arg(inst_id: &str) -> serde_json::Value {
        serde_json::json!({"channel": "books5", "instId": inst_id})
    }

    async fn connect_and_stream(
        &self,
        cmd_rx: &mut mpsc::Receiver<WsCommand>,
        desired: &mut HashSet<String>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        if !desired.is_empty() {
            let args: Vec<_> = desired.iter().map(|s| Self::sub_arg(s)).collect();
            let sub = serde_json::json!({"op": "subscribe", "args": args});
            write.send(Message::Text(sub.to_string())).await?;
        }

        let mut ping = interval(Duration::from_secs(20));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let _ = write.send(Message::Text("ping".to_string())).await;
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()) };
                    match cmd {
                        WsCommand::Subscribe(sym) => {
                            if desired.insert(sym.clone()) {
                                let msg = serde_json::json!({"op": "subscribe", "args": [Self::sub_arg(&sym)]});
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                        WsCommand::Unsubscribe(sym) => {
                            if desired.remove(&sym) {
                                let msg = serde_json::json!({"op": "unsubscribe", "args": [Self::sub_arg(&sym)]});
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Err(anyhow::anyhow!("okx ws stream ended"));
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_text_message(&text),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "okx ws close");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow::anyhow!("okx ws error: {e}")),
                    }
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str) {
        if text == "pong" {
            return;
        }
        let Ok(msg) = serde_json::from_str::<BooksMessage>(text) else {
            return;
        };
        let Some(arg) = msg.arg else { return };
        if arg.channel != "books5" {
            return;
        }
        for entry in msg.data {
            let bids = parse_level_rows(&entry.bids);
            let asks = parse_level_rows(&entry.asks);
            let book = build_book(bids, asks);
            let _ = self.update_tx.send(BookUpdate {
                native_symbol: arg.inst_id.clone(),
                book,
            });
        }
    }
}

#[derive(Debug, Deserialize)]
struct BooksMessage {
    #[serde(default)]
    arg: Option<BooksArg>,
    #[serde(default)]
    data: Vec<BooksData>,
}

#[derive(Debug, Deserialize)]
struct BooksArg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct BooksData {
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    data: Vec<InstrumentInfo>,
}

#[derive(Debug, Deserialize)]
struct InstrumentInfo {
    #[serde(rename = "instId")]
    inst_id: String,
    state: String,
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    async fn list_symbols(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{REST_BASE}/api/v5/public/instruments");
        let resp = self
            .http
            .get(&url)
            .query(&[("instType", "SPOT")])
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        let parsed: InstrumentsResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(parsed
            .data
            .into_iter()
            .filter(|i| i.state == "live")
            .map(|i| i.inst_id)
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
        let mut before = start_ms.to_string();

        loop {
            let url = format!("{REST_BASE}/api/v5/market/history-candles");
            let resp = self
                .http
                .get(&url)
                .query(&[
                    ("instId", native_symbol),
                    ("bar", interval),
                    ("after", end_ms.to_string().as_str()),
                    ("before", before.as_str()),
                    ("limit", REST_PAGE_LIMIT.to_string().as_str()),
                ])
                .send()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            let parsed: OkxCandlesResponse = resp
                .json()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            if parsed.code != "0" {
                return Err(GatewayError::UnsupportedInterval(interval.to_string()));
            }
            if parsed.data.is_empty() {
                break;
            }

            let page_len = parsed.data.len();
            let mut max_ts = before.parse::<i64>().unwrap_or(start_ms);
            for row in &parsed.data {
                if let Some(candle) = parse_okx_row(row) {
                    max_ts = max_ts.max(candle.timestamp_ms);
                    if candle.timestamp_ms >= start_ms && candle.timestamp_ms < end_ms {
                        out.push(candle);
                    }
                }
            }

            before = (max_ts + 1).to_string();

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

#[derive(Debug, Deserialize)]
struct OkxCandlesResponse {
    code: String,
    data: Vec<Vec<String>>,
}

fn parse_okx_row(row: &[String]) -> Option<Candle> {
    Some(Candle {
        timestamp_ms: row.first()?.parse().ok()?,
        open: row.get(1)?.parse().ok()?,
        high: row.get(2)?.parse().ok()?,
        low: row.get(3)?.parse().ok()?,
        close: row.get(4)?.parse().ok()?,
        volume: row.get(5)?.parse().ok()?,
    })
}
