//! `/ws` streaming endpoint (C4 transport), grounded on the teacher's
//! websocket upgrade handlers over `axum::extract::ws`. Authenticates via
//! the `token` query parameter (spec §6), then wires an `hub::Session` to
//! the socket's split sender/receiver halves.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth::api::authorize_ws_token;
use crate::hub::{Session, SessionCommand};
use crate::models::ExchangeId;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: String,
}

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match authorize_ws_token(&state, &query.token).await {
        Ok(identity) => {
            debug!(client = %identity.username, "ws upgrade authorized");
            ws.on_upgrade(move |socket| handle_socket(socket, state))
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        symbol: String,
        exchanges: Option<Vec<String>>,
    },
    Unsubscribe {
        symbol: String,
        exchanges: Option<Vec<String>>,
    },
}

fn resolve_exchanges(requested: Option<Vec<String>>) -> Vec<ExchangeId> {
    match requested {
        None => ExchangeId::ALL.to_vec(),
        Some(names) => names.iter().filter_map(|n| ExchangeId::from_str(n)).collect(),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(32);

    let session = Session::new(state.aggregator.clone(), state.cache.clone(), state.ws_grace_period);
    let session_task = tokio::spawn(session.run(cmd_rx, outbound_tx));

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(cmd) = parse_client_message(&text) {
                    if cmd_tx.send(cmd).await.is_err() {
                        break;
                    }
                } else {
                    debug!(frame = %text, "ignoring malformed ws client frame");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "ws read error");
                break;
            }
        }
    }

    drop(cmd_tx);
    session_task.abort();
    forward_task.abort();
}

fn parse_client_message(text: &str) -> Option<SessionCommand> {
    match serde_json::from_str::<ClientMessage>(text).ok()? {
        ClientMessage::Subscribe { symbol, exchanges } => Some(SessionCommand::Subscribe {
            symbol,
            exchanges: resolve_exchanges(exchanges),
        }),
        ClientMessage::Unsubscribe { symbol, exchanges } => Some(SessionCommand::Unsubscribe {
            symbol,
            exchanges: resolve_exchanges(exchanges),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_exchanges_defaults_to_all() {
        let resolved = resolve_exchanges(None);
        assert_eq!(resolved.len(), ExchangeId::ALL.len());
    }

    #[test]
    fn resolve_exchanges_filters_unknown_names() {
        let resolved = resolve_exchanges(Some(vec!["binance".to_string(), "bogus".to_string()]));
        assert_eq!(resolved, vec![ExchangeId::Binance]);
    }

    #[test]
    fn parse_client_message_handles_subscribe() {
        let cmd = parse_client_message(r#"{"action":"subscribe","symbol":"BTC-USDT","exchanges":["binance"]}"#);
        assert!(matches!(cmd, Some(SessionCommand::Subscribe { symbol, exchanges })
            if symbol == "BTC-USDT" && exchanges == vec![ExchangeId::Binance]));
    }

    #[test]
    fn parse_client_message_rejects_unknown_shape() {
        assert!(parse_client_message(r#"{"foo":"bar"}"#).is_none());
    }
}
