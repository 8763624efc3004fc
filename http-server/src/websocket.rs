use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use crash_engine::types::{Account, Decision, GameEvent, RoundSnapshot, Transaction};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::AppState;
use crate::error::ServiceError;
use crate::service;

// Requests a client can send over the socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    Login {
        username: String,
    },
    PlaceBet {
        username: String,
        amount: f64,
    },
    CashOut {
        username: String,
        #[serde(rename = "winAmount")]
        win_amount: f64,
    },
    RequestDeposit {
        username: String,
        amount: f64,
        #[serde(rename = "ref")]
        external_ref: String,
    },
    RequestWithdraw {
        username: String,
        amount: f64,
        #[serde(rename = "ref")]
        external_ref: String,
    },
    GetHistory {
        username: String,
    },
    AdminGetPending {
        token: Option<String>,
    },
    AdminResolve {
        id: u64,
        decision: Decision,
        token: Option<String>,
    },
    AdminSetOverride {
        value: f64,
        token: Option<String>,
    },
}

impl InboundMessage {
    fn name(&self) -> &'static str {
        match self {
            InboundMessage::Login { .. } => "login",
            InboundMessage::PlaceBet { .. } => "place-bet",
            InboundMessage::CashOut { .. } => "cash-out",
            InboundMessage::RequestDeposit { .. } => "request-deposit",
            InboundMessage::RequestWithdraw { .. } => "request-withdraw",
            InboundMessage::GetHistory { .. } => "get-history",
            InboundMessage::AdminGetPending { .. } => "admin-get-pending",
            InboundMessage::AdminResolve { .. } => "admin-resolve",
            InboundMessage::AdminSetOverride { .. } => "admin-set-override",
        }
    }
}

// Replies sent only to the requesting connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Reply {
    Welcome {
        #[serde(flatten)]
        round: RoundSnapshot,
    },
    AuthSuccess {
        username: String,
        balance: f64,
    },
    BalanceUpdate {
        balance: f64,
    },
    UserHistory {
        transactions: Vec<Transaction>,
    },
    AdminPending {
        transactions: Vec<Transaction>,
    },
    Msg {
        message: String,
    },
    Error {
        request: &'static str,
        code: &'static str,
        message: String,
    },
}

impl From<Account> for Reply {
    fn from(account: Account) -> Self {
        Reply::AuthSuccess {
            username: account.username,
            balance: account.balance,
        }
    }
}

// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::info!("WebSocket connection established");

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Initial data: recent crashes and where the round stands
    send_event(
        &tx,
        &GameEvent::HistoryUpdate {
            sequence: service::crash_history(&state),
        },
    );
    send_reply(
        &tx,
        &Reply::Welcome {
            round: service::snapshot(&state),
        },
    );

    // Single writer for replies and broadcasts
    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                tracing::debug!("WebSocket send failed, closing writer");
                break;
            }
        }
    });

    // Forward the shared broadcast channel to this client
    let broadcast_task = {
        let tx = tx.clone();
        let mut broadcasts = BroadcastStream::new(state.events.subscribe());
        tokio::spawn(async move {
            while let Some(item) = broadcasts.next().await {
                match item {
                    Ok(event) => {
                        if !send_event(&tx, &event) {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "client lagging, broadcasts dropped");
                    }
                }
            }
        })
    };

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => handle_inbound(inbound, &state, &tx).await,
                Err(e) => {
                    tracing::warn!("Failed to parse WebSocket message: {}", e);
                    send_reply(
                        &tx,
                        &Reply::Error {
                            request: "unknown",
                            code: "INVALID_REQUEST",
                            message: e.to_string(),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    write_task.abort();
    broadcast_task.abort();
    tracing::info!("WebSocket connection closed");
}

pub(crate) async fn handle_inbound(
    inbound: InboundMessage,
    state: &AppState,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let request = inbound.name();
    let result = dispatch(inbound, state).await;

    let replies = match result {
        Ok(replies) => replies,
        Err(err) => {
            if err.is_quiet() {
                tracing::debug!(request, %err, "request rejected");
            } else {
                tracing::warn!(request, %err, "request failed");
            }
            let message = err.to_string();
            let mut replies = vec![Reply::Error {
                request,
                code: err.code(),
                message: message.clone(),
            }];
            // withdraw requesters also get the plain text notice
            if request == "request-withdraw" {
                replies.push(Reply::Msg { message });
            }
            replies
        }
    };

    for reply in &replies {
        send_reply(tx, reply);
    }
}

async fn dispatch(inbound: InboundMessage, state: &AppState) -> Result<Vec<Reply>, ServiceError> {
    let replies = match inbound {
        InboundMessage::Login { username } => {
            vec![service::login(state, &username).await?.into()]
        }
        InboundMessage::PlaceBet { username, amount } => {
            let balance = service::place_bet(state, &username, amount).await?;
            vec![Reply::BalanceUpdate { balance }]
        }
        InboundMessage::CashOut {
            username,
            win_amount,
        } => {
            let balance = service::cash_out(state, &username, win_amount).await?;
            vec![Reply::BalanceUpdate { balance }]
        }
        InboundMessage::RequestDeposit {
            username,
            amount,
            external_ref,
        } => {
            service::request_deposit(state, &username, amount, &external_ref).await?;
            vec![Reply::Msg {
                message: "Deposit request pending".to_string(),
            }]
        }
        InboundMessage::RequestWithdraw {
            username,
            amount,
            external_ref,
        } => {
            let (_, balance) =
                service::request_withdraw(state, &username, amount, &external_ref).await?;
            vec![
                Reply::BalanceUpdate { balance },
                Reply::Msg {
                    message: "Withdraw request pending".to_string(),
                },
            ]
        }
        InboundMessage::GetHistory { username } => {
            let transactions = service::user_history(state, &username).await?;
            vec![Reply::UserHistory { transactions }]
        }
        InboundMessage::AdminGetPending { token } => {
            service::authorize_admin(state, token.as_deref())?;
            vec![Reply::AdminPending {
                transactions: service::pending_transactions(state),
            }]
        }
        InboundMessage::AdminResolve {
            id,
            decision,
            token,
        } => {
            service::authorize_admin(state, token.as_deref())?;
            service::resolve_transaction(state, id, decision).await?;
            vec![Reply::AdminPending {
                transactions: service::pending_transactions(state),
            }]
        }
        InboundMessage::AdminSetOverride { value, token } => {
            service::authorize_admin(state, token.as_deref())?;
            service::set_override(state, value)?;
            vec![Reply::Msg {
                message: format!("Next round fixed at {value:.2}x"),
            }]
        }
    };
    Ok(replies)
}

fn send_reply(tx: &mpsc::UnboundedSender<Message>, reply: &Reply) -> bool {
    match serde_json::to_string(reply) {
        Ok(text) => tx.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize reply: {}", e);
            true
        }
    }
}

fn send_event(tx: &mpsc::UnboundedSender<Message>, event: &GameEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => tx.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
            true
        }
    }
}
