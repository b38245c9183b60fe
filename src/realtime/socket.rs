// WebSocket 连接的生命周期
//
// 每条连接拆成三部分：读循环（本任务）、唯一的写任务（把 mpsc
// 出站队列串行写进 sink）、以及每个已加入房间一个的转发任务
// （broadcast 接收端 -> 出站队列）。传输层断开只影响本地注册表，
// 不会改动持久化的成员关系——掉线不代表想退出。

use std::collections::HashMap;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::events::{ClientEvent, ServerEvent};
use super::handlers;
use crate::AppState;
use crate::error::AppError;
use crate::utils::verify_token;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// 一条连接在读循环侧持有的状态
pub struct ConnectionContext {
    /// 令牌里解析出来的调用者
    pub user_id: i64,
    /// 出站队列，写任务是唯一消费者
    pub out_tx: mpsc::UnboundedSender<ServerEvent>,
    /// 已加入的房间及其转发任务
    pub joined: HashMap<i64, JoinHandle<()>>,
}

impl ConnectionContext {
    /// 只发给当前连接（错误、应答都走这里）
    pub fn reply(&self, event: ServerEvent) {
        let _ = self.out_tx.send(event);
    }

    /// 脱离某个房间的转发
    pub fn detach(&mut self, group_id: i64) {
        if let Some(handle) = self.joined.remove(&group_id) {
            handle.abort();
        }
    }
}

#[axum::debug_handler]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match verify_token(&query.token, &state.config) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("WebSocket token rejected: {}", e);
            return AppError::Unauthorized("访问令牌无效或已过期".to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.user_id))
}

/// 把房间的 broadcast 接收端接到连接的出站队列上
pub fn spawn_forwarder(
    mut rx: broadcast::Receiver<ServerEvent>,
    out_tx: mpsc::UnboundedSender<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if out_tx.send(event).is_err() {
                        // 连接已经没了
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Slow realtime subscriber skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64) {
    tracing::info!("WebSocket connected: user {}", user_id);

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnectionContext {
        user_id,
        out_tx,
        joined: HashMap::new(),
    };

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("WebSocket read error for user {}: {}", user_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handlers::dispatch(&state, &mut ctx, event).await,
                Err(e) => {
                    tracing::debug!("Malformed realtime frame: {}", e);
                    ctx.reply(ServerEvent::Error {
                        message: "无法识别的消息格式".to_string(),
                    });
                }
            },
            Message::Close(_) => break,
            // Ping/Pong 由 axum 自动应答
            _ => {}
        }
    }

    // 传输断开：清理本地注册表并广播非权威的掉线提示，
    // 持久化的成员关系保持原样
    let groups: Vec<i64> = ctx.joined.keys().copied().collect();
    for group_id in groups {
        ctx.detach(group_id);
        if state.registry.disconnect(group_id, user_id).await {
            state
                .rooms
                .broadcast(
                    group_id,
                    ServerEvent::UserDisconnected {
                        user_id,
                        message: "用户连接已断开".to_string(),
                    },
                )
                .await;
        }
        state.rooms.prune_if_empty(group_id).await;
    }

    writer.abort();
    tracing::info!("WebSocket disconnected: user {}", user_id);
}
