use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use realtime::{ConnectionRegistry, RoomHub};

pub mod common;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod realtime;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// 房间广播器，全进程唯一实例
    pub rooms: Arc<RoomHub>,
    /// 在线连接注册表，只作 UI 提示用
    pub registry: Arc<ConnectionRegistry>,
}
