// 房间广播
//
// 每个群组一条 tokio broadcast 通道，由 AppState 里唯一的 RoomHub
// 实例统一管理。广播只在事务提交之后发起，所以同一房间内事件的
// 到达顺序与提交顺序一致。投递是尽力而为：没有订阅者就丢弃，
// 不为掉线的客户端保留回放。

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::sync::broadcast;

use super::events::ServerEvent;

/// 单个房间通道的缓冲容量，写满时最慢的订阅者丢事件（Lagged）
const ROOM_CHANNEL_CAPACITY: usize = 256;

pub struct RoomHub {
    rooms: RwLock<HashMap<i64, broadcast::Sender<ServerEvent>>>,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomHub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// 订阅某个群组的房间，需要时建通道
    pub async fn join(&self, group_id: i64) -> broadcast::Receiver<ServerEvent> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(group_id)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 向房间内所有订阅者投递事件，返回收到的订阅者数量
    pub async fn broadcast(&self, group_id: i64, event: ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(sender) = rooms.get(&group_id) else {
            tracing::debug!("No room for group {}, event dropped", group_id);
            return 0;
        };

        match sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                // 没有存活的订阅者
                tracing::debug!("Room {} has no subscribers", group_id);
                0
            }
        }
    }

    /// 关闭房间：丢掉发送端，所有订阅者收到 Closed 后自行脱离
    pub async fn close(&self, group_id: i64) {
        if self.rooms.write().await.remove(&group_id).is_some() {
            tracing::info!("Room {} closed", group_id);
        }
    }

    /// 最后一个订阅者离开后回收空房间
    pub async fn prune_if_empty(&self, group_id: i64) {
        let mut rooms = self.rooms.write().await;
        if let Some(sender) = rooms.get(&group_id) {
            if sender.receiver_count() == 0 {
                rooms.remove(&group_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_left(group_id: i64, user_id: i64) -> ServerEvent {
        ServerEvent::MemberLeft {
            group_id,
            user_id,
            message: "成员已退出".to_string(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = RoomHub::new();
        let mut rx1 = hub.join(1).await;
        let mut rx2 = hub.join(1).await;

        let delivered = hub.broadcast(1, member_left(1, 42)).await;
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                ServerEvent::MemberLeft { user_id, .. } => assert_eq!(user_id, 42),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let hub = RoomHub::new();
        let mut rx = hub.join(2).await;

        for user_id in [1, 2, 3] {
            hub.broadcast(2, member_left(2, user_id)).await;
        }

        for expected in [1, 2, 3] {
            match rx.recv().await.unwrap() {
                ServerEvent::MemberLeft { user_id, .. } => assert_eq!(user_id, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_is_dropped() {
        let hub = RoomHub::new();
        assert_eq!(hub.broadcast(9, member_left(9, 1)).await, 0);
    }

    #[tokio::test]
    async fn closing_room_detaches_subscribers() {
        let hub = RoomHub::new();
        let mut rx = hub.join(3).await;
        hub.close(3).await;

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let hub = RoomHub::new();
        let mut rx_a = hub.join(10).await;
        let _rx_b = hub.join(11).await;

        hub.broadcast(11, member_left(11, 5)).await;

        // 房间10的订阅者不应收到房间11的事件
        assert!(matches!(
            rx_a.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn prune_removes_abandoned_rooms() {
        let hub = RoomHub::new();
        {
            let _rx = hub.join(4).await;
        }
        hub.prune_if_empty(4).await;
        assert_eq!(hub.broadcast(4, member_left(4, 1)).await, 0);
    }
}
