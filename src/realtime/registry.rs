// 连接注册表
//
// 进程内的 群组ID -> 在线用户集合 映射，只作为 UI 的在线提示。
// 它不是权威数据：持久化的成员关系一律以数据库为准，
// 进程重启后这里自然清空。

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<i64, HashSet<i64>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, group_id: i64, user_id: i64) {
        let mut inner = self.inner.write().await;
        inner.entry(group_id).or_default().insert(user_id);
    }

    /// 移除在线标记，返回是否真的有记录被移除
    pub async fn disconnect(&self, group_id: i64, user_id: i64) -> bool {
        let mut inner = self.inner.write().await;
        let Some(users) = inner.get_mut(&group_id) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            inner.remove(&group_id);
        }
        removed
    }

    /// 群组解散时整组清掉
    pub async fn drop_group(&self, group_id: i64) {
        self.inner.write().await.remove(&group_id);
    }

    pub async fn online_users(&self, group_id: i64) -> Vec<i64> {
        self.inner
            .read()
            .await
            .get(&group_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn online_count(&self, group_id: i64) -> usize {
        self.inner
            .read()
            .await
            .get(&group_id)
            .map(|users| users.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_disconnect_roundtrip() {
        let registry = ConnectionRegistry::new();
        registry.connect(1, 10).await;
        registry.connect(1, 11).await;

        assert_eq!(registry.online_count(1).await, 2);
        assert!(registry.disconnect(1, 10).await);
        assert!(!registry.disconnect(1, 10).await);
        assert_eq!(registry.online_users(1).await, vec![11]);
    }

    #[tokio::test]
    async fn empty_groups_are_pruned() {
        let registry = ConnectionRegistry::new();
        registry.connect(5, 20).await;
        registry.disconnect(5, 20).await;
        assert_eq!(registry.online_count(5).await, 0);
    }

    #[tokio::test]
    async fn drop_group_clears_everyone() {
        let registry = ConnectionRegistry::new();
        registry.connect(7, 1).await;
        registry.connect(7, 2).await;
        registry.drop_group(7).await;
        assert!(registry.online_users(7).await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_unknown_group_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.disconnect(99, 1).await);
    }
}
