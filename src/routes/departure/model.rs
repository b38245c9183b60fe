// 退出群组与级联删除
//
// 删除顺序是显式的子表在前、父表在后，不依赖外键级联，
// 换存储引擎时行为保持一致。

use sqlx::{PgPool, Postgres, Transaction};

use crate::config::Config;
use crate::db;
use crate::db::retry::execute_with_retry;
use crate::error::AppError;

pub struct GroupDeparture;

/// 退出的结果，决定之后广播什么事件
#[derive(Debug, PartialEq, Eq)]
pub enum DepartureOutcome {
    /// 只移除了本人的成员与日程数据
    MemberRemoved,
    /// 本人是最后一名成员，整个群组被级联删除
    GroupDeleted,
}

impl GroupDeparture {
    /// 通过行程ID退出群组
    ///
    /// trip 行上的 FOR UPDATE 锁串行化并发退出：两名成员同时退出时，
    /// 后提交的事务会看到前一个已经删掉的成员行，计数不会双双落入
    /// "我不是最后一个"的分支。
    pub async fn leave_by_trip(
        pool: &PgPool,
        config: &Config,
        trip_id: i64,
        user_id: i64,
    ) -> Result<DepartureOutcome, AppError> {
        let policy = config.retry_policy();
        let lock_timeout = config.lock_wait_timeout();

        execute_with_retry(&policy, move || async move {
            let mut tx = db::begin_with_lock_timeout(pool, lock_timeout).await?;

            let group_id: Option<i64> =
                sqlx::query_scalar("SELECT group_id FROM trips WHERE trip_id = $1 FOR UPDATE")
                    .bind(trip_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let Some(group_id) = group_id else {
                return Err(AppError::NotFound("不存在的行程".to_string()));
            };

            let is_member: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM group_members
                    WHERE group_id = $1 AND user_id = $2
                )
                "#,
            )
            .bind(group_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

            if !is_member {
                return Err(AppError::Forbidden("不是该群组的成员".to_string()));
            }

            let member_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = $1")
                    .bind(group_id)
                    .fetch_one(&mut *tx)
                    .await?;

            let outcome = if member_count == 1 {
                // 最后一名成员退出，群组整体消失
                Self::cascade_delete(&mut tx, group_id).await?;
                DepartureOutcome::GroupDeleted
            } else {
                Self::remove_member(&mut tx, group_id, user_id).await?;
                DepartureOutcome::MemberRemoved
            };

            tx.commit().await?;

            tracing::info!(
                "User {} left group {} via trip {}: {:?}",
                user_id,
                group_id,
                trip_id,
                outcome
            );
            Ok(outcome)
        })
        .await
    }

    /// 按群组ID删除整个群组（实时层的 HOST 退出 / 显式删除走这里）
    ///
    /// 群组行上的 FOR UPDATE 锁与退出路径互斥。
    pub async fn delete_group(
        pool: &PgPool,
        config: &Config,
        group_id: i64,
    ) -> Result<(), AppError> {
        let policy = config.retry_policy();
        let lock_timeout = config.lock_wait_timeout();

        execute_with_retry(&policy, move || async move {
            let mut tx = db::begin_with_lock_timeout(pool, lock_timeout).await?;

            let locked: Option<i64> =
                sqlx::query_scalar("SELECT group_id FROM groups WHERE group_id = $1 FOR UPDATE")
                    .bind(group_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            if locked.is_none() {
                return Err(AppError::NotFound("不存在的群组".to_string()));
            }

            Self::cascade_delete(&mut tx, group_id).await?;
            tx.commit().await?;

            tracing::info!("Group {} cascade-deleted", group_id);
            Ok(())
        })
        .await
    }

    /// 非最后一名成员退出：只删本人的成员行和日程行
    pub async fn remove_member(
        tx: &mut Transaction<'_, Postgres>,
        group_id: i64,
        user_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM group_calendars WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// 级联删除群组的所有关联数据
    ///
    /// 顺序：账单分摊 → 账单 → 行程地点 → 行程 → 邀请 → 背景图 →
    /// 日程 → 成员 → 群组本体。
    pub async fn cascade_delete(
        tx: &mut Transaction<'_, Postgres>,
        group_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            DELETE FROM payment_shares
            WHERE payment_id IN (
                SELECT payment_id FROM payments
                WHERE trip_id IN (SELECT trip_id FROM trips WHERE group_id = $1)
            )
            "#,
        )
        .bind(group_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM payments
            WHERE trip_id IN (SELECT trip_id FROM trips WHERE group_id = $1)
            "#,
        )
        .bind(group_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM trip_locations
            WHERE trip_id IN (SELECT trip_id FROM trips WHERE group_id = $1)
            "#,
        )
        .bind(group_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM trips WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM group_invites WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM group_backgrounds WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM group_calendars WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM group_members WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM groups WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}
