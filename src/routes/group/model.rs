// 群组相关的数据库操作与数据结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;

pub const ROLE_HOST: &str = "HOST";
pub const ROLE_COMPANION: &str = "COMPANION";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Group {
    pub group_id: i64,
    pub name: String,
    pub host_id: i64,
    pub group_thumbnail: Option<String>,
    pub finished: bool,
    pub schedule: bool,
    pub created_at: DateTime<Utc>,
}

/// 创建群组的请求
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    /// 群组名称
    pub name: String,
}

/// 群组成员信息
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GroupMember {
    pub user_id: i64,
    pub nickname: String,
    pub profile_image: Option<String>,
    pub role: String,
}

impl Group {
    /// 创建群组
    ///
    /// 群组行和创建者的 HOST 成员行必须同一事务落库：
    /// 成员插入失败时整体回滚，不允许留下没有 HOST 的群组。
    pub async fn create(pool: &PgPool, name: &str, user_id: i64) -> Result<Group, AppError> {
        let mut tx = pool.begin().await?;

        let group_id: i64 =
            sqlx::query_scalar("INSERT INTO groups (name, host_id) VALUES ($1, $2) RETURNING group_id")
                .bind(name)
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(group_id)
            .bind(user_id)
            .bind(ROLE_HOST)
            .execute(&mut *tx)
            .await?;

        // 回读群组行，返回的就是已落库的状态
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT group_id, name, host_id, group_thumbnail, finished, schedule, created_at
            FROM groups
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Group {} created by user {}", group.group_id, user_id);
        Ok(group)
    }

    pub async fn find_by_id(pool: &PgPool, group_id: i64) -> Result<Option<Group>, AppError> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT group_id, name, host_id, group_thumbnail, finished, schedule, created_at
            FROM groups
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(pool)
        .await?;

        Ok(group)
    }

    /// 获取群组成员列表，HOST 在前，其余按加入时间
    pub async fn members(pool: &PgPool, group_id: i64) -> Result<Vec<GroupMember>, AppError> {
        let members = sqlx::query_as::<_, GroupMember>(
            r#"
            SELECT u.user_id, u.nickname, u.profile_image, gm.role
            FROM group_members gm
            JOIN users u ON gm.user_id = u.user_id
            WHERE gm.group_id = $1
            ORDER BY gm.role = 'HOST' DESC, gm.joined_at ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(members)
    }

    pub async fn is_member(pool: &PgPool, group_id: i64, user_id: i64) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members
                WHERE group_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// 事务内的成员检查，给多步变更用
    pub async fn is_member_tx(
        tx: &mut Transaction<'_, Postgres>,
        group_id: i64,
        user_id: i64,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members
                WHERE group_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    pub async fn role_of(
        pool: &PgPool,
        group_id: i64,
        user_id: i64,
    ) -> Result<Option<String>, AppError> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM group_members WHERE group_id = $1 AND user_id = $2")
                .bind(group_id)
                .bind(user_id)
                .fetch_optional(pool)
                .await?;

        Ok(role)
    }

    /// 生成邀请码，只有 HOST 可以发起
    pub async fn create_invite(
        pool: &PgPool,
        group_id: i64,
        user_id: i64,
    ) -> Result<String, AppError> {
        let role = Self::role_of(pool, group_id, user_id).await?;
        match role.as_deref() {
            Some(ROLE_HOST) => {}
            Some(_) => return Err(AppError::Forbidden("只有群主可以创建邀请".to_string())),
            None => return Err(AppError::Forbidden("不是该群组的成员".to_string())),
        }

        let invite_code = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO group_invites (group_id, invite_code, created_by) VALUES ($1, $2, $3)",
        )
        .bind(group_id)
        .bind(invite_code)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(invite_code.to_string())
    }

    /// 更新群组缩略图引用（上传本身由外部对象存储完成）
    pub async fn update_thumbnail(
        pool: &PgPool,
        group_id: i64,
        thumbnail_url: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE groups SET group_thumbnail = $1 WHERE group_id = $2")
            .bind(thumbnail_url)
            .bind(group_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("不存在的群组".to_string()));
        }

        Ok(())
    }
}
