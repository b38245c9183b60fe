// 行程与行程地点的数据库操作
//
// 地点更新走乐观并发：带版本号比对，命中冲突时报错而不是静默覆盖。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::db::retry::execute_with_retry;
use crate::error::AppError;
use crate::routes::group::model::Group;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Trip {
    pub trip_id: i64,
    pub group_id: i64,
    pub date: String,
    pub created_at: DateTime<Utc>,
}

/// 新建行程里的单个地点
#[derive(Debug, Deserialize)]
pub struct NewLocation {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub visit_time: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub hashtag: String,
    pub thumbnail: Option<String>,
}

/// 按天组织的地点清单
#[derive(Debug, Deserialize)]
pub struct TripDay {
    pub day: i32,
    #[serde(default)]
    pub destination: String,
    pub locations: Vec<NewLocation>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub group_id: i64,
    pub group_name: String,
    pub group_thumbnail: Option<String>,
    /// 形如 "start~end" 的日期区间
    pub date: String,
    pub days: Vec<TripDay>,
}

#[derive(Debug, Deserialize)]
pub struct AddLocationRequest {
    pub trip_id: i64,
    pub day: i32,
    #[serde(default)]
    pub destination: String,
    #[serde(flatten)]
    pub location: NewLocation,
}

/// 地点更新请求；expected_version 缺省时跳过冲突检测
#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub location_id: i64,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub visit_time: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub hashtag: String,
    pub thumbnail: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TripLocation {
    pub location_id: i64,
    pub trip_id: i64,
    pub day: i32,
    pub destination: String,
    pub name: String,
    pub address: String,
    pub visit_time: String,
    pub category: String,
    pub hashtag: String,
    pub thumbnail: Option<String>,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct TripDayDetails {
    pub day: i32,
    pub destination: String,
    pub locations: Vec<TripLocation>,
}

#[derive(Debug, Serialize)]
pub struct TripDetails {
    pub trip_id: i64,
    pub group_id: i64,
    pub date: String,
    pub group_name: String,
    pub group_thumbnail: Option<String>,
    pub days: Vec<TripDayDetails>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TripSummary {
    pub trip_id: i64,
    pub group_id: i64,
    pub date: String,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
}

/// 乐观版本比对：提供了期望版本且不等于当前版本时判为冲突
pub fn check_expected_version(current: i64, expected: Option<i64>) -> Result<(), AppError> {
    match expected {
        Some(v) if v != current => Err(AppError::Conflict(format!(
            "版本不匹配：期望 {}，当前 {}",
            v, current
        ))),
        _ => Ok(()),
    }
}

impl Trip {
    /// 创建行程
    ///
    /// 同一事务内：更新群组名称/缩略图并置 schedule 标记，插入行程行，
    /// 再逐天插入地点。
    pub async fn create(pool: &PgPool, req: &CreateTripRequest) -> Result<i64, AppError> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE groups SET name = $1, group_thumbnail = $2, schedule = TRUE WHERE group_id = $3",
        )
        .bind(&req.group_name)
        .bind(&req.group_thumbnail)
        .bind(req.group_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("不存在的群组".to_string()));
        }

        let trip_id: i64 =
            sqlx::query_scalar("INSERT INTO trips (group_id, date) VALUES ($1, $2) RETURNING trip_id")
                .bind(req.group_id)
                .bind(&req.date)
                .fetch_one(&mut *tx)
                .await?;

        for day in &req.days {
            for location in &day.locations {
                sqlx::query(
                    r#"
                    INSERT INTO trip_locations
                        (trip_id, day, destination, name, address, visit_time, category, hashtag, thumbnail)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(trip_id)
                .bind(day.day)
                .bind(&day.destination)
                .bind(&location.name)
                .bind(&location.address)
                .bind(&location.visit_time)
                .bind(&location.category)
                .bind(&location.hashtag)
                .bind(&location.thumbnail)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!("Trip {} created for group {}", trip_id, req.group_id);
        Ok(trip_id)
    }

    /// 行程详情，地点按 day 分组、按到访时间排序
    pub async fn details(pool: &PgPool, trip_id: i64) -> Result<TripDetails, AppError> {
        #[derive(sqlx::FromRow)]
        struct TripRow {
            trip_id: i64,
            group_id: i64,
            date: String,
            group_name: String,
            group_thumbnail: Option<String>,
        }

        let trip = sqlx::query_as::<_, TripRow>(
            r#"
            SELECT t.trip_id, t.group_id, t.date, g.name AS group_name, g.group_thumbnail
            FROM trips t
            JOIN groups g ON t.group_id = g.group_id
            WHERE t.trip_id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("不存在的行程".to_string()))?;

        let locations = sqlx::query_as::<_, TripLocation>(
            r#"
            SELECT location_id, trip_id, day, destination, name, address,
                   visit_time, category, hashtag, thumbnail, version
            FROM trip_locations
            WHERE trip_id = $1
            ORDER BY day, visit_time
            "#,
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        let mut days: BTreeMap<i32, TripDayDetails> = BTreeMap::new();
        for location in locations {
            days.entry(location.day)
                .or_insert_with(|| TripDayDetails {
                    day: location.day,
                    destination: location.destination.clone(),
                    locations: Vec::new(),
                })
                .locations
                .push(location);
        }

        Ok(TripDetails {
            trip_id: trip.trip_id,
            group_id: trip.group_id,
            date: trip.date,
            group_name: trip.group_name,
            group_thumbnail: trip.group_thumbnail,
            days: days.into_values().collect(),
        })
    }

    pub async fn for_user(pool: &PgPool, user_id: i64) -> Result<Vec<TripSummary>, AppError> {
        let trips = sqlx::query_as::<_, TripSummary>(
            r#"
            SELECT DISTINCT t.trip_id, t.group_id, t.date, g.name AS group_name, t.created_at
            FROM trips t
            JOIN groups g ON t.group_id = g.group_id
            JOIN group_members gm ON g.group_id = gm.group_id
            WHERE gm.user_id = $1
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(trips)
    }

    /// 最近一次尚未结束的行程
    pub async fn upcoming(pool: &PgPool, user_id: i64) -> Result<Option<TripSummary>, AppError> {
        let trip = sqlx::query_as::<_, TripSummary>(
            r#"
            SELECT t.trip_id, t.group_id, t.date, g.name AS group_name, t.created_at
            FROM trips t
            JOIN groups g ON t.group_id = g.group_id
            JOIN group_members gm ON g.group_id = gm.group_id
            WHERE gm.user_id = $1 AND g.finished = FALSE
            ORDER BY t.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(trip)
    }

    /// 已加入群组对应的行程ID
    pub async fn id_for_joined_group(
        pool: &PgPool,
        user_id: i64,
        group_id: i64,
    ) -> Result<i64, AppError> {
        if !Group::is_member(pool, group_id, user_id).await? {
            return Err(AppError::Forbidden("不是该群组的成员".to_string()));
        }

        let trip_id: Option<i64> = sqlx::query_scalar(
            "SELECT trip_id FROM trips WHERE group_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(group_id)
        .fetch_optional(pool)
        .await?;

        trip_id.ok_or_else(|| AppError::NotFound("该群组还没有行程".to_string()))
    }

    pub async fn add_location(pool: &PgPool, req: &AddLocationRequest) -> Result<i64, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM trips WHERE trip_id = $1)")
                .bind(req.trip_id)
                .fetch_one(pool)
                .await?;

        if !exists {
            return Err(AppError::NotFound("不存在的行程".to_string()));
        }

        let location_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO trip_locations
                (trip_id, day, destination, name, address, visit_time, category, hashtag, thumbnail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING location_id
            "#,
        )
        .bind(req.trip_id)
        .bind(req.day)
        .bind(&req.destination)
        .bind(&req.location.name)
        .bind(&req.location.address)
        .bind(&req.location.visit_time)
        .bind(&req.location.category)
        .bind(&req.location.hashtag)
        .bind(&req.location.thumbnail)
        .fetch_one(pool)
        .await?;

        Ok(location_id)
    }

    pub async fn delete_location(pool: &PgPool, location_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM trip_locations WHERE location_id = $1")
            .bind(location_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("不存在的地点".to_string()));
        }

        Ok(())
    }

    /// 更新行程地点（乐观并发）
    ///
    /// 锁读地点行后比对期望版本；更新语句里字段修改与 version + 1
    /// 是同一条语句，成功即意味着版本递增恰好一次。返回新版本号。
    pub async fn update_location(
        pool: &PgPool,
        config: &Config,
        user_id: i64,
        group_id: i64,
        req: &UpdateLocationRequest,
    ) -> Result<i64, AppError> {
        let policy = config.retry_policy();
        let lock_timeout = config.lock_wait_timeout();

        execute_with_retry(&policy, move || async move {
            let mut tx = db::begin_with_lock_timeout(pool, lock_timeout).await?;

            let is_member = Group::is_member_tx(&mut tx, group_id, user_id).await?;
            if !is_member {
                return Err(AppError::Forbidden("不是该群组的成员".to_string()));
            }

            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM trip_locations WHERE location_id = $1 FOR UPDATE",
            )
            .bind(req.location_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(current) = current else {
                return Err(AppError::NotFound("不存在的地点".to_string()));
            };

            check_expected_version(current, req.expected_version)?;

            let new_version: i64 = sqlx::query_scalar(
                r#"
                UPDATE trip_locations
                SET name = $1, address = $2, category = $3, hashtag = $4,
                    thumbnail = $5, visit_time = $6, version = version + 1
                WHERE location_id = $7
                RETURNING version
                "#,
            )
            .bind(&req.name)
            .bind(&req.address)
            .bind(&req.category)
            .bind(&req.hashtag)
            .bind(&req.thumbnail)
            .bind(&req.visit_time)
            .bind(req.location_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(new_version)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_check_passes_without_expectation() {
        assert!(check_expected_version(3, None).is_ok());
    }

    #[test]
    fn version_check_passes_on_match() {
        assert!(check_expected_version(3, Some(3)).is_ok());
    }

    #[test]
    fn version_check_rejects_stale_expectation() {
        let err = check_expected_version(3, Some(2)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
