// 日程协调的数据库操作
//
// 替换日程永远是同一事务里的先删后插，不做局部 UPDATE，
// 重放同一区间也只会留下一行。

use sqlx::PgPool;

use super::events::{CalendarData, DateRange};
use crate::error::AppError;
use crate::routes::group::model::Group;

/// 设置（替换）调用者在某群组的日程区间，返回带昵称的合并结果
pub async fn set_calendar(
    pool: &PgPool,
    group_id: i64,
    user_id: i64,
    range: &DateRange,
) -> Result<CalendarData, AppError> {
    let mut tx = pool.begin().await?;

    let is_member = Group::is_member_tx(&mut tx, group_id, user_id).await?;
    if !is_member {
        return Err(AppError::Forbidden("不是该群组的成员".to_string()));
    }

    sqlx::query("DELETE FROM group_calendars WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO group_calendars (group_id, user_id, start_date, end_date) VALUES ($1, $2, $3, $4)",
    )
    .bind(group_id)
    .bind(user_id)
    .bind(range.start)
    .bind(range.end)
    .execute(&mut *tx)
    .await?;

    let nickname: String = sqlx::query_scalar("SELECT nickname FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(CalendarData {
        user_id,
        nickname,
        date_range: range.clone(),
    })
}

/// 清除调用者的日程，返回是否真的删掉了一行
///
/// 没有记录时静默成功，调用方据此决定是否广播。
pub async fn clear_calendar(pool: &PgPool, group_id: i64, user_id: i64) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM group_calendars WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// 群组全部成员的日程，带昵称，纯读
pub async fn list_calendar(pool: &PgPool, group_id: i64) -> Result<Vec<CalendarData>, AppError> {
    #[derive(sqlx::FromRow)]
    struct CalendarRow {
        user_id: i64,
        nickname: String,
        start_date: chrono::NaiveDate,
        end_date: chrono::NaiveDate,
    }

    let rows = sqlx::query_as::<_, CalendarRow>(
        r#"
        SELECT gc.user_id, u.nickname, gc.start_date, gc.end_date
        FROM group_calendars gc
        JOIN users u ON gc.user_id = u.user_id
        WHERE gc.group_id = $1
        ORDER BY gc.start_date
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CalendarData {
            user_id: row.user_id,
            nickname: row.nickname,
            date_range: DateRange {
                start: row.start_date,
                end: row.end_date,
            },
        })
        .collect())
}
