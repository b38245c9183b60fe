// 已结束行程的历史查询，纯读

use serde::Serialize;
use sqlx::PgPool;

use crate::error::AppError;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TripHistory {
    pub group_id: i64,
    pub group_name: String,
    pub trip_id: i64,
    pub date: String,
    pub background_url: Option<String>,
}

pub struct History;

impl History {
    pub async fn finished_trips(pool: &PgPool, user_id: i64) -> Result<Vec<TripHistory>, AppError> {
        let histories = sqlx::query_as::<_, TripHistory>(
            r#"
            SELECT g.group_id, g.name AS group_name, t.trip_id, t.date, gb.background_url
            FROM groups g
            JOIN group_members gm ON g.group_id = gm.group_id
            JOIN trips t ON g.group_id = t.group_id
            LEFT JOIN group_backgrounds gb ON g.group_id = gb.group_id
            WHERE gm.user_id = $1 AND g.finished = TRUE
            ORDER BY t.date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(histories)
    }
}
