// 账单与分摊的数据库操作
//
// 一次请求里的多条账单在同一事务内处理，要么全部成功要么全部回滚。
// 分摊是均摊：有成员列表就按人头各插一行，付款人那行直接标记已付；
// 没有成员列表表示个人消费，不产生分摊行。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::Config;
use crate::db;
use crate::db::retry::execute_with_retry;
use crate::error::AppError;
use crate::routes::trip::model::check_expected_version;

#[derive(Debug, Deserialize)]
pub struct PaymentData {
    pub trip_id: i64,
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// 总金额
    pub price: i64,
    /// 付款人
    pub pay: i64,
    pub date: NaiveDate,
    /// 参与分摊的成员；为空表示个人消费
    #[serde(default)]
    pub group: Vec<i64>,
}

/// 账单更新请求；未提供的字段保持原值
#[derive(Debug, Deserialize)]
pub struct PaymentUpdate {
    pub payment_id: i64,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub pay: Option<i64>,
    pub date: Option<NaiveDate>,
    pub expected_version: Option<i64>,
    /// 提供时整组替换原有分摊
    pub group: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PaymentRow {
    pub payment_id: i64,
    pub trip_id: i64,
    pub category: String,
    pub description: String,
    pub total_price: i64,
    pub paid_by: i64,
    pub date: NaiveDate,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShareRow {
    pub payment_id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub is_paid: bool,
}

#[derive(Debug, Serialize)]
pub struct PaymentWithShares {
    #[serde(flatten)]
    pub payment: PaymentRow,
    pub group: Vec<ShareRow>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PayerCandidate {
    pub user_id: i64,
    pub nickname: String,
    pub profile_image: Option<String>,
    #[sqlx(skip)]
    pub is_me: bool,
}

/// 均摊行构造：付款人自己的那份直接算已付
pub fn build_share_rows(members: &[i64], payer: i64) -> Vec<(i64, bool)> {
    members
        .iter()
        .map(|&user_id| (user_id, user_id == payer))
        .collect()
}

pub struct Payment;

impl Payment {
    /// 保存一批账单
    ///
    /// 每条账单：锁定所属行程行，插入账单（version 从 1 开始），
    /// 再插入分摊行。行程锁挡住并发的级联删除。
    pub async fn save_batch(
        pool: &PgPool,
        config: &Config,
        items: &[PaymentData],
    ) -> Result<Vec<i64>, AppError> {
        let policy = config.retry_policy();
        let lock_timeout = config.lock_wait_timeout();

        execute_with_retry(&policy, move || async move {
            let mut tx = db::begin_with_lock_timeout(pool, lock_timeout).await?;
            let mut payment_ids = Vec::with_capacity(items.len());

            for item in items {
                let trip: Option<i64> =
                    sqlx::query_scalar("SELECT trip_id FROM trips WHERE trip_id = $1 FOR UPDATE")
                        .bind(item.trip_id)
                        .fetch_optional(&mut *tx)
                        .await?;

                if trip.is_none() {
                    return Err(AppError::NotFound("不存在的行程".to_string()));
                }

                let payment_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO payments (trip_id, category, description, total_price, paid_by, date)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING payment_id
                    "#,
                )
                .bind(item.trip_id)
                .bind(&item.category)
                .bind(&item.description)
                .bind(item.price)
                .bind(item.pay)
                .bind(item.date)
                .fetch_one(&mut *tx)
                .await?;

                for (user_id, is_paid) in build_share_rows(&item.group, item.pay) {
                    sqlx::query(
                        "INSERT INTO payment_shares (payment_id, user_id, is_paid) VALUES ($1, $2, $3)",
                    )
                    .bind(payment_id)
                    .bind(user_id)
                    .bind(is_paid)
                    .execute(&mut *tx)
                    .await?;
                }

                payment_ids.push(payment_id);
            }

            tx.commit().await?;

            tracing::info!("Saved {} payments", payment_ids.len());
            Ok(payment_ids)
        })
        .await
    }

    /// 更新一批账单
    ///
    /// 每条：锁读账单行，比对期望版本，COALESCE 局部更新并递增版本；
    /// 提供了新的分摊列表时先删后插整组替换。
    pub async fn update_batch(
        pool: &PgPool,
        config: &Config,
        items: &[PaymentUpdate],
    ) -> Result<(), AppError> {
        let policy = config.retry_policy();
        let lock_timeout = config.lock_wait_timeout();

        execute_with_retry(&policy, move || async move {
            let mut tx = db::begin_with_lock_timeout(pool, lock_timeout).await?;

            for item in items {
                let row: Option<(i64, i64)> = sqlx::query_as(
                    "SELECT version, paid_by FROM payments WHERE payment_id = $1 FOR UPDATE",
                )
                .bind(item.payment_id)
                .fetch_optional(&mut *tx)
                .await?;

                let Some((current_version, stored_payer)) = row else {
                    return Err(AppError::NotFound("不存在的账单".to_string()));
                };

                check_expected_version(current_version, item.expected_version)?;

                sqlx::query(
                    r#"
                    UPDATE payments
                    SET category = COALESCE($1, category),
                        description = COALESCE($2, description),
                        total_price = COALESCE($3, total_price),
                        paid_by = COALESCE($4, paid_by),
                        date = COALESCE($5, date),
                        version = version + 1
                    WHERE payment_id = $6
                    "#,
                )
                .bind(&item.category)
                .bind(&item.description)
                .bind(item.price)
                .bind(item.pay)
                .bind(item.date)
                .bind(item.payment_id)
                .execute(&mut *tx)
                .await?;

                if let Some(group) = &item.group {
                    sqlx::query("DELETE FROM payment_shares WHERE payment_id = $1")
                        .bind(item.payment_id)
                        .execute(&mut *tx)
                        .await?;

                    let payer = item.pay.unwrap_or(stored_payer);
                    for (user_id, is_paid) in build_share_rows(group, payer) {
                        sqlx::query(
                            "INSERT INTO payment_shares (payment_id, user_id, is_paid) VALUES ($1, $2, $3)",
                        )
                        .bind(item.payment_id)
                        .bind(user_id)
                        .bind(is_paid)
                        .execute(&mut *tx)
                        .await?;
                    }
                }
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// 某行程下的全部账单，带各自的分摊成员
    pub async fn by_trip(pool: &PgPool, trip_id: i64) -> Result<Vec<PaymentWithShares>, AppError> {
        let payments = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT payment_id, trip_id, category, description, total_price, paid_by, date, version
            FROM payments
            WHERE trip_id = $1
            ORDER BY date DESC, payment_id DESC
            "#,
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        let shares = sqlx::query_as::<_, ShareRow>(
            r#"
            SELECT ps.payment_id, ps.user_id, u.nickname, ps.is_paid
            FROM payment_shares ps
            JOIN users u ON ps.user_id = u.user_id
            WHERE ps.payment_id IN (SELECT payment_id FROM payments WHERE trip_id = $1)
            "#,
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        let result = payments
            .into_iter()
            .map(|payment| {
                let group = shares
                    .iter()
                    .filter(|s| s.payment_id == payment.payment_id)
                    .cloned()
                    .collect();
                PaymentWithShares { payment, group }
            })
            .collect();

        Ok(result)
    }

    /// 记账界面的成员列表，标出哪一个是调用者自己
    pub async fn members_for_trip(
        pool: &PgPool,
        user_id: i64,
        trip_id: i64,
    ) -> Result<Vec<PayerCandidate>, AppError> {
        let mut members = sqlx::query_as::<_, PayerCandidate>(
            r#"
            SELECT u.user_id, u.nickname, u.profile_image
            FROM trips t
            JOIN group_members gm ON t.group_id = gm.group_id
            JOIN users u ON gm.user_id = u.user_id
            WHERE t.trip_id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        for member in &mut members {
            member.is_me = member.user_id == user_id;
        }

        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_among_three_marks_payer_paid() {
        let rows = build_share_rows(&[1, 2, 3], 2);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows, vec![(1, false), (2, true), (3, false)]);
    }

    #[test]
    fn personal_expense_creates_no_shares() {
        assert!(build_share_rows(&[], 7).is_empty());
    }

    #[test]
    fn payer_outside_share_list_marks_nobody_paid() {
        let rows = build_share_rows(&[1, 2], 9);
        assert!(rows.iter().all(|&(_, paid)| !paid));
    }
}
