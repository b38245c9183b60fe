// 消费分析
//
// 只读聚合：按类别和成员汇总实际分担金额。分析完成后把群组标记为
// finished，这是一条无条件更新，不参与事务设计。

use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::error::AppError;

const CATEGORY_COLORS: &[(&str, &str)] = &[
    ("酒", "#FF6B6B"),
    ("咖啡", "#4ECDC4"),
    ("小吃", "#FFB323"),
    ("饮品", "#95A5A6"),
    ("用餐", "#45B7D1"),
    ("交通", "#96C93D"),
    ("住宿", "#845EC2"),
    ("购物", "#FF9671"),
    ("文化", "#FFC75F"),
    ("其他", "#F9F871"),
];

const DEFAULT_COLOR: &str = "#95A5A6";

#[derive(Debug, Serialize)]
pub struct CategoryAnalysis {
    pub category: String,
    pub amount: i64,
    pub percentage: f64,
    pub count: u32,
    pub color: String,
}

#[derive(Debug, Serialize)]
pub struct MemberExpense {
    pub member_id: i64,
    pub nickname: String,
    pub paid_amount: i64,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct ExpenseAnalysis {
    pub total_expense: i64,
    pub category_breakdown: Vec<CategoryAnalysis>,
    pub member_expenses: Vec<MemberExpense>,
    pub insights: Vec<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct AnalysisRow {
    payment_id: i64,
    category: String,
    total_price: i64,
    paid_by: i64,
    payer_nickname: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AnalysisShareRow {
    payment_id: i64,
    user_id: i64,
    nickname: String,
}

/// 单笔账单的实际分担金额：有分摊按人头均分，没有就是付款人全额
pub fn actual_amount(total: i64, sharer_count: usize) -> f64 {
    if sharer_count > 0 {
        total as f64 / sharer_count as f64
    } else {
        total as f64
    }
}

fn color_for(category: &str) -> String {
    CATEGORY_COLORS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, color)| (*color).to_string())
        .unwrap_or_else(|| DEFAULT_COLOR.to_string())
}

pub struct Analysis;

impl Analysis {
    /// 把行程所属群组标记为已结束
    pub async fn mark_group_finished(pool: &PgPool, trip_id: i64) -> Result<(), AppError> {
        let group_id: Option<i64> =
            sqlx::query_scalar("SELECT group_id FROM trips WHERE trip_id = $1")
                .bind(trip_id)
                .fetch_optional(pool)
                .await?;

        let Some(group_id) = group_id else {
            return Err(AppError::NotFound("不存在的行程".to_string()));
        };

        sqlx::query("UPDATE groups SET finished = TRUE WHERE group_id = $1")
            .bind(group_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn analyze(pool: &PgPool, trip_id: i64) -> Result<ExpenseAnalysis, AppError> {
        let payments = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT p.payment_id, p.category, p.total_price, p.paid_by,
                   u.nickname AS payer_nickname
            FROM payments p
            JOIN users u ON p.paid_by = u.user_id
            WHERE p.trip_id = $1
            ORDER BY p.date DESC, p.payment_id DESC
            "#,
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        let shares = sqlx::query_as::<_, AnalysisShareRow>(
            r#"
            SELECT ps.payment_id, ps.user_id, u.nickname
            FROM payment_shares ps
            JOIN users u ON ps.user_id = u.user_id
            WHERE ps.payment_id IN (SELECT payment_id FROM payments WHERE trip_id = $1)
            "#,
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;

        let mut category_map: BTreeMap<String, (f64, u32)> = BTreeMap::new();
        let mut member_map: BTreeMap<i64, (String, f64)> = BTreeMap::new();
        let mut total_expense = 0.0f64;
        let mut highest: Option<(String, f64)> = None;

        for payment in &payments {
            let sharers: Vec<&AnalysisShareRow> = shares
                .iter()
                .filter(|s| s.payment_id == payment.payment_id)
                .collect();

            let amount = actual_amount(payment.total_price, sharers.len());

            let entry = category_map
                .entry(payment.category.clone())
                .or_insert((0.0, 0));
            entry.0 += amount;
            entry.1 += 1;

            if sharers.is_empty() {
                // 个人消费全部记在付款人头上
                let member = member_map
                    .entry(payment.paid_by)
                    .or_insert((payment.payer_nickname.clone(), 0.0));
                member.1 += amount;
            } else {
                for sharer in &sharers {
                    let member = member_map
                        .entry(sharer.user_id)
                        .or_insert((sharer.nickname.clone(), 0.0));
                    member.1 += amount;
                }
            }

            total_expense += amount;
            if highest.as_ref().map(|(_, a)| amount > *a).unwrap_or(true) {
                highest = Some((payment.category.clone(), amount));
            }
        }

        let mut category_breakdown: Vec<CategoryAnalysis> = category_map
            .into_iter()
            .map(|(category, (amount, count))| CategoryAnalysis {
                color: color_for(&category),
                percentage: if total_expense > 0.0 {
                    (amount / total_expense * 1000.0).round() / 10.0
                } else {
                    0.0
                },
                amount: amount.round() as i64,
                count,
                category,
            })
            .collect();
        category_breakdown.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut member_expenses: Vec<MemberExpense> = member_map
            .into_iter()
            .map(|(member_id, (nickname, amount))| MemberExpense {
                member_id,
                nickname,
                paid_amount: amount.round() as i64,
                percentage: if total_expense > 0.0 {
                    (amount / total_expense * 1000.0).round() / 10.0
                } else {
                    0.0
                },
            })
            .collect();
        member_expenses.sort_by(|a, b| b.paid_amount.cmp(&a.paid_amount));

        let insights = build_insights(
            &category_breakdown,
            &member_expenses,
            highest,
            total_expense,
        );

        Ok(ExpenseAnalysis {
            total_expense: total_expense.round() as i64,
            category_breakdown,
            member_expenses,
            insights,
        })
    }
}

fn build_insights(
    categories: &[CategoryAnalysis],
    members: &[MemberExpense],
    highest: Option<(String, f64)>,
    total_expense: f64,
) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(top) = categories.first() {
        if top.percentage > 30.0 {
            insights.push(format!(
                "{} 类别占了全部支出的 {}%",
                top.category, top.percentage
            ));
        }
    }

    if let Some((category, amount)) = highest {
        if total_expense > 0.0 && amount > total_expense * 0.2 {
            insights.push(format!("{} 里有一笔大额支出", category));
        }
    }

    if let Some(frequent) = categories
        .iter()
        .find(|c| c.count > 2 && c.amount / (c.count as i64) < 10000)
    {
        insights.push(format!("{} 是小额高频消费", frequent.category));
    }

    if let Some(top_spender) = members.first() {
        if top_spender.percentage > 40.0 {
            insights.push(format!(
                "{} 的支出占比最高 ({}%)",
                top_spender.nickname, top_spender.percentage
            ));
        }
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_payment_divides_evenly() {
        assert_eq!(actual_amount(300, 3), 100.0);
    }

    #[test]
    fn personal_payment_keeps_full_amount() {
        assert_eq!(actual_amount(300, 0), 300.0);
    }

    #[test]
    fn unknown_category_gets_default_color() {
        assert_eq!(color_for("没见过的类别"), DEFAULT_COLOR);
        assert_eq!(color_for("交通"), "#96C93D");
    }
}
