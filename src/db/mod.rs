use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::config::Config;
use crate::error::AppError;

pub mod retry;

/// 建立数据库连接池
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'tripmate_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// 开启事务并设置锁等待超时
///
/// SET LOCAL 只对当前事务生效；卡住的锁会以 SQLSTATE 55P03 浮出，
/// 经 `AppError::Contention` 进入重试策略，而不是无限期阻塞处理单元。
pub async fn begin_with_lock_timeout(
    pool: &PgPool,
    timeout: Duration,
) -> Result<Transaction<'static, Postgres>, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "SET LOCAL lock_timeout = '{}ms'",
        timeout.as_millis()
    ))
    .execute(&mut *tx)
    .await?;

    Ok(tx)
}
