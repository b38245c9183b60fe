// 实时事件处理
//
// 每个事件：先完成数据库变更（事务提交后连接即归还池），
// 再驱动房间广播。失败时只给发起方回 error 事件，绝不广播错误。

use sqlx::PgPool;

use super::calendar;
use super::events::{ClientEvent, DateRange, MemberInfo, ServerEvent};
use super::socket::{ConnectionContext, spawn_forwarder};
use crate::AppState;
use crate::error::AppError;
use crate::routes::departure::model::GroupDeparture;
use crate::routes::group::model::{Group, ROLE_COMPANION, ROLE_HOST};

pub async fn dispatch(state: &AppState, ctx: &mut ConnectionContext, event: ClientEvent) {
    let result = match event {
        ClientEvent::JoinGroup { group_id, user_id } => {
            join_group(state, ctx, group_id, user_id).await
        }
        ClientEvent::LeaveGroup { group_id, user_id } => {
            leave_group(state, ctx, group_id, user_id).await
        }
        ClientEvent::DeleteGroup { group_id, user_id } => {
            delete_group(state, ctx, group_id, user_id).await
        }
        ClientEvent::GetMembers { group_id } => get_members(state, ctx, group_id).await,
        ClientEvent::SetCalendarDate {
            group_id,
            user_id,
            date_range,
        } => set_calendar_date(state, ctx, group_id, user_id, date_range).await,
        ClientEvent::ClearCalendarDate { group_id, user_id } => {
            clear_calendar_date(state, ctx, group_id, user_id).await
        }
        ClientEvent::GetCalendarDates { group_id } => get_calendar_dates(state, ctx, group_id).await,
        ClientEvent::TripCreated { group_id, trip_id } => {
            trip_created(state, group_id, trip_id).await
        }
    };

    if let Err(e) = result {
        tracing::debug!("Realtime event failed for user {}: {}", ctx.user_id, e);
        ctx.reply(ServerEvent::Error {
            message: e.to_string(),
        });
    }
}

async fn fetch_member_info(pool: &PgPool, user_id: i64) -> Result<MemberInfo, AppError> {
    #[derive(sqlx::FromRow)]
    struct UserRow {
        user_id: i64,
        nickname: String,
        profile_image: Option<String>,
    }

    let user = sqlx::query_as::<_, UserRow>(
        "SELECT user_id, nickname, profile_image FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(MemberInfo {
        user_id: user.user_id,
        nickname: user.nickname,
        profile_image: user.profile_image,
        role: None,
    })
}

/// joinGroup：校验群组存在，必要时事务内补成员行，
/// 只有真正新加入的成员才广播 memberJoined
async fn join_group(
    state: &AppState,
    ctx: &mut ConnectionContext,
    group_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    let mut tx = state.pool.begin().await?;

    let group_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = $1)")
            .bind(group_id)
            .fetch_one(&mut *tx)
            .await?;

    if !group_exists {
        return Err(AppError::NotFound("不存在的群组".to_string()));
    }

    let already_member = Group::is_member_tx(&mut tx, group_id, user_id).await?;
    if !already_member {
        sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(group_id)
            .bind(user_id)
            .bind(ROLE_COMPANION)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    // 先挂上房间订阅再广播，加入者自己也能收到后续事件
    if !ctx.joined.contains_key(&group_id) {
        let rx = state.rooms.join(group_id).await;
        let handle = spawn_forwarder(rx, ctx.out_tx.clone());
        ctx.joined.insert(group_id, handle);
    }
    state.registry.connect(group_id, user_id).await;

    if !already_member {
        let new_member = fetch_member_info(&state.pool, user_id).await?;
        state
            .rooms
            .broadcast(
                group_id,
                ServerEvent::MemberJoined {
                    group_id,
                    new_member,
                    message: "新成员加入了群组".to_string(),
                },
            )
            .await;
    }

    tracing::info!("User {} joined room {}", user_id, group_id);
    Ok(())
}

/// leaveGroup：HOST 退出触发整组级联删除并关闭房间，
/// 普通成员只删自己的成员行和日程行
async fn leave_group(
    state: &AppState,
    ctx: &mut ConnectionContext,
    group_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    let role = Group::role_of(&state.pool, group_id, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("不是该群组的成员".to_string()))?;

    if role == ROLE_HOST {
        cascade_and_close(state, ctx, group_id, "群主退出，群组已解散").await
    } else {
        let mut tx = state.pool.begin().await?;
        GroupDeparture::remove_member(&mut tx, group_id, user_id).await?;
        tx.commit().await?;

        state
            .rooms
            .broadcast(
                group_id,
                ServerEvent::MemberLeft {
                    group_id,
                    user_id,
                    message: "成员退出了群组".to_string(),
                },
            )
            .await;
        state
            .rooms
            .broadcast(
                group_id,
                ServerEvent::CalendarDateCleared { group_id, user_id },
            )
            .await;

        ctx.detach(group_id);
        state.registry.disconnect(group_id, user_id).await;
        state.rooms.prune_if_empty(group_id).await;

        tracing::info!("User {} left room {}", user_id, group_id);
        Ok(())
    }
}

/// deleteGroup：与退出不同的显式请求，先复核 HOST 身份再走同一条级联
async fn delete_group(
    state: &AppState,
    ctx: &mut ConnectionContext,
    group_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    let role = Group::role_of(&state.pool, group_id, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("不是该群组的成员".to_string()))?;

    if role != ROLE_HOST {
        return Err(AppError::Forbidden("只有群主可以解散群组".to_string()));
    }

    cascade_and_close(state, ctx, group_id, "群组已被群主解散").await
}

/// 级联删除 + groupDeleted 广播 + 强制拆掉整个房间
async fn cascade_and_close(
    state: &AppState,
    ctx: &mut ConnectionContext,
    group_id: i64,
    message: &str,
) -> Result<(), AppError> {
    GroupDeparture::delete_group(&state.pool, &state.config, group_id).await?;

    // 广播发生在事务提交之后；随后关闭房间让所有连接脱离
    state
        .rooms
        .broadcast(
            group_id,
            ServerEvent::GroupDeleted {
                group_id,
                message: message.to_string(),
            },
        )
        .await;

    ctx.detach(group_id);
    state.rooms.close(group_id).await;
    state.registry.drop_group(group_id).await;

    Ok(())
}

async fn get_members(
    state: &AppState,
    ctx: &ConnectionContext,
    group_id: i64,
) -> Result<(), AppError> {
    let members = Group::members(&state.pool, group_id).await?;

    let members = members
        .into_iter()
        .map(|m| MemberInfo {
            user_id: m.user_id,
            nickname: m.nickname,
            profile_image: m.profile_image,
            role: Some(m.role),
        })
        .collect();

    ctx.reply(ServerEvent::MembersList { group_id, members });
    Ok(())
}

/// setCalendarDate：先删后插替换区间，广播合并结果并单独应答发起方
async fn set_calendar_date(
    state: &AppState,
    ctx: &ConnectionContext,
    group_id: i64,
    user_id: i64,
    date_range: DateRange,
) -> Result<(), AppError> {
    if date_range.end < date_range.start {
        return Err(AppError::Validation("结束日期早于开始日期".to_string()));
    }

    let calendar_data = calendar::set_calendar(&state.pool, group_id, user_id, &date_range).await?;

    state
        .rooms
        .broadcast(
            group_id,
            ServerEvent::CalendarUpdated {
                group_id,
                calendar_data: calendar_data.clone(),
            },
        )
        .await;

    ctx.reply(ServerEvent::CalendarUpdateSuccess {
        group_id,
        calendar_data,
        message: "日程已更新".to_string(),
    });

    Ok(())
}

/// clearCalendarDate：真的删掉了才广播，否则静默成功
async fn clear_calendar_date(
    state: &AppState,
    ctx: &ConnectionContext,
    group_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    let removed = calendar::clear_calendar(&state.pool, group_id, user_id).await?;

    if removed {
        state
            .rooms
            .broadcast(
                group_id,
                ServerEvent::CalendarDateCleared { group_id, user_id },
            )
            .await;

        ctx.reply(ServerEvent::CalendarClearSuccess {
            group_id,
            user_id,
            message: "日程已清除".to_string(),
        });
    }

    Ok(())
}

async fn get_calendar_dates(
    state: &AppState,
    ctx: &ConnectionContext,
    group_id: i64,
) -> Result<(), AppError> {
    let calendar_data = calendar::list_calendar(&state.pool, group_id).await?;

    ctx.reply(ServerEvent::CalendarDatesList {
        group_id,
        calendar_data,
    });
    Ok(())
}

/// tripCreated：行程敲定，把整个房间重定向过去
async fn trip_created(state: &AppState, group_id: i64, trip_id: i64) -> Result<(), AppError> {
    state
        .rooms
        .broadcast(
            group_id,
            ServerEvent::RedirectToTrip {
                trip_id,
                message: "行程已确定".to_string(),
            },
        )
        .await;

    Ok(())
}
