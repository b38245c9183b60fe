// 实时消息协议
//
// WebSocket 帧是 {"event": "...", "data": {...}} 形状的 JSON，
// 入站与出站各一个枚举。出站事件要进广播通道，必须可 Clone。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// 成员信息（memberJoined / membersList 共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: i64,
    pub nickname: String,
    pub profile_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// 某个成员的日程区间
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarData {
    pub user_id: i64,
    pub nickname: String,
    pub date_range: DateRange,
}

/// 客户端发来的事件
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_id: i64, user_id: i64 },
    #[serde(rename_all = "camelCase")]
    LeaveGroup { group_id: i64, user_id: i64 },
    #[serde(rename_all = "camelCase")]
    DeleteGroup { group_id: i64, user_id: i64 },
    #[serde(rename_all = "camelCase")]
    GetMembers { group_id: i64 },
    #[serde(rename_all = "camelCase")]
    SetCalendarDate {
        group_id: i64,
        user_id: i64,
        date_range: DateRange,
    },
    #[serde(rename_all = "camelCase")]
    ClearCalendarDate { group_id: i64, user_id: i64 },
    #[serde(rename_all = "camelCase")]
    GetCalendarDates { group_id: i64 },
    #[serde(rename_all = "camelCase")]
    TripCreated { group_id: i64, trip_id: i64 },
}

/// 服务端广播/应答的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    MemberJoined {
        group_id: i64,
        new_member: MemberInfo,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    MemberLeft {
        group_id: i64,
        user_id: i64,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupDeleted { group_id: i64, message: String },
    #[serde(rename_all = "camelCase")]
    MembersList {
        group_id: i64,
        members: Vec<MemberInfo>,
    },
    #[serde(rename_all = "camelCase")]
    CalendarUpdated {
        group_id: i64,
        calendar_data: CalendarData,
    },
    #[serde(rename_all = "camelCase")]
    CalendarUpdateSuccess {
        group_id: i64,
        calendar_data: CalendarData,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    CalendarDateCleared { group_id: i64, user_id: i64 },
    #[serde(rename_all = "camelCase")]
    CalendarClearSuccess {
        group_id: i64,
        user_id: i64,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    CalendarDatesList {
        group_id: i64,
        calendar_data: Vec<CalendarData>,
    },
    #[serde(rename_all = "camelCase")]
    RedirectToTrip { trip_id: i64, message: String },
    #[serde(rename_all = "camelCase")]
    UserDisconnected { user_id: i64, message: String },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_parses_camel_case_envelope() {
        let raw = r#"{"event":"joinGroup","data":{"groupId":3,"userId":11}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::JoinGroup { group_id, user_id } => {
                assert_eq!(group_id, 3);
                assert_eq!(user_id, 11);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn calendar_event_carries_date_range() {
        let raw = r#"{"event":"setCalendarDate","data":{"groupId":1,"userId":2,"dateRange":{"start":"2025-03-01","end":"2025-03-05"}}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::SetCalendarDate { date_range, .. } => {
                assert_eq!(date_range.start.to_string(), "2025-03-01");
                assert_eq!(date_range.end.to_string(), "2025-03-05");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn server_event_serializes_with_event_tag() {
        let event = ServerEvent::GroupDeleted {
            group_id: 9,
            message: "群组已解散".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "groupDeleted");
        assert_eq!(json["data"]["groupId"], 9);
    }

    #[test]
    fn member_info_omits_missing_role() {
        let info = MemberInfo {
            user_id: 1,
            nickname: "旅人".to_string(),
            profile_image: None,
            role: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("role").is_none());
    }

    #[test]
    fn every_inbound_event_name_round_trips() {
        let samples = [
            r#"{"event":"leaveGroup","data":{"groupId":1,"userId":2}}"#,
            r#"{"event":"deleteGroup","data":{"groupId":1,"userId":2}}"#,
            r#"{"event":"getMembers","data":{"groupId":1}}"#,
            r#"{"event":"clearCalendarDate","data":{"groupId":1,"userId":2}}"#,
            r#"{"event":"getCalendarDates","data":{"groupId":1}}"#,
            r#"{"event":"tripCreated","data":{"groupId":1,"tripId":5}}"#,
        ];
        for raw in samples {
            assert!(
                serde_json::from_str::<ClientEvent>(raw).is_ok(),
                "failed to parse {}",
                raw
            );
        }
    }
}
