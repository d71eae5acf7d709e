//! 会话状态机
//!
//! `active → completed` 或 `active → incomplete`，终态不可离开。
//! 状态变化以 [`SessionSignal`] 的形式返回给调用方，由调用方同步触发特征提取，
//! 状态机本身没有副作用回调。

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::event::{EventPayload, TelemetryEvent};
use crate::models::session::{DeviceInfo, MissionStatus, Session, SessionStatus};

/// 状态机发出的信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// 关卡首次完成
    MissionCompleted { mission_id: String },
    /// 会话正常结束
    SessionCompleted,
    /// 会话因不活跃超时结束
    SessionExpired,
}

pub struct SessionStateMachine;

impl SessionStateMachine {
    /// 进入 active，关卡进度为空
    pub fn start(student_id: &str, device_info: DeviceInfo, now: DateTime<Utc>) -> Session {
        Session::new(student_id, device_info, now)
    }

    /// 应用一个已释放的事件
    ///
    /// 关卡完成是幂等的：已完成的关卡再次完成不产生信号。
    pub fn apply(session: &mut Session, event: &TelemetryEvent) -> Option<SessionSignal> {
        match &event.payload {
            EventPayload::MissionStarted { mission_id } => {
                let status = session
                    .mission_progress
                    .entry(mission_id.clone())
                    .or_default();
                if *status == MissionStatus::NotStarted {
                    *status = MissionStatus::InProgress;
                }
                None
            }
            EventPayload::MissionCompleted { mission_id, .. } => {
                Self::mark_completed(session, mission_id).then(|| SessionSignal::MissionCompleted {
                    mission_id: mission_id.clone(),
                })
            }
            _ => None,
        }
    }

    /// 检查会话能否以给定结束时间完成
    pub fn ensure_completable(session: &Session, ended_at: DateTime<Utc>) -> Result<()> {
        Self::ensure_active(session)?;
        if ended_at < session.started_at {
            return Err(AppError::Validation(format!(
                "ended_at {} is before started_at {}",
                ended_at.to_rfc3339(),
                session.started_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// active → completed
    pub fn complete(
        session: &mut Session,
        ended_at: DateTime<Utc>,
        missions_completed: &[String],
    ) -> Result<SessionSignal> {
        Self::ensure_completable(session, ended_at)?;

        for mission_id in missions_completed {
            Self::mark_completed(session, mission_id);
        }
        session.status = SessionStatus::Completed;
        session.ended_at = Some(ended_at);
        session.total_playtime_sec =
            Some((ended_at - session.started_at).num_milliseconds() as f64 / 1000.0);
        Ok(SessionSignal::SessionCompleted)
    }

    /// active → incomplete，结束时间取最后活跃时间
    pub fn expire(session: &mut Session) -> Result<SessionSignal> {
        Self::ensure_active(session)?;
        session.status = SessionStatus::Incomplete;
        session.ended_at = Some(session.last_activity_at);
        Ok(SessionSignal::SessionExpired)
    }

    fn ensure_active(session: &Session) -> Result<()> {
        if session.status.is_terminal() {
            return Err(AppError::SessionTerminal {
                session_id: session.id.clone(),
                status: session.status,
            });
        }
        Ok(())
    }

    /// 返回是否是首次完成
    fn mark_completed(session: &mut Session, mission_id: &str) -> bool {
        let status = session
            .mission_progress
            .entry(mission_id.to_string())
            .or_default();
        let first = *status != MissionStatus::Completed;
        *status = MissionStatus::Completed;
        first
    }
}
