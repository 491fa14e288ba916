//! 会话生命周期通知
//!
//! 视图与导航在此订阅会话的开始、续期与结束（例如结束时跳转回首页）。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// 主动登出
    Logout,
    /// 刷新令牌被拒或交换未能完成
    RefreshFailed,
    /// 需要续期但没有存储刷新令牌
    MissingRefreshToken,
    /// 启动时持久化状态残缺或损坏
    InconsistentState,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Logout => "logout",
            EndReason::RefreshFailed => "refresh_failed",
            EndReason::MissingRefreshToken => "missing_refresh_token",
            EndReason::InconsistentState => "inconsistent_state",
        }
    }

    /// 跳转前展示给用户的提示
    pub fn message(&self) -> &'static str {
        match self {
            EndReason::Logout => "You have been logged out",
            EndReason::RefreshFailed => "Session expired, please log in again",
            EndReason::MissingRefreshToken | EndReason::InconsistentState => {
                "Please log in again"
            }
        }
    }
}

/// 会话生命周期事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { username: String, at: DateTime<Utc> },
    Renewed { at: DateTime<Utc> },
    Ended { reason: EndReason, at: DateTime<Utc> },
}

impl SessionEvent {
    pub fn started(username: &str) -> Self {
        SessionEvent::Started {
            username: username.to_string(),
            at: Utc::now(),
        }
    }

    pub fn renewed() -> Self {
        SessionEvent::Renewed { at: Utc::now() }
    }

    pub fn ended(reason: EndReason) -> Self {
        SessionEvent::Ended {
            reason,
            at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::Started { .. } => "session_started",
            SessionEvent::Renewed { .. } => "session_renewed",
            SessionEvent::Ended { .. } => "session_ended",
        }
    }
}

/// [`SessionEvent`] 广播总线
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件，没有订阅者属于正常情况
    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type().to_string();
        if self.sender.send(event).is_err() {
            tracing::trace!(event_type = %event_type, "No session event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
