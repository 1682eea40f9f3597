//! 通话实体
//!
//! 状态流转：ringing → ongoing → ended，或 ringing → missed。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{CallId, ChatId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    Ongoing,
    Ended,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub chat_id: ChatId,
    pub caller_id: UserId,
    pub call_type: CallType,
    pub participants: Vec<UserId>,
    pub status: CallStatus,
    pub started_at: Timestamp,
    pub answered_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    /// 通话时长（秒），结束时计算
    pub duration: Option<i64>,
}

impl Call {
    pub fn initiate(
        id: CallId,
        chat_id: ChatId,
        caller_id: UserId,
        call_type: CallType,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            chat_id,
            caller_id,
            call_type,
            participants: vec![caller_id],
            status: CallStatus::Ringing,
            started_at: now,
            answered_at: None,
            ended_at: None,
            duration: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, CallStatus::Ended | CallStatus::Missed)
    }

    pub fn answer(&mut self, user_id: UserId, now: Timestamp) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::failed_precondition("call already finished"));
        }
        if !self.participants.contains(&user_id) {
            self.participants.push(user_id);
        }
        if self.status == CallStatus::Ringing && user_id != self.caller_id {
            self.status = CallStatus::Ongoing;
            self.answered_at = Some(now);
        }
        Ok(())
    }

    pub fn end(&mut self, now: Timestamp) -> Result<(), DomainError> {
        match self.status {
            CallStatus::Ringing => {
                self.status = CallStatus::Missed;
                self.ended_at = Some(now);
                self.duration = Some(0);
            }
            CallStatus::Ongoing => {
                let from = self.answered_at.unwrap_or(self.started_at);
                self.status = CallStatus::Ended;
                self.ended_at = Some(now);
                self.duration = Some((now - from).num_seconds().max(0));
            }
            CallStatus::Ended | CallStatus::Missed => {
                return Err(DomainError::failed_precondition("call already finished"));
            }
        }
        Ok(())
    }
}
