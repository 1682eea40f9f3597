use domain::{Call, CallId, CallType, Chat, ChatId, DomainError, UserId};
use serde_json::Value as JsonValue;

use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::presence::ConnectionId;
use crate::repository::Mutation;
use crate::services::ServiceDependencies;

#[derive(Debug, Clone)]
pub struct InitiateCallRequest {
    pub caller_id: UserId,
    pub chat_id: ChatId,
    pub call_type: CallType,
}

pub struct CallService {
    deps: ServiceDependencies,
}

impl CallService {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self { deps }
    }

    async fn load_chat(&self, chat_id: ChatId) -> Result<Chat, ApplicationError> {
        self.deps
            .repositories
            .chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| DomainError::not_found("chat", chat_id).into())
    }

    pub async fn initiate(&self, request: InitiateCallRequest) -> Result<Call, ApplicationError> {
        let chat = self.load_chat(request.chat_id).await?;
        chat.ensure_participant(request.caller_id, "start call")?;

        let now = self.deps.clock.now();
        let call = Call::initiate(
            CallId::generate(),
            chat.id,
            request.caller_id,
            request.call_type,
            now,
        );
        let call = self.deps.repositories.calls.create(call).await?;

        tracing::info!(call_id = %call.id, chat_id = %chat.id, call_type = ?call.call_type, "发起通话");
        self.deps
            .bus
            .broadcast_to_room(chat.id, ServerEvent::IncomingCall(call.clone()), None)
            .await;
        Ok(call)
    }

    /// 信令转发：目标离线时静默丢弃，返回是否已入队
    pub async fn relay_signal(
        &self,
        from_user: UserId,
        target_user: UserId,
        signal: JsonValue,
    ) -> bool {
        let Some(target) = self.deps.presence.resolve(target_user).await else {
            tracing::debug!(from = %from_user, target = %target_user, "信令目标不在线，丢弃");
            return false;
        };
        self.deliver_signal(target, from_user, signal).await
    }

    async fn deliver_signal(
        &self,
        target: ConnectionId,
        from_user: UserId,
        signal: JsonValue,
    ) -> bool {
        self.deps
            .bus
            .send_to_connection(
                target,
                ServerEvent::CallSignal {
                    from_user_id: from_user,
                    signal,
                },
            )
            .await
    }

    pub async fn answer(&self, user_id: UserId, call_id: CallId) -> Result<Call, ApplicationError> {
        let now = self.deps.clock.now();
        self.transition(
            user_id,
            call_id,
            "answer call",
            Box::new(move |call: &mut Call| call.answer(user_id, now)),
        )
        .await
    }

    pub async fn end(&self, user_id: UserId, call_id: CallId) -> Result<Call, ApplicationError> {
        let now = self.deps.clock.now();
        self.transition(
            user_id,
            call_id,
            "end call",
            Box::new(move |call: &mut Call| call.end(now)),
        )
        .await
    }

    async fn transition(
        &self,
        user_id: UserId,
        call_id: CallId,
        action: &str,
        mutation: Mutation<Call>,
    ) -> Result<Call, ApplicationError> {
        let call = self
            .deps
            .repositories
            .calls
            .find_by_id(call_id)
            .await?
            .ok_or_else(|| DomainError::not_found("call", call_id))?;
        let chat = self.load_chat(call.chat_id).await?;
        chat.ensure_participant(user_id, action)?;

        let call = self.deps.repositories.calls.modify(call_id, mutation).await?;
        tracing::info!(call_id = %call.id, status = ?call.status, "通话状态变更");
        self.deps
            .bus
            .broadcast_to_room(call.chat_id, ServerEvent::CallUpdated(call.clone()), None)
            .await;
        Ok(call)
    }
}
