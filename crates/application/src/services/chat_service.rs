use data_encoding::BASE32_NOPAD;
use domain::{Chat, ChatId, ChatKind, DomainError, Message, UserId};
use serde::Serialize;

use crate::error::ApplicationError;
use crate::services::ServiceDependencies;

#[derive(Debug, Clone)]
pub struct CreateChatRequest {
    pub requester: UserId,
    pub kind: ChatKind,
    pub name: Option<String>,
    /// 除请求者之外的参与者
    pub participants: Vec<UserId>,
}

/// 会话列表项：会话本身加上最近一条未被全员删除的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub last_message: Option<Message>,
}

pub struct ChatService {
    deps: ServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat, ApplicationError> {
        match request.kind {
            ChatKind::Direct => {
                self.create_or_get_direct(request.requester, &request.participants)
                    .await
            }
            kind => {
                self.create_group_or_channel(
                    request.requester,
                    kind,
                    request.name,
                    &request.participants,
                )
                .await
            }
        }
    }

    /// 单聊幂等创建：同一无序用户对只有一个会话
    pub async fn create_or_get_direct(
        &self,
        requester: UserId,
        participants: &[UserId],
    ) -> Result<Chat, ApplicationError> {
        let mut targets: Vec<UserId> = participants
            .iter()
            .copied()
            .filter(|id| *id != requester)
            .collect();
        targets.sort();
        targets.dedup();
        let other = match targets.as_slice() {
            [other] => *other,
            [] => {
                return Err(DomainError::invalid_argument(
                    "participants",
                    "direct chat needs another participant",
                )
                .into())
            }
            _ => {
                return Err(DomainError::invalid_argument(
                    "participants",
                    "direct chat takes exactly one other participant",
                )
                .into())
            }
        };

        self.deps
            .repositories
            .users
            .find_by_id(other)
            .await?
            .ok_or_else(|| DomainError::not_found("user", other))?;

        let now = self.deps.clock.now();
        let candidate = Chat::new_direct(ChatId::generate(), requester, other, now)?;
        let candidate_id = candidate.id;
        let chat = self.deps.repositories.chats.create_direct(candidate).await?;

        if chat.id == candidate_id {
            tracing::info!(chat_id = %chat.id, %requester, %other, "创建单聊");
            self.join_participants(&chat).await;
        } else {
            tracing::debug!(chat_id = %chat.id, "单聊已存在");
        }
        Ok(chat)
    }

    pub async fn create_group_or_channel(
        &self,
        requester: UserId,
        kind: ChatKind,
        name: Option<String>,
        participants: &[UserId],
    ) -> Result<Chat, ApplicationError> {
        let now = self.deps.clock.now();
        let chat = Chat::new_group(
            ChatId::generate(),
            kind,
            name,
            requester,
            participants,
            generate_invite_link(),
            now,
        )?;
        let chat = self.deps.repositories.chats.create(chat).await?;

        tracing::info!(
            chat_id = %chat.id,
            kind = ?chat.kind,
            participants = chat.participants.len(),
            "创建群组/频道"
        );
        self.join_participants(&chat).await;
        Ok(chat)
    }

    pub async fn list_chats(&self, user_id: UserId) -> Result<Vec<ChatSummary>, ApplicationError> {
        let chats = self.deps.repositories.chats.list_for_user(user_id).await?;
        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            let last_message = self.deps.repositories.messages.latest(chat.id).await?;
            summaries.push(ChatSummary { chat, last_message });
        }
        Ok(summaries)
    }

    pub async fn get_chat(&self, user_id: UserId, chat_id: ChatId) -> Result<Chat, ApplicationError> {
        let chat = self.load(chat_id).await?;
        chat.ensure_participant(user_id, "view chat")?;
        Ok(chat)
    }

    pub(crate) async fn load(&self, chat_id: ChatId) -> Result<Chat, ApplicationError> {
        self.deps
            .repositories
            .chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| DomainError::not_found("chat", chat_id).into())
    }

    /// 已在线的参与者不会重新认证，需要显式加入新会话的房间
    async fn join_participants(&self, chat: &Chat) {
        for participant in &chat.participants {
            let joined = self.deps.presence.join_room(*participant, chat.id).await;
            if joined > 0 {
                tracing::debug!(chat_id = %chat.id, user_id = %participant, joined, "在线连接加入房间");
            }
        }
    }
}

fn generate_invite_link() -> String {
    let token = BASE32_NOPAD.encode(&rand::random::<[u8; 10]>());
    format!("wa://{}", token.to_lowercase())
}
