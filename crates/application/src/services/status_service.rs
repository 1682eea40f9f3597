use domain::{DomainError, Status, StatusContentType, StatusDraft, StatusId, UserId};

use crate::error::ApplicationError;
use crate::services::ServiceDependencies;

#[derive(Debug, Clone)]
pub struct PostStatusRequest {
    pub user_id: UserId,
    pub content_type: StatusContentType,
    pub content: String,
    pub media_url: Option<String>,
    pub background_color: Option<String>,
}

pub struct StatusService {
    deps: ServiceDependencies,
}

impl StatusService {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn post(&self, request: PostStatusRequest) -> Result<Status, ApplicationError> {
        let now = self.deps.clock.now();
        let status = Status::post(
            StatusId::generate(),
            StatusDraft {
                user_id: request.user_id,
                content_type: request.content_type,
                content: request.content,
                media_url: request.media_url,
                background_color: request.background_color,
            },
            now,
            self.deps.policy.status_ttl,
        )?;
        let status = self.deps.repositories.statuses.create(status).await?;
        tracing::info!(status_id = %status.id, user_id = %status.user_id, "发布动态");
        Ok(status)
    }

    /// 联系人发布的未过期动态，最新的在前
    pub async fn feed(&self, user_id: UserId) -> Result<Vec<Status>, ApplicationError> {
        let owners = self.contact_ids(user_id).await?;
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.deps.clock.now();
        Ok(self
            .deps
            .repositories
            .statuses
            .list_live(&owners, now)
            .await?)
    }

    /// 记录浏览者。过期或不可见的动态按不存在处理。
    pub async fn view(&self, viewer: UserId, status_id: StatusId) -> Result<Status, ApplicationError> {
        let now = self.deps.clock.now();
        let status = self
            .deps
            .repositories
            .statuses
            .find_by_id(status_id)
            .await?
            .filter(|status| status.is_live(now))
            .ok_or_else(|| DomainError::not_found("status", status_id))?;

        if status.user_id == viewer {
            return Ok(status);
        }
        if !self.contact_ids(viewer).await?.contains(&status.user_id) {
            return Err(DomainError::not_found("status", status_id).into());
        }

        let status = self
            .deps
            .repositories
            .statuses
            .modify(
                status_id,
                Box::new(move |status: &mut Status| {
                    status.add_viewer(viewer);
                    Ok(())
                }),
            )
            .await?;
        Ok(status)
    }

    async fn contact_ids(&self, user_id: UserId) -> Result<Vec<UserId>, ApplicationError> {
        let contacts = self.deps.repositories.contacts.list_for_user(user_id).await?;
        Ok(contacts.into_iter().map(|c| c.contact_user_id).collect())
    }
}
