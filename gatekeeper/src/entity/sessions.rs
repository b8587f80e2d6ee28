use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One live interval of a stream key. Times are epoch milliseconds,
/// `ended_at` stays `None` while the key is live.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub account_id: Uuid,
    pub stream_key: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub end_reason: Option<String>, // publish_end, reaped, restarted, rotated
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id"
    )]
    Account,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

impl From<Model> for api::response::Session {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            stream_key: model.stream_key,
            started_at: model.started_at,
            ended_at: model.ended_at,
            end_reason: model.end_reason,
        }
    }
}
