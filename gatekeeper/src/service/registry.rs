use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use uuid::Uuid;

use crate::entity::{
    accounts::{self, Entity as Accounts},
    sessions::{self, Entity as Sessions},
};

/// Attempts at inserting an open row while other callers race on the same key
const OPEN_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    PublishEnd,
    Reaped,
    Restarted,
    Rotated,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::PublishEnd => "publish_end",
            EndReason::Reaped => "reaped",
            EndReason::Restarted => "restarted",
            EndReason::Rotated => "rotated",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    /// This call inserted the open row
    Created(sessions::Model),
    /// Another call already holds the open row for the key
    Existing(sessions::Model),
}

impl Opened {
    pub fn session(&self) -> &sessions::Model {
        match self {
            Opened::Created(s) | Opened::Existing(s) => s,
        }
    }
}

/// Session rows, keyed by stream key. The store's partial unique index
/// guarantees at most one row per key with `ended_at IS NULL`; every write
/// here is either an insert that may hit that index or a conditional update
/// on `ended_at IS NULL`, so concurrent gateway replicas stay consistent.
#[derive(Clone, Debug)]
pub struct SessionRegistry {
    db: DatabaseConnection,
}

impl SessionRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert an open session unless one already exists for the key.
    pub async fn open_if_none(
        &self,
        account_id: Uuid,
        stream_key: &str,
        now: i64,
    ) -> Result<Opened, DbErr> {
        for _ in 0..OPEN_ATTEMPTS {
            let session = sessions::ActiveModel {
                id: Set(Uuid::new_v4()),
                account_id: Set(account_id),
                stream_key: Set(stream_key.to_string()),
                started_at: Set(now),
                ended_at: Set(None),
                end_reason: Set(None),
            };

            match session.insert(&self.db).await {
                Ok(created) => return Ok(Opened::Created(created)),
                Err(err) if is_unique_violation(&err) => {
                    if let Some(existing) = self.find_open(stream_key).await? {
                        return Ok(Opened::Existing(existing));
                    }
                    // The conflicting row was closed in between, try again
                }
                Err(err) => return Err(err),
            }
        }

        Err(DbErr::Custom(format!(
            "open session contention after {} attempts",
            OPEN_ATTEMPTS
        )))
    }

    /// Close whatever is open for the key and open a fresh session.
    /// A concurrent caller that wins the insert provides the fresh session.
    pub async fn restart(
        &self,
        account_id: Uuid,
        stream_key: &str,
        now: i64,
    ) -> Result<(Option<sessions::Model>, Opened), DbErr> {
        let closed = self.close_open(stream_key, now, EndReason::Restarted).await?;
        let opened = self.open_if_none(account_id, stream_key, now).await?;
        Ok((closed, opened))
    }

    pub async fn find_open(&self, stream_key: &str) -> Result<Option<sessions::Model>, DbErr> {
        Sessions::find()
            .filter(sessions::Column::StreamKey.eq(stream_key))
            .filter(sessions::Column::EndedAt.is_null())
            .one(&self.db)
            .await
    }

    /// Most recent session for the key, open or closed
    pub async fn find_latest(&self, stream_key: &str) -> Result<Option<sessions::Model>, DbErr> {
        Sessions::find()
            .filter(sessions::Column::StreamKey.eq(stream_key))
            .order_by_desc(sessions::Column::StartedAt)
            .one(&self.db)
            .await
    }

    /// Close the open session of the key, if any. Returns the row as closed
    /// by this call, or `None` when nothing was open or a racing caller
    /// closed it first.
    pub async fn close_open(
        &self,
        stream_key: &str,
        at: i64,
        reason: EndReason,
    ) -> Result<Option<sessions::Model>, DbErr> {
        let Some(open) = self.find_open(stream_key).await? else {
            return Ok(None);
        };

        if self.close_session(open.id, at, reason).await? {
            Ok(Some(sessions::Model {
                ended_at: Some(at),
                end_reason: Some(reason.to_string()),
                ..open
            }))
        } else {
            Ok(None)
        }
    }

    /// Conditional close of one row. `false` when it was no longer open.
    pub async fn close_session(&self, id: Uuid, at: i64, reason: EndReason) -> Result<bool, DbErr> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::EndedAt, Expr::value(at))
            .col_expr(sessions::Column::EndReason, Expr::value(reason.as_str()))
            .filter(sessions::Column::Id.eq(id))
            .filter(sessions::Column::EndedAt.is_null())
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Open sessions that started before `cutoff`
    pub async fn find_stale(&self, cutoff: i64) -> Result<Vec<sessions::Model>, DbErr> {
        Sessions::find()
            .filter(sessions::Column::EndedAt.is_null())
            .filter(sessions::Column::StartedAt.lt(cutoff))
            .order_by_asc(sessions::Column::StartedAt)
            .all(&self.db)
            .await
    }

    /// All open sessions with their owners, most recent start first
    pub async fn list_open(
        &self,
    ) -> Result<Vec<(sessions::Model, Option<accounts::Model>)>, DbErr> {
        Sessions::find()
            .find_also_related(Accounts)
            .filter(sessions::Column::EndedAt.is_null())
            .order_by_desc(sessions::Column::StartedAt)
            .all(&self.db)
            .await
    }

    pub async fn count_open(&self, stream_key: &str) -> Result<u64, DbErr> {
        Sessions::find()
            .filter(sessions::Column::StreamKey.eq(stream_key))
            .filter(sessions::Column::EndedAt.is_null())
            .count(&self.db)
            .await
    }

    pub async fn count(&self, stream_key: &str) -> Result<u64, DbErr> {
        Sessions::find()
            .filter(sessions::Column::StreamKey.eq(stream_key))
            .count(&self.db)
            .await
    }
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
