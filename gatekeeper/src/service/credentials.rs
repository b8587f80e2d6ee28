use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use chrono::Utc;
use rand::RngCore;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entity::accounts::{self, Entity as Accounts};
use crate::error::AccountError;
use crate::service::registry::is_unique_violation;

/// Bytes of entropy per stream key
pub const STREAM_KEY_BYTES: usize = 24;

/// Key regenerations tolerated on a uniqueness conflict
const KEY_ATTEMPTS: u8 = 5;

pub fn generate_stream_key() -> String {
    let mut bytes = [0u8; STREAM_KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// First characters of a stream key, enough to correlate log lines
pub fn redact(stream_key: &str) -> String {
    match stream_key.char_indices().nth(6) {
        Some((i, _)) => format!("{}…", &stream_key[..i]),
        None => stream_key.to_string(),
    }
}

pub fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::PasswordHash(e.to_string()))
}

/// Accounts and their stream keys
#[derive(Clone, Debug)]
pub struct CredentialStore {
    db: DatabaseConnection,
}

impl CredentialStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Indexed lookup used on every publish start
    pub async fn find_by_stream_key(
        &self,
        stream_key: &str,
    ) -> Result<Option<accounts::Model>, DbErr> {
        Accounts::find()
            .filter(accounts::Column::StreamKey.eq(stream_key))
            .one(&self.db)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<accounts::Model>, DbErr> {
        Accounts::find_by_id(id).one(&self.db).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<accounts::Model>, DbErr> {
        Accounts::find()
            .filter(accounts::Column::Email.eq(email))
            .one(&self.db)
            .await
    }

    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> Result<accounts::Model, AccountError> {
        self.create_account_with(email, password, generate_stream_key)
            .await
    }

    pub(crate) async fn create_account_with<F>(
        &self,
        email: &str,
        password: &str,
        mut next_key: F,
    ) -> Result<accounts::Model, AccountError>
    where
        F: FnMut() -> String,
    {
        if self.find_by_email(email).await?.is_some() {
            return Err(AccountError::EmailTaken);
        }

        let password_hash = hash_password(password)?;
        for attempt in 1..=KEY_ATTEMPTS {
            let account = accounts::ActiveModel {
                id: Set(Uuid::new_v4()),
                email: Set(email.to_string()),
                password_hash: Set(password_hash.clone()),
                stream_key: Set(next_key()),
                created_at: Set(chrono::DateTime::<chrono::FixedOffset>::from(Utc::now())),
            };

            match account.insert(&self.db).await {
                Ok(created) => {
                    info!(account = %created.id, "account created");
                    return Ok(created);
                }
                Err(err) if is_unique_violation(&err) => {
                    if self.find_by_email(email).await?.is_some() {
                        return Err(AccountError::EmailTaken);
                    }
                    warn!(attempt, "stream key collision, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AccountError::KeyExhausted(KEY_ATTEMPTS))
    }

    /// Give the account a new key. Returns the previous key with the updated
    /// account, or `None` when the account does not exist.
    pub async fn rotate_stream_key(
        &self,
        id: Uuid,
    ) -> Result<Option<(String, accounts::Model)>, AccountError> {
        self.rotate_stream_key_with(id, generate_stream_key).await
    }

    pub(crate) async fn rotate_stream_key_with<F>(
        &self,
        id: Uuid,
        mut next_key: F,
    ) -> Result<Option<(String, accounts::Model)>, AccountError>
    where
        F: FnMut() -> String,
    {
        let Some(account) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        for attempt in 1..=KEY_ATTEMPTS {
            let key = next_key();
            let result = Accounts::update_many()
                .col_expr(accounts::Column::StreamKey, Expr::value(key.clone()))
                .filter(accounts::Column::Id.eq(id))
                .filter(accounts::Column::StreamKey.eq(account.stream_key.clone()))
                .exec(&self.db)
                .await;

            match result {
                Ok(res) if res.rows_affected == 1 => {
                    let old = account.stream_key.clone();
                    return Ok(Some((
                        old,
                        accounts::Model {
                            stream_key: key,
                            ..account
                        },
                    )));
                }
                // Rotated concurrently, report the key that won
                Ok(_) => {
                    return Ok(self
                        .find_by_id(id)
                        .await?
                        .map(|current| (account.stream_key.clone(), current)));
                }
                Err(err) if is_unique_violation(&err) => {
                    warn!(attempt, "stream key collision on rotation, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AccountError::KeyExhausted(KEY_ATTEMPTS))
    }
}
