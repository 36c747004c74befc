//! Comment log: one JSON array under a single key, newest comment first.
//!
//! Every post rewrites the whole array. Two concurrent posts can read the
//! same "before" log and the later write wins; the store offers no
//! conditional put, so this stays a plain read-modify-write.

use serde::{Deserialize, Serialize};

use crate::{
    database::{KvStore, load_json},
    error::AppError,
    utils::now_iso,
};

pub const COMMENTS_KEY: &str = "all_comments";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

/// Client payload for a new comment. The timestamp is never part of this:
/// it is assigned server-side at write time, and any extra field a client
/// sends is dropped on deserialization.
#[derive(Debug, Deserialize)]
pub struct NewComment {
    pub username: String,
    pub message: String,
}

pub async fn record_comment(store: &dyn KvStore, new: NewComment) -> Result<Comment, AppError> {
    let username = new.username.trim();
    let message = new.message.trim();

    if username.is_empty() || message.is_empty() {
        return Err(AppError::Validation(
            "Missing username or message in request body",
        ));
    }

    let comment = Comment {
        username: username.to_string(),
        message: message.to_string(),
        timestamp: now_iso(),
    };

    let mut comments = list_comments(store).await?;
    comments.insert(0, comment.clone());

    store
        .put(COMMENTS_KEY, serde_json::to_string(&comments)?)
        .await?;

    Ok(comment)
}

pub async fn list_comments(store: &dyn KvStore) -> Result<Vec<Comment>, AppError> {
    Ok(load_json(store, COMMENTS_KEY).await?.unwrap_or_default())
}
