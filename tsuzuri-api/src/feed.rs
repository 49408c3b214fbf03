use crate::{CommentId, PostId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Notification that a comment of `post_id` changed. Carries no payload:
/// subscribers are expected to refetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentChange {
    pub kind: ChangeKind,
    pub post_id: PostId,
    pub comment_id: CommentId,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Change(CommentChange),
}
