use uuid::Uuid;

use crate::{Error, PostId, Time, UserId, STUB_UUID};

pub const MAX_COMMENT_LEN: usize = 2000;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// A comment as stored: flat, with an optional reference to the comment it
/// replies to
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub date: Time,

    /// None for top-level comments. May dangle once the parent got deleted.
    pub parent_id: Option<CommentId>,
    pub content: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub content: String,
}

impl NewComment {
    pub fn new(post_id: PostId, parent_id: Option<CommentId>, content: String) -> NewComment {
        NewComment {
            id: CommentId(Uuid::new_v4()),
            post_id,
            parent_id,
            content,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.parent_id == Some(self.id) {
            return Err(Error::InvalidParent(self.id.0));
        }
        crate::validate_text("content", &self.content, MAX_COMMENT_LEN)
    }
}
