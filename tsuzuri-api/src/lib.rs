use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

mod auth;
pub use auth::{AuthToken, NewSession, NewUser, BCRYPT_COST};

mod comment;
pub use comment::{Comment, CommentId, NewComment, MAX_COMMENT_LEN};

mod error;
pub use error::Error;

mod feed;
pub use feed::{ChangeKind, CommentChange, FeedMessage};

mod post;
pub use post::{NewPost, Post, PostEdit, PostId, MAX_POST_LEN, MAX_TITLE_LEN};

mod user;
pub use user::{User, UserId};

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

// The `validate` functions throughout tsuzuri-api check what the database
// would refuse or what the UI contract forbids, so that the server and the
// mock server answer identically before touching storage.

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Validates user-entered text: no null byte, not only whitespace, at most
/// `max_chars` characters
pub fn validate_text(field: &str, s: &str, max_chars: usize) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyText(String::from(field)));
    }
    if s.chars().count() > max_chars {
        return Err(Error::TextTooLong {
            field: String::from(field),
            max: max_chars,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_validation() {
        assert_eq!(validate_text("content", "hello", 10), Ok(()));
        assert_eq!(
            validate_text("content", "  \n\t", 10),
            Err(Error::EmptyText(String::from("content")))
        );
        assert_eq!(
            validate_text("content", "hello world", 5),
            Err(Error::TextTooLong {
                field: String::from("content"),
                max: 5
            })
        );
        // the limit counts characters, not bytes
        assert_eq!(validate_text("content", "こんにちは", 5), Ok(()));
        assert_eq!(
            validate_text("content", "a\0b", 10),
            Err(Error::NullByteInString(String::from("a\0b")))
        );
    }
}
