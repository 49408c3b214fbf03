use uuid::Uuid;

use crate::{Error, Time, UserId, STUB_UUID};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_POST_LEN: usize = 50_000;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub owner_id: UserId,
    pub date: Time,
    pub updated: Time,

    pub title: String,
    /// Raw text, using the markup syntax
    pub content: String,
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
}

impl NewPost {
    pub fn new(title: String, content: String) -> NewPost {
        NewPost {
            id: PostId(Uuid::new_v4()),
            title,
            content,
            image_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_post_fields(&self.title, &self.content, &self.image_url)
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct PostEdit {
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
}

impl PostEdit {
    pub fn validate(&self) -> Result<(), Error> {
        validate_post_fields(&self.title, &self.content, &self.image_url)
    }
}

fn validate_post_fields(
    title: &str,
    content: &str,
    image_url: &Option<String>,
) -> Result<(), Error> {
    crate::validate_text("title", title, MAX_TITLE_LEN)?;
    crate::validate_text("content", content, MAX_POST_LEN)?;
    if let Some(url) = image_url {
        crate::validate_string(url)?;
    }
    Ok(())
}
