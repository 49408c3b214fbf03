use std::cmp::Reverse;

use crate::{
    api::{Post, UserId},
    markup,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PostOrder {
    #[default]
    Latest,
    Oldest,
}

/// Filter for the post list. All conditions must hold for a post to match.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PostSearch {
    /// Case-insensitive, looked for in the title and the plain text of the content
    pub term: Option<String>,
    pub author: Option<UserId>,
    pub order: PostOrder,
}

impl PostSearch {
    pub fn all() -> PostSearch {
        PostSearch::default()
    }

    pub fn matches(&self, post: &Post) -> bool {
        if let Some(author) = self.author {
            if post.owner_id != author {
                return false;
            }
        }
        match self.term.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                post.title.to_lowercase().contains(&term)
                    || markup::to_plain(&markup::parse(&post.content))
                        .to_lowercase()
                        .contains(&term)
            }
        }
    }

    /// Matching posts, sorted by last update
    pub fn run<'a>(&self, posts: impl IntoIterator<Item = &'a Post>) -> Vec<&'a Post> {
        let mut res = posts
            .into_iter()
            .filter(|p| self.matches(p))
            .collect::<Vec<_>>();
        match self.order {
            PostOrder::Latest => res.sort_unstable_by_key(|p| Reverse((p.updated, p.id))),
            PostOrder::Oldest => res.sort_unstable_by_key(|p| (p.updated, p.id)),
        }
        res
    }
}
