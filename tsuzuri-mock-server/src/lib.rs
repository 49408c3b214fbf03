use std::{
    collections::{btree_map, BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{SubsecRound, Utc};
use futures::channel::mpsc;
use tokio::sync::Mutex;
use tsuzuri_client::{
    api::{
        self, AuthToken, ChangeKind, Comment, CommentChange, CommentId, Error, NewComment,
        NewPost, NewSession, NewUser, Post, PostEdit, PostId, Time, UserId, Uuid,
    },
    ChangeFeed, CommentStore,
};

/// In-memory server, answering like the real one down to the error variants
#[derive(Default)]
pub struct MockServer {
    users: BTreeMap<UserId, MockUser>,
    sessions: HashMap<AuthToken, Device>,
    posts: BTreeMap<PostId, Post>,
    comments: BTreeMap<CommentId, Comment>,
    feeds: HashMap<PostId, Vec<mpsc::UnboundedSender<CommentChange>>>,
    offline: bool,
}

#[derive(Debug)]
struct MockUser {
    name: String,
    pass: String,
    pass_hash: String,
}

#[derive(Debug)]
struct Device {
    user: UserId,
    _name: String,
}

fn now() -> Time {
    Utc::now().trunc_subsecs(6)
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    /// Return name & pass for user number `id`
    pub fn test_get_user_info(&self, id: usize) -> (UserId, &str, &str) {
        let (uid, u) = self
            .users
            .iter()
            .nth(id)
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.users.len()));
        (*uid, &u.name, &u.pass)
    }

    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    pub fn test_post(&self, id: usize) -> &Post {
        self.posts
            .values()
            .nth(id)
            .unwrap_or_else(|| panic!("getting post {id} among {}", self.posts.len()))
    }

    pub fn test_num_posts(&self) -> usize {
        self.posts.len()
    }

    pub fn test_comment(&self, id: usize) -> &Comment {
        self.comments
            .values()
            .nth(id)
            .unwrap_or_else(|| panic!("getting comment {id} among {}", self.comments.len()))
    }

    pub fn test_num_comments(&self) -> usize {
        self.comments.len()
    }

    /// While offline, every `MockStore` call fails and live feeds are cut
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
        if offline {
            self.feeds.clear();
        }
    }

    pub fn admin_create_user(&mut self, u: NewUser, password: String) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(MockUser {
                    name: u.name,
                    pass: password,
                    pass_hash: u.initial_password_hash,
                });
                Ok(())
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let (id, _) = self
            .users
            .iter()
            .find(|(_, u)| u.name == s.user && NewUser::verify_password(&u.pass_hash, &s.password))
            .ok_or(Error::PermissionDenied)?;
        let tok = AuthToken(Uuid::new_v4());
        self.sessions.insert(
            tok,
            Device {
                user: *id,
                _name: s.device,
            },
        );
        Ok(tok)
    }

    fn resolve(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.sessions
            .get(&tok)
            .map(|d| d.user)
            .ok_or(Error::PermissionDenied)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        self.sessions
            .remove(&tok)
            .map(|_| ())
            .ok_or(Error::PermissionDenied)
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.resolve(tok)
    }

    pub fn fetch_users(&self) -> Result<Vec<api::User>, Error> {
        Ok(self
            .users
            .iter()
            .map(|(id, u)| api::User {
                id: *id,
                name: u.name.clone(),
                avatar_url: None,
            })
            .collect())
    }

    pub fn fetch_posts(&self) -> Result<Vec<Post>, Error> {
        let mut res = self.posts.values().cloned().collect::<Vec<_>>();
        res.sort_unstable_by(|a, b| (b.updated, b.id).cmp(&(a.updated, a.id)));
        Ok(res)
    }

    pub fn fetch_post(&self, post: PostId) -> Result<Post, Error> {
        self.posts
            .get(&post)
            .cloned()
            .ok_or(Error::NotFound(post.0))
    }

    pub fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<Post, Error> {
        let owner = self.resolve(tok)?;
        p.validate()?;
        match self.posts.entry(p.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(p.id.0)),
            btree_map::Entry::Vacant(entry) => {
                let date = now();
                Ok(entry
                    .insert(Post {
                        id: p.id,
                        owner_id: owner,
                        date,
                        updated: date,
                        title: p.title,
                        content: p.content,
                        image_url: p.image_url,
                    })
                    .clone())
            }
        }
    }

    fn owned_post(&mut self, user: UserId, post: PostId) -> Result<&mut Post, Error> {
        let p = self.posts.get_mut(&post).ok_or(Error::NotFound(post.0))?;
        if p.owner_id != user {
            return Err(Error::PermissionDenied);
        }
        Ok(p)
    }

    pub fn edit_post(&mut self, tok: AuthToken, post: PostId, e: PostEdit) -> Result<Post, Error> {
        let user = self.resolve(tok)?;
        e.validate()?;
        let p = self.owned_post(user, post)?;
        p.title = e.title;
        p.content = e.content;
        p.image_url = e.image_url;
        p.updated = now();
        Ok(p.clone())
    }

    pub fn delete_post(&mut self, tok: AuthToken, post: PostId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        self.owned_post(user, post)?;
        self.posts.remove(&post);
        let removed = self
            .comments
            .values()
            .filter(|c| c.post_id == post)
            .map(|c| c.id)
            .collect::<Vec<_>>();
        for id in removed {
            self.comments.remove(&id);
            self.relay(CommentChange {
                kind: ChangeKind::Delete,
                post_id: post,
                comment_id: id,
            });
        }
        Ok(())
    }

    /// Oldest first, ties broken by id
    pub fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, Error> {
        let mut res = self
            .comments
            .values()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect::<Vec<_>>();
        res.sort_unstable_by_key(|c| (c.date, c.id));
        Ok(res)
    }

    pub fn create_comment(&mut self, tok: AuthToken, c: NewComment) -> Result<Comment, Error> {
        let author = self.resolve(tok)?;
        c.validate()?;
        if !self.posts.contains_key(&c.post_id) {
            return Err(Error::NotFound(c.post_id.0));
        }
        if self.comments.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        if let Some(parent) = c.parent_id {
            if !matches!(self.comments.get(&parent), Some(p) if p.post_id == c.post_id) {
                return Err(Error::InvalidParent(parent.0));
            }
        }
        let comment = Comment {
            id: c.id,
            post_id: c.post_id,
            author_id: author,
            date: now(),
            parent_id: c.parent_id,
            content: c.content,
        };
        self.comments.insert(comment.id, comment.clone());
        self.relay(CommentChange {
            kind: ChangeKind::Insert,
            post_id: comment.post_id,
            comment_id: comment.id,
        });
        Ok(comment)
    }

    pub fn delete_comment(&mut self, tok: AuthToken, comment: CommentId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        let c = self
            .comments
            .get(&comment)
            .ok_or(Error::NotFound(comment.0))?;
        if c.author_id != user {
            return Err(Error::PermissionDenied);
        }
        let post_id = c.post_id;
        self.comments.remove(&comment);
        self.relay(CommentChange {
            kind: ChangeKind::Delete,
            post_id,
            comment_id: comment,
        });
        Ok(())
    }

    pub fn comment_feed(&mut self, post: PostId) -> ChangeFeed {
        let (sender, receiver) = mpsc::unbounded();
        self.feeds.entry(post).or_default().push(sender);
        receiver
    }

    fn relay(&mut self, change: CommentChange) {
        if let Some(feeds) = self.feeds.get_mut(&change.post_id) {
            feeds.retain_mut(|f| f.unbounded_send(change).is_ok());
        }
    }
}

/// `CommentStore` backed by a shared `MockServer`, acting through one session
#[derive(Clone)]
pub struct MockStore {
    server: Arc<Mutex<MockServer>>,
    token: AuthToken,
}

impl MockStore {
    pub fn new(server: Arc<Mutex<MockServer>>, token: AuthToken) -> MockStore {
        MockStore { server, token }
    }

    pub fn server(&self) -> &Arc<Mutex<MockServer>> {
        &self.server
    }
}

macro_rules! online {
    ($server:expr) => {{
        let server = $server;
        if server.offline {
            anyhow::bail!("mock server is offline");
        }
        server
    }};
}

#[async_trait::async_trait]
impl CommentStore for MockStore {
    async fn list_by_post(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
        Ok(online!(self.server.lock().await).fetch_comments(post)?)
    }

    async fn insert(&self, comment: NewComment) -> anyhow::Result<Comment> {
        Ok(online!(self.server.lock().await).create_comment(self.token, comment)?)
    }

    async fn delete(&self, comment: CommentId) -> anyhow::Result<()> {
        Ok(online!(self.server.lock().await).delete_comment(self.token, comment)?)
    }

    async fn subscribe(&self, post: PostId) -> anyhow::Result<ChangeFeed> {
        Ok(online!(self.server.lock().await).comment_feed(post))
    }
}
