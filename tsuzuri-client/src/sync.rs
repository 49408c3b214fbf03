use std::{sync::Arc, time::Duration};

use futures::{
    channel::{mpsc, oneshot},
    future::BoxFuture,
    pin_mut, select,
    stream::FuturesUnordered,
    FutureExt, StreamExt,
};
use tokio::sync::watch;

use crate::{
    api::{Comment, CommentChange, CommentId, NewComment, PostId, UserId},
    thread::{Thread, ThreadConfig},
};

// While the change feed is down, try subscribing again every RESUBSCRIBE_SPACING
const RESUBSCRIBE_SPACING: Duration = Duration::from_secs(1);

/// Stream of change notifications for one post. Dropping it unsubscribes.
pub type ChangeFeed = mpsc::UnboundedReceiver<CommentChange>;

/// Where comments live. Implementations handle authentication themselves:
/// `insert` and `delete` act on behalf of the store's session.
#[async_trait::async_trait]
pub trait CommentStore: 'static + Send + Sync {
    /// All comments of a post, in no particular order
    async fn list_by_post(&self, post: PostId) -> anyhow::Result<Vec<Comment>>;

    /// Returns the comment as stored, with its author and date set
    async fn insert(&self, comment: NewComment) -> anyhow::Result<Comment>;

    async fn delete(&self, comment: CommentId) -> anyhow::Result<()>;

    async fn subscribe(&self, post: PostId) -> anyhow::Result<ChangeFeed>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadStatus {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct ThreadState {
    pub post: PostId,
    pub status: LoadStatus,
    pub thread: Arc<Thread>,

    /// A submission or deletion is in flight
    pub pending: bool,

    /// Changes from other clients are being received
    pub live: bool,

    /// Last refresh failure while a thread was already displayed
    pub error: Option<String>,
}

impl ThreadState {
    fn loading(post: PostId) -> ThreadState {
        ThreadState {
            post,
            status: LoadStatus::Loading,
            thread: Arc::new(Thread::default()),
            pending: false,
            live: false,
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Log in to comment")]
    NotLoggedIn,

    #[error("Another change is still being saved")]
    Busy,

    #[error("Cannot post an empty comment")]
    EmptyDraft,

    #[error("Comment {0:?} was written by someone else")]
    NotAuthor(CommentId),

    #[error("Comment {0:?} is not part of this thread")]
    UnknownComment(CommentId),

    #[error("Thread synchronization stopped")]
    Closed,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Comment being written. Only cleared once the store accepted it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Draft {
    pub content: String,
    pub reply_to: Option<CommentId>,
}

enum Command {
    Submit {
        content: String,
        reply_to: Option<CommentId>,
        author: UserId,
        reply: oneshot::Sender<Result<Comment, SyncError>>,
    },
    Delete {
        comment: CommentId,
        user: UserId,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    SwitchPost(PostId),
    Refresh,
}

enum Done {
    Submitted {
        res: anyhow::Result<Comment>,
        author: UserId,
        reply: oneshot::Sender<Result<Comment, SyncError>>,
    },
    Deleted {
        res: anyhow::Result<()>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
}

enum Event {
    Command(Option<Command>),
    Change(Option<CommentChange>),
    Done(Done),
    Resubscribe,
}

/// Keeps the thread of one post in sync with a `CommentStore`.
///
/// Everything happens on a single task: the state is only ever mutated
/// there, and published to the handles through a watch channel.
pub struct LiveThread<S> {
    store: Arc<S>,
    config: ThreadConfig,
    post: PostId,
    state: watch::Sender<ThreadState>,
}

impl<S: CommentStore> LiveThread<S> {
    /// Starts syncing `post`. The task stops once all handles are dropped.
    pub fn spawn(store: Arc<S>, post: PostId, config: ThreadConfig) -> LiveThreadHandle {
        let (state, state_rx) = watch::channel(ThreadState::loading(post));
        let (commands, commands_rx) = mpsc::unbounded();
        let this = LiveThread {
            store,
            config,
            post,
            state,
        };
        tokio::spawn(this.run(commands_rx));
        LiveThreadHandle {
            commands,
            state: state_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut feed = self.subscribe().await;
        self.refetch().await;
        let mut in_flight = FuturesUnordered::<BoxFuture<'static, Done>>::new();
        let mut resubscribe = tokio::time::interval(RESUBSCRIBE_SPACING);
        resubscribe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let event = {
                let live = feed.is_some();
                let retry = async {
                    match live {
                        true => futures::future::pending::<()>().await,
                        false => {
                            resubscribe.tick().await;
                        }
                    }
                }
                .fuse();
                let change = async {
                    match feed.as_mut() {
                        Some(f) => f.next().await,
                        None => futures::future::pending::<Option<CommentChange>>().await,
                    }
                }
                .fuse();
                pin_mut!(change, retry);
                select! {
                    c = commands.next() => Event::Command(c),
                    c = change => Event::Change(c),
                    d = in_flight.select_next_some() => Event::Done(d),
                    _ = retry => Event::Resubscribe,
                }
            };

            match event {
                Event::Command(None) => break,
                Event::Command(Some(Command::Submit {
                    content,
                    reply_to,
                    author,
                    reply,
                })) => {
                    if !in_flight.is_empty() {
                        let _ = reply.send(Err(SyncError::Busy));
                        continue;
                    }
                    if let Some(parent) = reply_to {
                        if !self.state.borrow().thread.contains(parent) {
                            let _ = reply.send(Err(SyncError::UnknownComment(parent)));
                            continue;
                        }
                    }
                    let comment = NewComment::new(self.post, reply_to, content);
                    if let Err(e) = comment.validate() {
                        let _ = reply.send(Err(SyncError::Store(e.into())));
                        continue;
                    }
                    tracing::debug!(comment = ?comment.id, post = ?self.post, "submitting comment");
                    let store = self.store.clone();
                    in_flight.push(Box::pin(async move {
                        Done::Submitted {
                            res: store.insert(comment).await,
                            author,
                            reply,
                        }
                    }));
                    self.state.send_modify(|s| s.pending = true);
                }
                Event::Command(Some(Command::Delete {
                    comment,
                    user,
                    reply,
                })) => {
                    if !in_flight.is_empty() {
                        let _ = reply.send(Err(SyncError::Busy));
                        continue;
                    }
                    let author = self
                        .state
                        .borrow()
                        .thread
                        .find(comment)
                        .map(|n| n.comment.author_id);
                    match author {
                        None => {
                            let _ = reply.send(Err(SyncError::UnknownComment(comment)));
                        }
                        Some(a) if a != user => {
                            let _ = reply.send(Err(SyncError::NotAuthor(comment)));
                        }
                        Some(_) => {
                            tracing::debug!(?comment, "deleting comment");
                            let store = self.store.clone();
                            in_flight.push(Box::pin(async move {
                                Done::Deleted {
                                    res: store.delete(comment).await,
                                    reply,
                                }
                            }));
                            self.state.send_modify(|s| s.pending = true);
                        }
                    }
                }
                Event::Command(Some(Command::SwitchPost(post))) => {
                    // release the old subscription before taking the new one
                    drop(feed.take());
                    self.post = post;
                    self.state.send_modify(|s| *s = ThreadState {
                        pending: s.pending,
                        ..ThreadState::loading(post)
                    });
                    feed = self.subscribe().await;
                    self.refetch().await;
                }
                Event::Command(Some(Command::Refresh)) => self.refetch().await,
                Event::Change(Some(change)) => {
                    let mut relevant = change.post_id == self.post;
                    // one rebuild covers every change already queued
                    let mut queued = 0;
                    if let Some(f) = feed.as_mut() {
                        while let Ok(Some(c)) = f.try_next() {
                            relevant |= c.post_id == self.post;
                            queued += 1;
                        }
                    }
                    if relevant {
                        tracing::trace!(?change, queued, "comments changed, refreshing");
                        self.refetch().await;
                    } else {
                        tracing::debug!(?change, "ignoring change for another post");
                    }
                }
                Event::Resubscribe => {
                    feed = self.subscribe().await;
                    if feed.is_some() {
                        tracing::info!(post = ?self.post, "change feed is back");
                        // changes made while we were not listening
                        self.refetch().await;
                    }
                }
                Event::Change(None) => {
                    tracing::warn!(post = ?self.post, "change feed closed, subscribing again");
                    feed = None;
                    self.state.send_modify(|s| s.live = false);
                }
                Event::Done(done) => {
                    self.state.send_modify(|s| s.pending = false);
                    let succeeded = match done {
                        Done::Submitted { res, author, reply } => {
                            let res = res.map_err(|err| {
                                tracing::warn!(?err, "failed submitting comment");
                                SyncError::Store(err)
                            });
                            if let Ok(c) = &res {
                                if c.author_id != author {
                                    tracing::warn!(
                                        expected = ?author,
                                        got = ?c.author_id,
                                        "store attributed comment to another user"
                                    );
                                }
                            }
                            let ok = res.is_ok();
                            let _ = reply.send(res);
                            ok
                        }
                        Done::Deleted { res, reply } => {
                            let res = res.map_err(|err| {
                                tracing::warn!(?err, "failed deleting comment");
                                SyncError::Store(err)
                            });
                            let ok = res.is_ok();
                            let _ = reply.send(res);
                            ok
                        }
                    };
                    // without a feed, nothing else would tell us about our own change
                    if succeeded && feed.is_none() {
                        self.refetch().await;
                    }
                }
            }
        }

        // let writes that were already sent finish on their own
        for f in in_flight {
            tokio::spawn(f);
        }
        tracing::debug!(post = ?self.post, "thread synchronization stopped");
    }

    async fn subscribe(&mut self) -> Option<ChangeFeed> {
        match self.store.subscribe(self.post).await {
            Ok(feed) => {
                self.state
                    .send_if_modified(|s| !std::mem::replace(&mut s.live, true));
                Some(feed)
            }
            Err(err) => {
                tracing::warn!(?err, post = ?self.post, "failed subscribing to comment changes");
                // retries run every second, only wake viewers on an actual change
                self.state
                    .send_if_modified(|s| std::mem::replace(&mut s.live, false));
                None
            }
        }
    }

    async fn refetch(&mut self) {
        let post = self.post;
        match self.store.list_by_post(post).await {
            Ok(comments) => {
                let thread = Arc::new(Thread::build(&comments, &self.config));
                self.state.send_modify(|s| {
                    s.thread = thread;
                    s.status = LoadStatus::Ready;
                    s.error = None;
                });
            }
            Err(err) => {
                tracing::warn!(?err, ?post, "failed fetching comments");
                let msg = format!("{err:#}");
                self.state.send_modify(|s| {
                    if s.status == LoadStatus::Ready {
                        s.error = Some(msg);
                    } else {
                        s.status = LoadStatus::Failed(msg);
                    }
                });
            }
        }
    }
}

/// Cheap to clone. All clones drive the same `LiveThread`.
#[derive(Clone)]
pub struct LiveThreadHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ThreadState>,
}

impl LiveThreadHandle {
    pub fn current(&self) -> ThreadState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<ThreadState> {
        self.state.clone()
    }

    /// Posts the draft as `user`. The draft is cleared only if the store
    /// accepted the comment; the thread itself updates through the change feed.
    pub async fn submit(&self, draft: &mut Draft, user: Option<UserId>) -> Result<Comment, SyncError> {
        let author = user.ok_or(SyncError::NotLoggedIn)?;
        let content = draft.content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyDraft);
        }
        let (reply, res) = oneshot::channel();
        self.send(Command::Submit {
            content: content.to_string(),
            reply_to: draft.reply_to,
            author,
            reply,
        })?;
        let comment = res.await.map_err(|_| SyncError::Closed)??;
        *draft = Draft::default();
        Ok(comment)
    }

    pub async fn delete(&self, comment: CommentId, user: Option<UserId>) -> Result<(), SyncError> {
        let user = user.ok_or(SyncError::NotLoggedIn)?;
        let (reply, res) = oneshot::channel();
        self.send(Command::Delete {
            comment,
            user,
            reply,
        })?;
        res.await.map_err(|_| SyncError::Closed)?
    }

    /// Drops the current thread and subscription, and starts over with `post`
    pub fn switch_post(&self, post: PostId) -> Result<(), SyncError> {
        self.send(Command::SwitchPost(post))
    }

    pub fn refresh(&self) -> Result<(), SyncError> {
        self.send(Command::Refresh)
    }

    fn send(&self, c: Command) -> Result<(), SyncError> {
        self.commands
            .unbounded_send(c)
            .map_err(|_| SyncError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex, time::Duration};

    use super::*;
    use crate::api::{ChangeKind, Uuid};
    use crate::thread::tests::comment;

    /// In-memory store whose feed is driven by the test
    #[derive(Default)]
    struct TestStore {
        comments: Mutex<Vec<Comment>>,
        feeds: Mutex<Vec<mpsc::UnboundedSender<CommentChange>>>,
        fail_fetch: Mutex<bool>,
        fail_insert: Mutex<bool>,
        fail_subscribe: Mutex<bool>,
        fetches: Mutex<HashMap<PostId, usize>>,
    }

    impl TestStore {
        fn notify(&self, change: CommentChange) {
            self.feeds
                .lock()
                .unwrap()
                .retain(|f| f.unbounded_send(change).is_ok());
        }
    }

    #[async_trait::async_trait]
    impl CommentStore for TestStore {
        async fn list_by_post(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
            *self.fetches.lock().unwrap().entry(post).or_default() += 1;
            if *self.fail_fetch.lock().unwrap() {
                anyhow::bail!("network is down");
            }
            Ok(self
                .comments
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.post_id == post)
                .cloned()
                .collect())
        }

        async fn insert(&self, c: NewComment) -> anyhow::Result<Comment> {
            if *self.fail_insert.lock().unwrap() {
                anyhow::bail!("network is down");
            }
            let res = Comment {
                id: c.id,
                post_id: c.post_id,
                author_id: UserId::stub(),
                date: chrono::Utc::now(),
                parent_id: c.parent_id,
                content: c.content,
            };
            self.comments.lock().unwrap().push(res.clone());
            self.notify(CommentChange {
                kind: ChangeKind::Insert,
                post_id: res.post_id,
                comment_id: res.id,
            });
            Ok(res)
        }

        async fn delete(&self, id: CommentId) -> anyhow::Result<()> {
            let post = {
                let mut comments = self.comments.lock().unwrap();
                let idx = comments
                    .iter()
                    .position(|c| c.id == id)
                    .ok_or_else(|| anyhow::anyhow!("no such comment"))?;
                comments.remove(idx).post_id
            };
            self.notify(CommentChange {
                kind: ChangeKind::Delete,
                post_id: post,
                comment_id: id,
            });
            Ok(())
        }

        async fn subscribe(&self, _post: PostId) -> anyhow::Result<ChangeFeed> {
            if *self.fail_subscribe.lock().unwrap() {
                anyhow::bail!("network is down");
            }
            let (sender, receiver) = mpsc::unbounded();
            self.feeds.lock().unwrap().push(sender);
            Ok(receiver)
        }
    }

    async fn wait_for(h: &LiveThreadHandle, mut cond: impl FnMut(&ThreadState) -> bool) -> ThreadState {
        let mut rx = h.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let s = rx.borrow_and_update();
                    if cond(&s) {
                        return s.clone();
                    }
                }
                rx.changed().await.expect("sync task died");
            }
        })
        .await
        .expect("timed out waiting for thread state")
    }

    fn ready(s: &ThreadState) -> bool {
        s.status == LoadStatus::Ready
    }

    #[tokio::test]
    async fn loads_then_follows_changes() {
        let store = Arc::new(TestStore::default());
        store.comments.lock().unwrap().push(comment(1, None, 0));
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        let s = wait_for(&h, ready).await;
        assert_eq!(s.thread.len(), 1);
        assert!(s.live);

        // someone else replies
        store.comments.lock().unwrap().push(comment(2, Some(1), 1));
        store.notify(CommentChange {
            kind: ChangeKind::Insert,
            post_id: PostId::stub(),
            comment_id: comment(2, None, 0).id,
        });
        let s = wait_for(&h, |s| s.thread.len() == 2).await;
        assert_eq!(s.thread.roots[0].replies.len(), 1);
    }

    #[tokio::test]
    async fn submit_clears_draft_only_on_success() {
        let store = Arc::new(TestStore::default());
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;
        let me = Some(UserId::stub());

        let mut draft = Draft {
            content: String::from("  hello  "),
            reply_to: None,
        };
        *store.fail_insert.lock().unwrap() = true;
        assert!(matches!(h.submit(&mut draft, me).await, Err(SyncError::Store(_))));
        assert_eq!(draft.content, "  hello  ");
        assert!(!h.current().pending);

        *store.fail_insert.lock().unwrap() = false;
        let c = h.submit(&mut draft, me).await.unwrap();
        assert_eq!(c.content, "hello");
        assert_eq!(draft, Draft::default());
        wait_for(&h, |s| s.thread.contains(c.id)).await;
    }

    #[tokio::test]
    async fn submit_rejections() {
        let store = Arc::new(TestStore::default());
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;

        let mut draft = Draft {
            content: String::from("hi"),
            reply_to: None,
        };
        assert!(matches!(h.submit(&mut draft, None).await, Err(SyncError::NotLoggedIn)));

        draft.content = String::from(" \n ");
        assert!(matches!(
            h.submit(&mut draft, Some(UserId::stub())).await,
            Err(SyncError::EmptyDraft)
        ));

        let ghost = CommentId(Uuid::new_v4());
        draft = Draft {
            content: String::from("hi"),
            reply_to: Some(ghost),
        };
        assert!(matches!(
            h.submit(&mut draft, Some(UserId::stub())).await,
            Err(SyncError::UnknownComment(c)) if c == ghost
        ));
        assert!(store.comments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_authors_delete() {
        let store = Arc::new(TestStore::default());
        store.comments.lock().unwrap().push(comment(1, None, 0));
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;
        let id = comment(1, None, 0).id;

        let stranger = Some(UserId(Uuid::new_v4()));
        assert!(matches!(h.delete(id, stranger).await, Err(SyncError::NotAuthor(_))));
        assert_eq!(h.current().thread.len(), 1);

        h.delete(id, Some(UserId::stub())).await.unwrap();
        wait_for(&h, |s| s.thread.is_empty()).await;
    }

    #[tokio::test]
    async fn other_posts_are_ignored() {
        let store = Arc::new(TestStore::default());
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;
        let other = PostId(Uuid::new_v4());
        store.notify(CommentChange {
            kind: ChangeKind::Insert,
            post_id: other,
            comment_id: CommentId::stub(),
        });
        // foreign changes never trigger a fetch, whichever order these get processed in
        h.refresh().unwrap();
        wait_for(&h, |_| store.fetches.lock().unwrap()[&PostId::stub()] >= 2).await;
        assert_eq!(store.fetches.lock().unwrap()[&PostId::stub()], 2);
        assert!(!store.fetches.lock().unwrap().contains_key(&other));
    }

    #[tokio::test]
    async fn queued_changes_share_one_refetch() {
        let store = Arc::new(TestStore::default());
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;
        assert_eq!(store.fetches.lock().unwrap()[&PostId::stub()], 1);

        // a whole batch lands before the sync task gets to run
        for i in 1..=5 {
            store.comments.lock().unwrap().push(comment(i, None, i as i64));
            store.notify(CommentChange {
                kind: ChangeKind::Insert,
                post_id: PostId::stub(),
                comment_id: comment(i, None, 0).id,
            });
        }
        wait_for(&h, |s| s.thread.len() == 5).await;
        h.refresh().unwrap();
        wait_for(&h, |_| store.fetches.lock().unwrap()[&PostId::stub()] >= 3).await;
        assert_eq!(store.fetches.lock().unwrap()[&PostId::stub()], 3);
    }

    #[tokio::test]
    async fn lost_feed_is_subscribed_again() {
        let store = Arc::new(TestStore::default());
        *store.fail_subscribe.lock().unwrap() = true;
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        let s = wait_for(&h, ready).await;
        assert!(!s.live);

        // written while nobody was listening
        store.comments.lock().unwrap().push(comment(1, None, 0));
        *store.fail_subscribe.lock().unwrap() = false;
        wait_for(&h, |s| s.live && s.thread.len() == 1).await;
        assert_eq!(store.feeds.lock().unwrap().len(), 1);

        // a closed feed is replaced as well
        store.feeds.lock().unwrap().clear();
        wait_for(&h, |s| s.live && store.feeds.lock().unwrap().len() == 1).await;
        store.comments.lock().unwrap().push(comment(2, Some(1), 1));
        store.notify(CommentChange {
            kind: ChangeKind::Insert,
            post_id: PostId::stub(),
            comment_id: comment(2, None, 0).id,
        });
        wait_for(&h, |s| s.thread.len() == 2).await;
    }

    #[tokio::test]
    async fn failed_refresh_keeps_thread() {
        let store = Arc::new(TestStore::default());
        store.comments.lock().unwrap().push(comment(1, None, 0));
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;

        *store.fail_fetch.lock().unwrap() = true;
        h.refresh().unwrap();
        let s = wait_for(&h, |s| s.error.is_some()).await;
        assert_eq!(s.status, LoadStatus::Ready);
        assert_eq!(s.thread.len(), 1);

        *store.fail_fetch.lock().unwrap() = false;
        h.refresh().unwrap();
        wait_for(&h, |s| s.error.is_none()).await;
    }

    #[tokio::test]
    async fn first_load_failure_is_reported() {
        let store = Arc::new(TestStore::default());
        *store.fail_fetch.lock().unwrap() = true;
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        let s = wait_for(&h, |s| matches!(s.status, LoadStatus::Failed(_))).await;
        assert!(s.thread.is_empty());
    }

    #[tokio::test]
    async fn switching_posts_resubscribes() {
        let store = Arc::new(TestStore::default());
        let other = PostId(Uuid::new_v4());
        let mut c = comment(7, None, 0);
        c.post_id = other;
        store.comments.lock().unwrap().push(c);
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;

        h.switch_post(other).unwrap();
        let s = wait_for(&h, |s| s.post == other && ready(s)).await;
        assert_eq!(s.thread.len(), 1);

        // the first subscription was released
        store.notify(CommentChange {
            kind: ChangeKind::Update,
            post_id: other,
            comment_id: CommentId::stub(),
        });
        assert_eq!(store.feeds.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_handles_stops_the_task() {
        let store = Arc::new(TestStore::default());
        let h = LiveThread::spawn(store.clone(), PostId::stub(), ThreadConfig::default());
        wait_for(&h, ready).await;
        let mut rx = h.watch();
        drop(h);
        // the sender side of the watch channel goes away with the task
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.changed().await.is_ok() {}
        })
        .await
        .unwrap();
    }
}
