use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tsuzuri_client::{
    api::{AuthToken, NewPost, NewSession, NewUser, PostId, UserId, Uuid},
    Draft, LiveThread, LiveThreadHandle, LoadStatus, SyncError, ThreadConfig, ThreadState,
};
use tsuzuri_mock_server::{MockServer, MockStore};

struct Session {
    user: UserId,
    store: Arc<MockStore>,
}

struct Blog {
    server: Arc<Mutex<MockServer>>,
    post: PostId,
    alice: Session,
    bob: Session,
}

async fn blog() -> Blog {
    let server = Arc::new(Mutex::new(MockServer::new()));
    let mut s = server.lock().await;
    let mut login = |name: &str| {
        let user = UserId(Uuid::new_v4());
        s.admin_create_user(
            NewUser::with_cost(user, String::from(name), name, 4),
            String::from(name),
        )
        .unwrap();
        let tok = s
            .auth(NewSession {
                user: String::from(name),
                password: String::from(name),
                device: String::from("tests"),
            })
            .unwrap();
        (user, tok)
    };
    let (alice, alice_tok) = login("alice");
    let (bob, bob_tok) = login("bob");
    let post = s
        .create_post(
            alice_tok,
            NewPost::new(String::from("Hello"), String::from("First post!")),
        )
        .unwrap()
        .id;
    drop(s);
    let session = |user: UserId, tok: AuthToken| Session {
        user,
        store: Arc::new(MockStore::new(server.clone(), tok)),
    };
    Blog {
        post,
        alice: session(alice, alice_tok),
        bob: session(bob, bob_tok),
        server,
    }
}

fn follow(session: &Session, post: PostId) -> LiveThreadHandle {
    LiveThread::spawn(session.store.clone(), post, ThreadConfig::default())
}

async fn wait_for(
    h: &LiveThreadHandle,
    mut cond: impl FnMut(&ThreadState) -> bool,
) -> ThreadState {
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

fn draft(content: &str) -> Draft {
    Draft {
        content: String::from(content),
        reply_to: None,
    }
}

#[tokio::test]
async fn sessions_see_each_other_live() {
    let b = blog().await;
    let alice = follow(&b.alice, b.post);
    let bob = follow(&b.bob, b.post);
    wait_for(&alice, ready).await;
    assert!(wait_for(&bob, ready).await.live);

    let root = alice
        .submit(&mut draft("Welcome!"), Some(b.alice.user))
        .await
        .unwrap();
    let s = wait_for(&bob, |s| s.thread.contains(root.id)).await;
    assert_eq!(s.thread.roots[0].comment.author_id, b.alice.user);

    let mut reply = Draft {
        content: String::from("Thanks!"),
        reply_to: Some(root.id),
    };
    let reply = bob.submit(&mut reply, Some(b.bob.user)).await.unwrap();
    let s = wait_for(&alice, |s| s.thread.contains(reply.id)).await;
    assert_eq!(s.thread.parent_of(reply.id), Some(root.id));
    let node = &s.thread.roots[0].replies[0];
    assert_eq!(node.depth, 1);
    assert_eq!(node.reply_to.as_ref().map(|r| r.snippet.as_str()), Some("Welcome!"));
}

#[tokio::test]
async fn deleted_parent_leaves_reply_as_root() {
    let b = blog().await;
    let alice = follow(&b.alice, b.post);
    let bob = follow(&b.bob, b.post);
    wait_for(&alice, ready).await;
    wait_for(&bob, ready).await;

    let root = alice
        .submit(&mut draft("Question?"), Some(b.alice.user))
        .await
        .unwrap();
    wait_for(&bob, |s| s.thread.contains(root.id)).await;
    let mut d = Draft {
        content: String::from("Answer."),
        reply_to: Some(root.id),
    };
    let reply = bob.submit(&mut d, Some(b.bob.user)).await.unwrap();
    wait_for(&alice, |s| s.thread.contains(reply.id)).await;

    // only the author may delete
    assert!(matches!(
        bob.delete(root.id, Some(b.bob.user)).await,
        Err(SyncError::NotAuthor(id)) if id == root.id
    ));
    alice.delete(root.id, Some(b.alice.user)).await.unwrap();

    for h in [&alice, &bob] {
        let s = wait_for(h, |s| !s.thread.contains(root.id)).await;
        assert_eq!(s.thread.len(), 1);
        assert_eq!(s.thread.roots[0].id(), reply.id);
        assert_eq!(s.thread.roots[0].depth, 0);
    }
}

#[tokio::test]
async fn offline_store_keeps_thread_and_draft() {
    let b = blog().await;
    let alice = follow(&b.alice, b.post);
    wait_for(&alice, ready).await;
    let first = alice
        .submit(&mut draft("Before the outage"), Some(b.alice.user))
        .await
        .unwrap();
    wait_for(&alice, |s| s.thread.contains(first.id)).await;

    b.server.lock().await.set_offline(true);
    let s = wait_for(&alice, |s| !s.live).await;
    assert_eq!(s.thread.len(), 1);

    let mut d = draft("During the outage");
    assert!(matches!(
        alice.submit(&mut d, Some(b.alice.user)).await,
        Err(SyncError::Store(_))
    ));
    assert_eq!(d.content, "During the outage");

    alice.refresh().unwrap();
    let s = wait_for(&alice, |s| s.error.is_some()).await;
    assert_eq!(s.status, LoadStatus::Ready);
    assert!(s.thread.contains(first.id));

    b.server.lock().await.set_offline(false);
    // the feed is subscribed again without any call from the reader
    wait_for(&alice, |s| s.live).await;
    let second = alice.submit(&mut d, Some(b.alice.user)).await.unwrap();
    assert_eq!(d, Draft::default());
    let s = wait_for(&alice, |s| s.thread.contains(second.id)).await;
    assert_eq!(s.error, None);

    // and changes made by others arrive again
    let bob = follow(&b.bob, b.post);
    wait_for(&bob, ready).await;
    let third = bob
        .submit(&mut draft("After the outage"), Some(b.bob.user))
        .await
        .unwrap();
    let s = wait_for(&alice, |s| s.thread.contains(third.id)).await;
    assert!(s.live);
    assert_eq!(s.thread.len(), 3);
}

#[tokio::test]
async fn failed_first_load_is_reported() {
    let b = blog().await;
    b.server.lock().await.set_offline(true);
    let alice = follow(&b.alice, b.post);
    let s = wait_for(&alice, |s| s.status != LoadStatus::Loading).await;
    assert!(matches!(s.status, LoadStatus::Failed(_)));
    assert!(!s.live);

    b.server.lock().await.set_offline(false);
    alice.refresh().unwrap();
    let s = wait_for(&alice, ready).await;
    assert!(s.thread.is_empty());
}

#[tokio::test]
async fn anonymous_readers_cannot_write() {
    let b = blog().await;
    let h = follow(&b.bob, b.post);
    wait_for(&h, ready).await;
    let mut d = draft("hi");
    assert!(matches!(
        h.submit(&mut d, None).await,
        Err(SyncError::NotLoggedIn)
    ));
    assert_eq!(d.content, "hi");
    assert!(matches!(
        h.submit(&mut draft("   "), Some(b.bob.user)).await,
        Err(SyncError::EmptyDraft)
    ));
}

#[tokio::test]
async fn switching_post_follows_the_new_one() {
    let b = blog().await;
    let other = {
        let mut s = b.server.lock().await;
        let alice_tok = s
            .auth(NewSession {
                user: String::from("alice"),
                password: String::from("alice"),
                device: String::from("tests"),
            })
            .unwrap();
        s.create_post(
            alice_tok,
            NewPost::new(String::from("Other"), String::from("Second post")),
        )
        .unwrap()
        .id
    };
    let alice = follow(&b.alice, b.post);
    wait_for(&alice, ready).await;
    let old = alice
        .submit(&mut draft("on the first post"), Some(b.alice.user))
        .await
        .unwrap();
    wait_for(&alice, |s| s.thread.contains(old.id)).await;

    alice.switch_post(other).unwrap();
    let s = wait_for(&alice, |s| s.post == other && ready(s)).await;
    assert!(s.thread.is_empty());

    // changes to the first post no longer matter, changes to the new one do
    let bob = follow(&b.bob, other);
    wait_for(&bob, ready).await;
    let new = bob
        .submit(&mut draft("on the second post"), Some(b.bob.user))
        .await
        .unwrap();
    let s = wait_for(&alice, |s| s.thread.contains(new.id)).await;
    assert!(!s.thread.contains(old.id));
}

#[tokio::test]
async fn deleting_the_post_empties_the_thread() {
    let b = blog().await;
    let bob = follow(&b.bob, b.post);
    wait_for(&bob, ready).await;
    let c = bob
        .submit(&mut draft("Nice post"), Some(b.bob.user))
        .await
        .unwrap();
    wait_for(&bob, |s| s.thread.contains(c.id)).await;

    {
        let mut s = b.server.lock().await;
        let alice_tok = s
            .auth(NewSession {
                user: String::from("alice"),
                password: String::from("alice"),
                device: String::from("tests"),
            })
            .unwrap();
        s.delete_post(alice_tok, b.post).unwrap();
    }
    let s = wait_for(&bob, |s| s.thread.is_empty()).await;
    assert_eq!(s.status, LoadStatus::Ready);
}
