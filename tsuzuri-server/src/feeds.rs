use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Message;
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use tokio::sync::RwLock;
use tsuzuri_api::{CommentChange, FeedMessage, PostId, Uuid};

type Subscribers = HashMap<PostId, HashMap<Uuid, mpsc::UnboundedSender<FeedMessage>>>;

/// Websockets listening for comment changes, grouped by the post they watch
#[derive(Clone, Debug)]
pub struct CommentFeeds(Arc<RwLock<Subscribers>>);

impl CommentFeeds {
    pub fn new() -> CommentFeeds {
        CommentFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn add_for_post<W, R>(self, post: PostId, mut write: W, read: R)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
    {
        // Unbounded, so that relaying never waits on a socket while holding the read lock
        let (sender, mut receiver) = mpsc::unbounded();
        let sender_id = Uuid::new_v4();

        self.0
            .write()
            .await
            .entry(post)
            .or_insert_with(HashMap::new)
            .insert(sender_id, sender);

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            macro_rules! remove_self {
                () => {{
                    let mut feeds = this.0.write().await;
                    if let Some(socks) = feeds.get_mut(&post) {
                        socks.remove(&sender_id);
                        if socks.is_empty() {
                            feeds.remove(&post);
                        }
                    }
                    tracing::debug!(?post, "comment feed websocket disconnected");
                    return;
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: FeedMessage = $msg;
                    let json = match serde_json::to_vec(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if write.send(Message::Binary(json)).await.is_err() {
                        remove_self!();
                    }
                }};
            }
            loop {
                select! {
                    msg = receiver.next() => match msg {
                        None => remove_self!(),
                        Some(msg) => send_message!(msg),
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) if msg == "ping" => {
                            send_message!(FeedMessage::Pong)
                        }
                        Some(msg) => {
                            tracing::warn!(?post, "received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }

    pub async fn relay_change(&self, change: CommentChange) {
        if let Some(socks) = self.0.read().await.get(&change.post_id) {
            tracing::trace!(?change, subscribers = socks.len(), "relaying comment change");
            for s in socks.values() {
                let _ = s.unbounded_send(FeedMessage::Change(change));
            }
        }
    }

    #[cfg(test)]
    pub async fn num_subscribers(&self, post: PostId) -> usize {
        self.0.read().await.get(&post).map(|s| s.len()).unwrap_or(0)
    }
}
