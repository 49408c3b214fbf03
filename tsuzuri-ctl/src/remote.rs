use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::{channel::mpsc, pin_mut, select, FutureExt, SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tsuzuri_client::{
    api::{
        self, AuthToken, Comment, CommentChange, CommentId, FeedMessage, NewComment, NewPost,
        NewSession, NewUser, Post, PostId, User, UserId,
    },
    ChangeFeed, CommentStore,
};

// Pings are sent every PING_INTERVAL
const PING_INTERVAL: Duration = Duration::from_secs(10);
// Without a pong for DISCONNECT_INTERVAL, the feed is considered dead
const DISCONNECT_INTERVAL: Duration = Duration::from_secs(20);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Client for a tsuzuri server, acting on behalf of `token` when set
#[derive(Clone, Debug)]
pub struct RemoteStore {
    client: reqwest::Client,
    host: String,
    token: Option<AuthToken>,
}

impl RemoteStore {
    pub fn new(host: String, token: Option<AuthToken>) -> RemoteStore {
        RemoteStore {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host, path)
    }

    async fn send<R>(&self, req: reqwest::RequestBuilder) -> anyhow::Result<R>
    where
        R: for<'de> serde::Deserialize<'de>,
    {
        let req = match self.token {
            Some(tok) => req.bearer_auth(tok.0),
            None => req,
        };
        let resp = req.send().await.context("sending request to server")?;
        let status = resp.status();
        let body = resp.bytes().await.context("reading server response")?;
        if !status.is_success() {
            return Err(match api::Error::parse(&body) {
                Ok(err) => err.into(),
                Err(_) => anyhow!("server answered {status}"),
            });
        }
        // unit answers come with an empty body
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).context("parsing server response")
    }

    pub async fn auth(&self, session: &NewSession) -> anyhow::Result<AuthToken> {
        self.send(self.client.post(self.url("auth")).json(session))
            .await
    }

    pub async fn unauth(&self) -> anyhow::Result<()> {
        self.send(self.client.post(self.url("unauth"))).await
    }

    pub async fn whoami(&self) -> anyhow::Result<UserId> {
        self.send(self.client.get(self.url("whoami"))).await
    }

    /// Needs the server's admin token rather than a session
    pub async fn admin_create_user(&self, admin: AuthToken, user: &NewUser) -> anyhow::Result<()> {
        self.client
            .post(self.url("admin/create-user"))
            .json(user)
            .bearer_auth(admin.0)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn fetch_users(&self) -> anyhow::Result<Vec<User>> {
        self.send(self.client.get(self.url("fetch-users"))).await
    }

    pub async fn fetch_posts(&self) -> anyhow::Result<Vec<Post>> {
        self.send(self.client.get(self.url("posts"))).await
    }

    pub async fn fetch_post(&self, post: PostId) -> anyhow::Result<Post> {
        self.send(self.client.get(self.url(&format!("posts/{}", post.0))))
            .await
    }

    pub async fn create_post(&self, post: &NewPost) -> anyhow::Result<Post> {
        self.send(self.client.post(self.url("posts")).json(post))
            .await
    }

    fn feed_url(&self) -> anyhow::Result<String> {
        let rest = self
            .host
            .strip_prefix("http")
            .ok_or_else(|| anyhow!("host {:?} is not an http(s) url", self.host))?;
        Ok(format!("ws{rest}/ws/comment-feed"))
    }
}

#[async_trait::async_trait]
impl CommentStore for RemoteStore {
    async fn list_by_post(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
        self.send(
            self.client
                .get(self.url(&format!("posts/{}/comments", post.0))),
        )
        .await
        .with_context(|| format!("fetching comments of post {}", post.0))
    }

    async fn insert(&self, comment: NewComment) -> anyhow::Result<Comment> {
        self.send(self.client.post(self.url("comments")).json(&comment))
            .await
    }

    async fn delete(&self, comment: CommentId) -> anyhow::Result<()> {
        self.send(
            self.client
                .delete(self.url(&format!("comments/{}", comment.0))),
        )
        .await
    }

    async fn subscribe(&self, post: PostId) -> anyhow::Result<ChangeFeed> {
        let url = self.feed_url()?;
        let (mut sock, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("connecting to {url}"))?;
        sock.send(Message::Text(post.0.to_string()))
            .await
            .context("subscribing to comment feed")?;
        match sock.next().await {
            Some(Ok(Message::Text(t))) if t == "ok" => (),
            res => return Err(anyhow!("comment feed refused subscription: {res:?}")),
        }
        tracing::debug!(post = ?post.0, "subscribed to comment feed");
        let (sender, receiver) = mpsc::unbounded();
        tokio::spawn(relay_feed(sock, post, sender));
        Ok(receiver)
    }
}

/// Forwards changes until the socket dies or the `ChangeFeed` is dropped.
/// Returning drops `sender`, which tells the receiver the feed is gone.
async fn relay_feed(sock: Socket, post: PostId, sender: mpsc::UnboundedSender<CommentChange>) {
    let (mut write, read) = sock.split();
    let mut read = read.fuse();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    let mut last_pong = Instant::now();
    while !sender.is_closed() {
        let tick = ping.tick().fuse();
        let pong_deadline = tokio::time::sleep_until(last_pong + DISCONNECT_INTERVAL).fuse();
        pin_mut!(tick, pong_deadline);
        select! {
            _ = tick => {
                if let Err(err) = write.send(Message::Text(String::from("ping"))).await {
                    tracing::warn!(?err, "failed pinging comment feed");
                    break;
                }
            }
            _ = pong_deadline => {
                tracing::warn!(post = ?post.0, "comment feed stopped answering pings");
                break;
            }
            msg = read.next() => {
                let parsed = match msg {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(err)) => {
                        tracing::warn!(?err, "comment feed connection failed");
                        break;
                    }
                    Some(Ok(Message::Text(t))) => serde_json::from_str::<FeedMessage>(&t),
                    Some(Ok(Message::Binary(b))) => serde_json::from_slice::<FeedMessage>(&b),
                    // websocket-level ping and pong frames are answered by tungstenite
                    Some(Ok(_)) => continue,
                };
                match parsed {
                    Ok(FeedMessage::Pong) => last_pong = Instant::now(),
                    Ok(FeedMessage::Change(change)) => {
                        if sender.unbounded_send(change).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(?err, "comment feed sent an unparseable message");
                        break;
                    }
                }
            }
        }
    }
    let _ = write.close().await;
    tracing::debug!(post = ?post.0, "comment feed disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_follows_the_scheme() {
        let store = |host: &str| RemoteStore::new(String::from(host), None);
        assert_eq!(
            store("http://localhost:8000/").feed_url().unwrap(),
            "ws://localhost:8000/ws/comment-feed"
        );
        assert_eq!(
            store("https://blog.example.org").feed_url().unwrap(),
            "wss://blog.example.org/ws/comment-feed"
        );
        assert!(store("blog.example.org").feed_url().is_err());
    }
}
