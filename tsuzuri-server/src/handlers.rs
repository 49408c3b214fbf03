use anyhow::Context;
use axum::{
    extract::{ws::Message, Path, State, WebSocketUpgrade},
    Json,
};
use futures::{SinkExt, StreamExt};
use tsuzuri_api::{
    AuthToken, ChangeKind, Comment, CommentChange, CommentId, NewComment, NewPost, NewSession,
    NewUser, Post, PostEdit, PostId, User, UserId, Uuid,
};

use crate::{db, extractors::*, CommentFeeds, Error};

pub async fn admin_create_user(
    _: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or_else(Error::permission_denied)?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

pub async fn fetch_users(mut conn: PgConn) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(
        db::fetch_users(&mut *conn)
            .await
            .context("fetching user list")?,
    ))
}

pub async fn fetch_posts(mut conn: PgConn) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(
        db::fetch_posts(&mut *conn)
            .await
            .context("fetching post list")?,
    ))
}

pub async fn fetch_post(Path(id): Path<Uuid>, mut conn: PgConn) -> Result<Json<Post>, Error> {
    Ok(Json(db::fetch_post(&mut *conn, PostId(id)).await?))
}

pub async fn create_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(p): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    p.validate()?;
    Ok(Json(db::create_post(&mut *conn, user, p).await?))
}

pub async fn edit_post(
    Auth(user): Auth,
    Path(id): Path<Uuid>,
    mut conn: PgConn,
    Json(e): Json<PostEdit>,
) -> Result<Json<Post>, Error> {
    e.validate()?;
    Ok(Json(db::edit_post(&mut *conn, user, PostId(id), e).await?))
}

pub async fn delete_post(
    Auth(user): Auth,
    Path(id): Path<Uuid>,
    State(feeds): State<CommentFeeds>,
    mut conn: PgConn,
) -> Result<(), Error> {
    let post = PostId(id);
    let removed = db::delete_post(&mut *conn, user, post).await?;
    tracing::debug!(?post, comments = removed.len(), "deleted post");
    for comment_id in removed {
        feeds
            .relay_change(CommentChange {
                kind: ChangeKind::Delete,
                post_id: post,
                comment_id,
            })
            .await;
    }
    Ok(())
}

pub async fn fetch_comments(
    Path(id): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(
        db::fetch_comments(&mut *conn, PostId(id))
            .await
            .with_context(|| format!("fetching comments of post {id}"))?,
    ))
}

pub async fn create_comment(
    Auth(user): Auth,
    State(feeds): State<CommentFeeds>,
    mut conn: PgConn,
    Json(c): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    c.validate()?;
    let comment = db::create_comment(&mut *conn, user, c).await?;
    feeds
        .relay_change(CommentChange {
            kind: ChangeKind::Insert,
            post_id: comment.post_id,
            comment_id: comment.id,
        })
        .await;
    Ok(Json(comment))
}

pub async fn delete_comment(
    Auth(user): Auth,
    Path(id): Path<Uuid>,
    State(feeds): State<CommentFeeds>,
    mut conn: PgConn,
) -> Result<(), Error> {
    let comment_id = CommentId(id);
    let post_id = db::delete_comment(&mut *conn, user, comment_id).await?;
    feeds
        .relay_change(CommentChange {
            kind: ChangeKind::Delete,
            post_id,
            comment_id,
        })
        .await;
    Ok(())
}

pub async fn comment_feed(
    ws: WebSocketUpgrade,
    State(feeds): State<CommentFeeds>,
) -> axum::response::Response {
    ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        comment_feed_impl(write, read, feeds)
    })
}

/// The first frame names the post to watch. Anyone may watch any post, as
/// comments are public.
pub async fn comment_feed_impl<W, R>(mut write: W, mut read: R, feeds: CommentFeeds)
where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    tracing::debug!("comment feed websocket connected");
    match read.next().await {
        Some(Ok(Message::Text(post))) => match Uuid::try_parse(&post) {
            Ok(post) => {
                if write.send(Message::Text(String::from("ok"))).await.is_ok() {
                    tracing::debug!(?post, "comment feed websocket subscribed");
                    feeds.add_for_post(PostId(post), write, read).await;
                }
            }
            Err(_) => {
                tracing::debug!(?post, "comment feed websocket sent an invalid post id");
                let _ = write
                    .send(Message::Text(String::from("invalid post id")))
                    .await;
            }
        },
        msg => tracing::debug!(?msg, "comment feed websocket closed before subscribing"),
    }
}
