use anyhow::Context;
use chrono::{SubsecRound, Utc};
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Connection, Row};
use tsuzuri_api::{
    AuthToken, Comment, CommentId, NewComment, NewPost, NewSession, NewUser, Post, PostEdit,
    PostId, Time, User, UserId, Uuid,
};

use crate::Error;

/// PostgreSQL keeps microseconds, so values returned to clients are
/// truncated to match what a later read would give
fn now() -> Time {
    Utc::now().trunc_subsecs(6)
}

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    let name_taken = sqlx::query("SELECT 1 FROM users WHERE name = $1")
        .bind(&u.name)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking whether user name {:?} is taken", u.name))?;
    if name_taken.is_some() {
        return Err(Error::name_already_used(u.name));
    }
    let res = sqlx::query(
        "INSERT INTO users (id, name, password_hash) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
    )
    .bind(u.id.0)
    .bind(&u.name)
    .bind(&u.initial_password_hash)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("inserting user {:?}", u.id))?;
    if res.rows_affected() != 1 {
        return Err(Error::uuid_already_used(u.id.0));
    }
    Ok(())
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let Some(user) = sqlx::query("SELECT id, password_hash FROM users WHERE name = $1")
        .bind(&s.user)
        .fetch_optional(&mut *conn)
        .await
        .context("fetching user password hash")?
    else {
        return Ok(None);
    };
    let hash: String = user
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    if !NewUser::verify_password(&hash, &s.password) {
        return Ok(None);
    }
    let user_id: Uuid = user.try_get("id").context("retrieving the id field")?;

    let token = AuthToken(Uuid::new_v4());
    let now = now();
    sqlx::query("INSERT INTO sessions VALUES ($1, $2, $3, $4, $5)")
        .bind(token.0)
        .bind(user_id)
        .bind(&s.device)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("inserting new session")?;
    Ok(Some(token))
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query("UPDATE sessions SET last_active = $1 WHERE id = $2 RETURNING user_id")
        .bind(now())
        .bind(token.0)
        .fetch_optional(conn)
        .await
        .context("recovering session")?
        .ok_or_else(Error::permission_denied)?;
    Ok(UserId(
        row.try_get("user_id")
            .context("retrieving the user_id field")?,
    ))
}

pub async fn fetch_users(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<User>> {
    let mut users = Vec::new();
    let mut rows = sqlx::query("SELECT id, name, avatar_url FROM users ORDER BY id").fetch(conn);
    while let Some(r) = rows.try_next().await.context("querying users table")? {
        users.push(User {
            id: UserId(r.try_get("id").context("retrieving the id field")?),
            name: r.try_get("name").context("retrieving the name field")?,
            avatar_url: r
                .try_get("avatar_url")
                .context("retrieving the avatar_url field")?,
        });
    }
    Ok(users)
}

fn post_from_row(r: &PgRow) -> anyhow::Result<Post> {
    Ok(Post {
        id: PostId(r.try_get("id").context("retrieving the id field")?),
        owner_id: UserId(
            r.try_get("owner_id")
                .context("retrieving the owner_id field")?,
        ),
        date: r.try_get("date").context("retrieving the date field")?,
        updated: r.try_get("updated").context("retrieving the updated field")?,
        title: r.try_get("title").context("retrieving the title field")?,
        content: r.try_get("content").context("retrieving the content field")?,
        image_url: r
            .try_get("image_url")
            .context("retrieving the image_url field")?,
    })
}

fn comment_from_row(r: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(r.try_get("id").context("retrieving the id field")?),
        post_id: PostId(r.try_get("post_id").context("retrieving the post_id field")?),
        author_id: UserId(
            r.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        date: r.try_get("date").context("retrieving the date field")?,
        parent_id: r
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        content: r.try_get("content").context("retrieving the content field")?,
    })
}

/// Most recently updated first
pub async fn fetch_posts(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Post>> {
    let rows = sqlx::query("SELECT * FROM posts ORDER BY updated DESC, id DESC")
        .fetch_all(conn)
        .await
        .context("querying posts table")?;
    rows.iter().map(post_from_row).collect()
}

pub async fn fetch_post(conn: &mut sqlx::PgConnection, post: PostId) -> Result<Post, Error> {
    let row = sqlx::query("SELECT * FROM posts WHERE id = $1")
        .bind(post.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching post {post:?}"))?
        .ok_or_else(|| Error::not_found(post.0))?;
    Ok(post_from_row(&row)?)
}

pub async fn create_post(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    p: NewPost,
) -> Result<Post, Error> {
    let now = now();
    let row = sqlx::query(
        "
            INSERT INTO posts VALUES ($1, $2, $3, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            RETURNING *
        ",
    )
    .bind(p.id.0)
    .bind(owner.0)
    .bind(now)
    .bind(&p.title)
    .bind(&p.content)
    .bind(&p.image_url)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("inserting post {:?}", p.id))?
    .ok_or_else(|| Error::uuid_already_used(p.id.0))?;
    Ok(post_from_row(&row)?)
}

async fn check_post_owner(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    post: PostId,
) -> Result<(), Error> {
    let owner: Uuid = sqlx::query("SELECT owner_id FROM posts WHERE id = $1")
        .bind(post.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching owner of post {post:?}"))?
        .ok_or_else(|| Error::not_found(post.0))?
        .try_get("owner_id")
        .context("retrieving the owner_id field")?;
    if owner != user.0 {
        return Err(Error::permission_denied());
    }
    Ok(())
}

pub async fn edit_post(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    post: PostId,
    e: PostEdit,
) -> Result<Post, Error> {
    check_post_owner(&mut *conn, user, post).await?;
    let row = sqlx::query(
        "
            UPDATE posts
            SET title = $1, content = $2, image_url = $3, updated = $4
            WHERE id = $5
            RETURNING *
        ",
    )
    .bind(&e.title)
    .bind(&e.content)
    .bind(&e.image_url)
    .bind(now())
    .bind(post.0)
    .fetch_one(conn)
    .await
    .with_context(|| format!("updating post {post:?}"))?;
    Ok(post_from_row(&row)?)
}

/// Deletes the post along with all its comments, returning the removed comments
pub async fn delete_post(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    post: PostId,
) -> Result<Vec<CommentId>, Error> {
    check_post_owner(&mut *conn, user, post).await?;
    let mut tx = conn.begin().await.context("starting transaction")?;
    let removed = sqlx::query("DELETE FROM comments WHERE post_id = $1 RETURNING id")
        .bind(post.0)
        .fetch_all(&mut *tx)
        .await
        .with_context(|| format!("deleting comments of post {post:?}"))?
        .iter()
        .map(|r| r.try_get("id").map(CommentId))
        .collect::<Result<Vec<_>, _>>()
        .context("retrieving the id field")?;
    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("deleting post {post:?}"))?;
    tx.commit().await.context("committing post deletion")?;
    Ok(removed)
}

/// Oldest first, ties broken by id
pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> anyhow::Result<Vec<Comment>> {
    let rows = sqlx::query("SELECT * FROM comments WHERE post_id = $1 ORDER BY date, id")
        .bind(post.0)
        .fetch_all(conn)
        .await
        .with_context(|| format!("querying comments of post {post:?}"))?;
    rows.iter().map(comment_from_row).collect()
}

pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    author: UserId,
    c: NewComment,
) -> Result<Comment, Error> {
    let post_exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(c.post_id.0)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking existence of post {:?}", c.post_id))?;
    if post_exists.is_none() {
        return Err(Error::not_found(c.post_id.0));
    }
    let id_taken = sqlx::query("SELECT 1 FROM comments WHERE id = $1")
        .bind(c.id.0)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking whether comment id {:?} is taken", c.id))?;
    if id_taken.is_some() {
        return Err(Error::uuid_already_used(c.id.0));
    }
    if let Some(parent) = c.parent_id {
        let parent_ok = sqlx::query("SELECT 1 FROM comments WHERE id = $1 AND post_id = $2")
            .bind(parent.0)
            .bind(c.post_id.0)
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("checking parent comment {parent:?}"))?;
        if parent_ok.is_none() {
            return Err(Error::invalid_parent(parent.0));
        }
    }
    let row = sqlx::query("INSERT INTO comments VALUES ($1, $2, $3, $4, $5, $6) RETURNING *")
        .bind(c.id.0)
        .bind(c.post_id.0)
        .bind(author.0)
        .bind(now())
        .bind(c.parent_id.map(|p| p.0))
        .bind(&c.content)
        .fetch_one(conn)
        .await
        .with_context(|| format!("inserting comment {:?}", c.id))?;
    Ok(comment_from_row(&row)?)
}

/// Deletes a single comment, returning the post it belonged to. Replies are
/// left in place.
pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    comment: CommentId,
) -> Result<PostId, Error> {
    let row = sqlx::query("SELECT post_id, author_id FROM comments WHERE id = $1")
        .bind(comment.0)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("fetching comment {comment:?}"))?
        .ok_or_else(|| Error::not_found(comment.0))?;
    let author: Uuid = row
        .try_get("author_id")
        .context("retrieving the author_id field")?;
    if author != user.0 {
        return Err(Error::permission_denied());
    }
    let post = PostId(row.try_get("post_id").context("retrieving the post_id field")?);
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting comment {comment:?}"))?;
    Ok(post)
}
