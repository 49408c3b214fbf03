use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use structopt::StructOpt;
use tsuzuri_api::{AuthToken, Uuid};

mod db;
mod error;
mod extractors;
mod feeds;
mod fuzz;
mod handlers;

use error::Error;
use extractors::{AppState, PgPool};
use feeds::CommentFeeds;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(name = "tsuzuri-server", about = "Blog backend: posts, users and threaded comments")]
struct Opt {
    /// PostgreSQL connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Bearer token for the admin endpoints. They are disabled when unset.
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,
}

async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("opening database {db_url:?}"))
}

async fn app(db: sqlx::PgPool, admin_token: Option<AuthToken>) -> Router {
    let state = AppState {
        db: PgPool::new(db),
        feeds: CommentFeeds::new(),
        admin_token,
    };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/fetch-users", get(handlers::fetch_users))
        .route(
            "/api/posts",
            get(handlers::fetch_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/:id",
            get(handlers::fetch_post)
                .put(handlers::edit_post)
                .delete(handlers::delete_post),
        )
        .route("/api/posts/:id/comments", get(handlers::fetch_comments))
        .route("/api/comments", post(handlers::create_comment))
        .route("/api/comments/:id", delete(handlers::delete_comment))
        .route("/ws/comment-feed", get(handlers::comment_feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let db = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("running pending migrations")?;

    if opt.admin_token.is_none() {
        tracing::info!("no admin token configured, user creation is disabled");
    }
    let app = app(db, opt.admin_token.map(AuthToken)).await;

    tracing::info!(addr = %opt.listen, "listening");
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
