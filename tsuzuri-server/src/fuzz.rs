#![cfg(test)]

use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
    Router,
};
use bolero::generator::{bolero_generator, gen_with, TypeGenerator};
use tower::{Service, ServiceExt};
use tsuzuri_api::{
    AuthToken, Comment, CommentId, Error as ApiError, NewComment, NewPost, NewSession, NewUser,
    Post, PostEdit, PostId, User, UserId, Uuid,
};
use tsuzuri_mock_server::MockServer;

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

/// Newest postgresql found in PATH, if any
fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut found = Vec::new();
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            found.push((v, r));
        }
    }
    let (_, runtime) = found
        .into_iter()
        .reduce(|best, other| if best.0 < other.0 { other } else { best })?;
    Some(postgresfixture::cluster::Cluster::new(data, runtime))
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let Some(cluster) = build_pg_cluster(datadir_path) else {
                eprintln!("postgresql is not installed in PATH, skipping {}", stringify!($name));
                return;
            };
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        match PreAuth::from_request_parts(&mut req, &()).await {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        /// Generated names are mostly invalid, so also use `user{seed}` ones
        name: Option<String>,
        seed: u8,
    },
    Auth {
        uid: usize,
        wrong_password: bool,
        #[generator(gen_with::<String>().len(1..100usize))]
        device: String,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    FetchUsers,
    FetchPosts,
    FetchPost {
        pid: usize,
    },
    CreatePost {
        sid: usize,
        title: String,
        content: String,
    },
    EditPost {
        sid: usize,
        pid: usize,
        title: String,
        content: String,
    },
    DeletePost {
        sid: usize,
        pid: usize,
    },
    FetchComments {
        pid: usize,
    },
    CreateComment {
        sid: usize,
        pid: usize,
        parent: Option<usize>,
        content: String,
    },
    DeleteComment {
        sid: usize,
        cid: usize,
    },
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server answers unit with an empty body, which serde_json refuses
            return Ok(serde_json::from_slice(b"null").unwrap());
        }
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!(
                r#"
                    Failed parsing resp body!

                    The error is the following:
                    ---
                    {err}
                    ---

                    Response body is:
                    ---
                    {body:?}
                    ---

                    Request was:
                    ---
                    {req_body:?}
                    ---
                "#
            )
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end);
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1))
}

/// Everything but the server-assigned timestamps
fn post_key(p: Post) -> (PostId, UserId, String, String, Option<String>) {
    (p.id, p.owner_id, p.title, p.content, p.image_url)
}

fn comment_key(c: Comment) -> (CommentId, PostId, UserId, Option<CommentId>, String) {
    (c.id, c.post_id, c.author_id, c.parent_id, c.content)
}

struct Session {
    app: AuthToken,
    mock: AuthToken,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
}

impl ComparativeFuzzer {
    async fn new(pool: sqlx::PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(pool, Some(AuthToken(admin_token))).await;
        ComparativeFuzzer {
            admin_token,
            app,
            mock: MockServer::new(),
            sessions: Vec::new(),
        }
    }

    /// Tokens for session `sid`, or made-up ones if nobody logged in yet
    fn session(&self, sid: usize) -> (Uuid, AuthToken) {
        match resize_int(sid, ..self.sessions.len()) {
            Some(sid) => (self.sessions[sid].app.0, self.sessions[sid].mock),
            None => (Uuid::new_v4(), AuthToken(Uuid::new_v4())),
        }
    }

    fn post(&self, pid: usize) -> PostId {
        match resize_int(pid, ..self.mock.test_num_posts()) {
            Some(pid) => self.mock.test_post(pid).id,
            None => PostId(Uuid::new_v4()),
        }
    }

    fn comment(&self, cid: usize) -> CommentId {
        match resize_int(cid, ..self.mock.test_num_comments()) {
            Some(cid) => self.mock.test_comment(cid).id,
            None => CommentId(Uuid::new_v4()),
        }
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser { name, seed } => {
                let name = name.unwrap_or_else(|| format!("user{seed}"));
                let password = format!("pass{seed}");
                let new_user = NewUser::with_cost(UserId(Uuid::new_v4()), name, &password, 4);
                compare(
                    "CreateUser",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/admin/create-user",
                        Some(self.admin_token),
                        &new_user,
                    )
                    .await,
                    self.mock.admin_create_user(new_user, password),
                )
            }
            FuzzOp::Auth {
                uid,
                wrong_password,
                device,
            } => {
                if let Some(uid) = resize_int(uid, ..self.mock.test_num_users()) {
                    let (_, user, password) = self.mock.test_get_user_info(uid);
                    let session = NewSession {
                        user: String::from(user),
                        password: match wrong_password {
                            true => format!("{password}!"),
                            false => String::from(password),
                        },
                        device,
                    };
                    let app_tok =
                        run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                    let mock_tok = self.mock.auth(session);
                    if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                        self.sessions.push(Session { app, mock });
                    }
                    compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
                } else {
                    self.execute_fuzz_op(FuzzOp::CreateUser {
                        name: None,
                        seed: 0,
                    })
                    .await;
                    self.execute_fuzz_op(FuzzOp::Auth {
                        uid,
                        wrong_password,
                        device,
                    })
                    .await;
                }
            }
            FuzzOp::Unauth { sid } => {
                let (app_tok, mock_tok) = self.session(sid);
                compare(
                    "Unauth",
                    run_on_app(&mut self.app, "POST", "/api/unauth", Some(app_tok), &()).await,
                    self.mock.unauth(mock_tok),
                )
            }
            FuzzOp::Whoami { sid } => {
                let (app_tok, mock_tok) = self.session(sid);
                compare(
                    "Whoami",
                    run_on_app::<_, UserId>(&mut self.app, "GET", "/api/whoami", Some(app_tok), &())
                        .await,
                    self.mock.whoami(mock_tok),
                )
            }
            FuzzOp::FetchUsers => compare(
                "FetchUsers",
                run_on_app::<_, Vec<User>>(&mut self.app, "GET", "/api/fetch-users", None, &())
                    .await,
                self.mock.fetch_users(),
            ),
            FuzzOp::FetchPosts => {
                let sorted_keys = |posts: Vec<Post>| {
                    let mut keys = posts.into_iter().map(post_key).collect::<Vec<_>>();
                    keys.sort_unstable_by_key(|k| k.0);
                    keys
                };
                compare(
                    "FetchPosts",
                    run_on_app(&mut self.app, "GET", "/api/posts", None, &())
                        .await
                        .map(sorted_keys),
                    self.mock.fetch_posts().map(sorted_keys),
                )
            }
            FuzzOp::FetchPost { pid } => {
                let post = self.post(pid);
                compare(
                    "FetchPost",
                    run_on_app(
                        &mut self.app,
                        "GET",
                        &format!("/api/posts/{}", post.0),
                        None,
                        &(),
                    )
                    .await
                    .map(post_key),
                    self.mock.fetch_post(post).map(post_key),
                )
            }
            FuzzOp::CreatePost {
                sid,
                title,
                content,
            } => {
                let (app_tok, mock_tok) = self.session(sid);
                let p = NewPost::new(title, content);
                compare(
                    "CreatePost",
                    run_on_app(&mut self.app, "POST", "/api/posts", Some(app_tok), &p)
                        .await
                        .map(post_key),
                    self.mock.create_post(mock_tok, p.clone()).map(post_key),
                )
            }
            FuzzOp::EditPost {
                sid,
                pid,
                title,
                content,
            } => {
                let (app_tok, mock_tok) = self.session(sid);
                let post = self.post(pid);
                let e = PostEdit {
                    title,
                    content,
                    image_url: None,
                };
                compare(
                    "EditPost",
                    run_on_app(
                        &mut self.app,
                        "PUT",
                        &format!("/api/posts/{}", post.0),
                        Some(app_tok),
                        &e,
                    )
                    .await
                    .map(post_key),
                    self.mock.edit_post(mock_tok, post, e.clone()).map(post_key),
                )
            }
            FuzzOp::DeletePost { sid, pid } => {
                let (app_tok, mock_tok) = self.session(sid);
                let post = self.post(pid);
                compare(
                    "DeletePost",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/posts/{}", post.0),
                        Some(app_tok),
                        &(),
                    )
                    .await,
                    self.mock.delete_post(mock_tok, post),
                )
            }
            FuzzOp::FetchComments { pid } => {
                let post = self.post(pid);
                let keys = |comments: Vec<Comment>| {
                    comments.into_iter().map(comment_key).collect::<Vec<_>>()
                };
                let app_res = run_on_app::<_, Vec<Comment>>(
                    &mut self.app,
                    "GET",
                    &format!("/api/posts/{}/comments", post.0),
                    None,
                    &(),
                )
                .await;
                if let Ok(comments) = &app_res {
                    assert!(
                        comments
                            .windows(2)
                            .all(|w| (w[0].date, w[0].id) <= (w[1].date, w[1].id)),
                        "comments were not returned in chronological order"
                    );
                }
                // creation times differ between app and mock, compare as sets
                let sorted = |mut k: Vec<_>| {
                    k.sort_unstable();
                    k
                };
                compare(
                    "FetchComments",
                    app_res.map(keys).map(sorted),
                    self.mock.fetch_comments(post).map(keys).map(sorted),
                )
            }
            FuzzOp::CreateComment {
                sid,
                pid,
                parent,
                content,
            } => {
                let (app_tok, mock_tok) = self.session(sid);
                let post = self.post(pid);
                let parent = parent.map(|p| self.comment(p));
                let c = NewComment::new(post, parent, content);
                compare(
                    "CreateComment",
                    run_on_app(&mut self.app, "POST", "/api/comments", Some(app_tok), &c)
                        .await
                        .map(comment_key),
                    self.mock.create_comment(mock_tok, c.clone()).map(comment_key),
                )
            }
            FuzzOp::DeleteComment { sid, cid } => {
                let (app_tok, mock_tok) = self.session(sid);
                let comment = self.comment(cid);
                compare(
                    "DeleteComment",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/comments/{}", comment.0),
                        Some(app_tok),
                        &(),
                    )
                    .await,
                    self.mock.delete_comment(mock_tok, comment),
                )
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);
