use std::sync::Arc;

use anyhow::{anyhow, Context};
use tsuzuri_client::{
    api::{AuthToken, CommentId, NewPost, NewSession, NewUser, PostId, UserId, Uuid},
    CommentStore, Draft, LiveThread, LiveThreadHandle, LoadStatus, PostOrder, PostSearch,
    ThreadConfig, ThreadState, ThreadView,
};

mod remote;
mod render;

use remote::RemoteStore;
use render::Names;

#[derive(structopt::StructOpt)]
#[structopt(name = "tsuzuri-ctl", about = "Command-line client for a tsuzuri blog")]
struct Opt {
    #[structopt(short, long, env = "TSUZURI_HOST", default_value = "http://127.0.0.1:8000")]
    host: String,

    /// Session token, as printed by `login`
    #[structopt(long, env = "TSUZURI_TOKEN", hide_env_values = true)]
    token: Option<Uuid>,

    /// Deepest indentation level of comment threads
    #[structopt(long, default_value = "4")]
    max_depth: usize,

    /// Comments with more replies than this start collapsed
    #[structopt(long, default_value = "3")]
    collapse_threshold: usize,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user, using the admin token from ADMIN_TOKEN
    CreateUser {
        /// Username
        name: String,

        /// Initial password
        initial_password: String,
    },

    /// Open a session and print its token
    Login {
        user: String,
        password: String,

        #[structopt(long, default_value = "tsuzuri-ctl")]
        device: String,
    },

    /// Close the current session
    Logout,

    /// List posts, latest first
    Posts {
        /// Only show posts containing this text
        #[structopt(long)]
        search: Option<String>,

        /// Only show posts by this user name
        #[structopt(long)]
        author: Option<String>,

        #[structopt(long)]
        oldest: bool,
    },

    /// Publish a post
    NewPost { title: String, content: String },

    ShowPost {
        post: Uuid,

        /// Render the content as HTML instead of plain text
        #[structopt(long)]
        html: bool,
    },

    ShowThread { post: Uuid },

    /// Show the comments of a post, and re-render them on every change
    Watch { post: Uuid },

    Comment {
        post: Uuid,

        #[structopt(long)]
        reply_to: Option<Uuid>,

        text: String,
    },

    /// Delete one of your comments on a post
    DeleteComment { post: Uuid, comment: Uuid },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

/// Waits for the first load of the thread to end
async fn loaded(handle: &LiveThreadHandle) -> anyhow::Result<ThreadState> {
    let mut state = handle.watch();
    loop {
        let s = state.borrow_and_update().clone();
        match &s.status {
            LoadStatus::Ready => return Ok(s),
            LoadStatus::Failed(err) => return Err(anyhow!("loading comments: {err}")),
            LoadStatus::Loading => (),
        }
        state
            .changed()
            .await
            .context("thread synchronization stopped")?;
    }
}

async fn logged_in(store: &RemoteStore) -> anyhow::Result<UserId> {
    store
        .whoami()
        .await
        .context("checking session, did you set TSUZURI_TOKEN?")
}

/// Deletes `comment` through a live thread of `post`, so that deleting a
/// missing comment or somebody else's fails before any request is sent
async fn delete_comment<S: CommentStore>(
    store: Arc<S>,
    post: PostId,
    comment: CommentId,
    me: UserId,
    config: ThreadConfig,
) -> anyhow::Result<()> {
    let handle = LiveThread::spawn(store, post, config);
    loaded(&handle).await?;
    handle
        .delete(comment, Some(me))
        .await
        .context("deleting comment")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is for command output
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let config = ThreadConfig {
        max_depth: opt.max_depth,
        collapse_threshold: opt.collapse_threshold,
    };
    let store = Arc::new(RemoteStore::new(opt.host, opt.token.map(AuthToken)));

    match opt.cmd {
        Command::CreateUser {
            name,
            initial_password,
        } => {
            store
                .admin_create_user(
                    admin_token()?,
                    &NewUser::new(UserId(Uuid::new_v4()), name, &initial_password),
                )
                .await
                .context("creating user")?;
        }
        Command::Login {
            user,
            password,
            device,
        } => {
            let tok = store
                .auth(&NewSession {
                    user,
                    password,
                    device,
                })
                .await
                .context("logging in")?;
            println!("{}", tok.0);
        }
        Command::Logout => store.unauth().await.context("logging out")?,
        Command::Posts {
            search,
            author,
            oldest,
        } => {
            let names = Names::new(store.fetch_users().await?);
            let author = match author {
                None => None,
                Some(a) => Some(
                    names
                        .find(&a)
                        .ok_or_else(|| anyhow!("no user is named {a:?}"))?,
                ),
            };
            let search = PostSearch {
                term: search,
                author,
                order: match oldest {
                    true => PostOrder::Oldest,
                    false => PostOrder::Latest,
                },
            };
            let posts = store.fetch_posts().await?;
            for p in search.run(&posts) {
                println!("{}", render::post_line(p, &names));
            }
        }
        Command::NewPost { title, content } => {
            let post = store
                .create_post(&NewPost::new(title, content))
                .await
                .context("publishing post")?;
            println!("{}", post.id.0);
        }
        Command::ShowPost { post, html } => {
            let names = Names::new(store.fetch_users().await?);
            let post = store.fetch_post(PostId(post)).await?;
            print!("{}", render::post(&post, &names, html));
        }
        Command::ShowThread { post } => {
            let names = Names::new(store.fetch_users().await?);
            let comments = store.list_by_post(PostId(post)).await?;
            let thread = tsuzuri_client::Thread::build(&comments, &config);
            print!("{}", render::thread(&thread, &ThreadView::new(config), &names));
        }
        Command::Watch { post } => {
            let names = Names::new(store.fetch_users().await?);
            let view = ThreadView::new(config);
            let handle = LiveThread::spawn(store, PostId(post), config);
            let mut state = handle.watch();
            loop {
                let s = state.borrow_and_update().clone();
                match &s.status {
                    LoadStatus::Loading => (),
                    LoadStatus::Failed(err) => return Err(anyhow!("loading comments: {err}")),
                    LoadStatus::Ready => {
                        println!("---");
                        print!("{}", render::thread(&s.thread, &view, &names));
                        if !s.live {
                            println!("(not receiving live updates)");
                        }
                        if let Some(err) = &s.error {
                            println!("(last refresh failed: {err})");
                        }
                    }
                }
                tokio::select! {
                    res = state.changed() => res.context("thread synchronization stopped")?,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Command::Comment {
            post,
            reply_to,
            text,
        } => {
            let me = logged_in(&store).await?;
            let handle = LiveThread::spawn(store, PostId(post), config);
            let state = loaded(&handle).await?;
            let reply_to = reply_to.map(CommentId);
            if let Some(parent) = reply_to {
                let view = ThreadView::new(config);
                for r in view.reply_chain(&state.thread, parent) {
                    println!("> {}", r.snippet);
                }
            }
            let mut draft = Draft {
                content: text,
                reply_to,
            };
            let comment = handle
                .submit(&mut draft, Some(me))
                .await
                .context("posting comment")?;
            println!("{}", comment.id.0);
        }
        Command::DeleteComment { post, comment } => {
            let me = logged_in(&store).await?;
            delete_comment(store, PostId(post), CommentId(comment), me, config).await?;
        }
    }

    Ok(())
}
