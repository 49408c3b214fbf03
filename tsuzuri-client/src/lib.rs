pub mod markup;

mod search;
pub use search::{PostOrder, PostSearch};

mod sync;
pub use sync::{
    ChangeFeed, CommentStore, Draft, LiveThread, LiveThreadHandle, LoadStatus, SyncError,
    ThreadState,
};

mod thread;
pub use thread::{snippet, ReplyRef, Thread, ThreadConfig, ThreadNode, SNIPPET_LEN};

mod view;
pub use view::{Row, ThreadView};

pub mod api {
    pub use tsuzuri_api::*;
}
