use std::{collections::HashMap, fmt::Write};

use tsuzuri_client::{
    api::{Post, User, UserId},
    markup, Thread, ThreadView,
};

const INDENT: &str = "    ";

pub struct Names(HashMap<UserId, String>);

impl Names {
    pub fn new(users: Vec<User>) -> Names {
        Names(users.into_iter().map(|u| (u.id, u.name)).collect())
    }

    pub fn get(&self, id: UserId) -> &str {
        self.0.get(&id).map(|n| n.as_str()).unwrap_or("<unknown user>")
    }

    pub fn find(&self, name: &str) -> Option<UserId> {
        self.0
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }
}

pub fn post_line(post: &Post, names: &Names) -> String {
    format!(
        "{}  {}  by {}, {}",
        post.id.0,
        post.title,
        names.get(post.owner_id),
        post.updated.format("%Y-%m-%d %H:%M"),
    )
}

pub fn post(post: &Post, names: &Names, html: bool) -> String {
    let spans = markup::parse(&post.content);
    let body = match html {
        true => markup::to_html(&spans),
        false => markup::to_plain(&spans),
    };
    format!("{}\n\n{}\n", post_line(post, names), body)
}

/// Indented text rendering of the visible rows of `thread`
pub fn thread(thread: &Thread, view: &ThreadView, names: &Names) -> String {
    if thread.is_empty() {
        return String::from("No comments yet.\n");
    }
    // node each comment is displayed under
    let shown_under = thread
        .iter()
        .flat_map(|n| n.replies.iter().map(move |r| (r.id(), n.id())))
        .collect::<HashMap<_, _>>();
    let mut res = String::new();
    for row in view.rows(thread) {
        let pad = INDENT.repeat(row.indent);
        let c = &row.node.comment;
        let _ = writeln!(
            res,
            "{pad}{} at {} ({})",
            names.get(c.author_id),
            c.date.format("%Y-%m-%d %H:%M"),
            c.id.0,
        );
        if let Some(r) = &row.node.reply_to {
            if shown_under.get(&c.id) != Some(&r.id) {
                let _ = writeln!(
                    res,
                    "{pad}> replying to {}: {}",
                    names.get(r.author_id),
                    r.snippet
                );
            }
        }
        for line in markup::to_plain(&markup::parse(&c.content)).lines() {
            let _ = writeln!(res, "{pad}  {line}");
        }
        if row.collapsed {
            let _ = writeln!(res, "{pad}  [+{} replies]", row.hidden_replies);
        }
    }
    res
}
