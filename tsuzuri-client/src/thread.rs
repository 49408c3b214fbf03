use std::collections::HashMap;

use crate::{
    api::{Comment, CommentId, UserId},
    markup,
};

/// Maximum length, in characters, of the excerpt shown when referring to a comment
pub const SNIPPET_LEN: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThreadConfig {
    /// Replies nested deeper than this are re-attached to the deepest allowed ancestor
    pub max_depth: usize,

    /// Nodes with strictly more replies than this start collapsed
    pub collapse_threshold: usize,
}

impl Default for ThreadConfig {
    fn default() -> ThreadConfig {
        ThreadConfig {
            max_depth: 4,
            collapse_threshold: 3,
        }
    }
}

/// Short reference to a comment, for "replying to ..." displays
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyRef {
    pub id: CommentId,
    pub author_id: UserId,
    pub snippet: String,
}

impl ReplyRef {
    pub fn of(c: &Comment) -> ReplyRef {
        ReplyRef {
            id: c.id,
            author_id: c.author_id,
            snippet: snippet(&c.content),
        }
    }
}

/// Plain-text excerpt of a markup text, on a single line
pub fn snippet(content: &str) -> String {
    let plain = markup::to_plain(&markup::parse(content));
    let plain = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    if plain.chars().count() <= SNIPPET_LEN {
        return plain;
    }
    let mut res = plain.chars().take(SNIPPET_LEN).collect::<String>();
    res.push('…');
    res
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadNode {
    pub comment: Comment,

    /// 0 for roots, never more than the configured max_depth
    pub depth: usize,

    /// The comment this one actually replies to. When nesting got flattened,
    /// this differs from the node containing this one.
    pub reply_to: Option<ReplyRef>,

    /// Replies in chronological order
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    pub fn id(&self) -> CommentId {
        self.comment.id
    }

    /// Number of nodes below this one
    pub fn descendants(&self) -> usize {
        let mut res = 0;
        let mut stack = self.replies.iter().collect::<Vec<_>>();
        while let Some(n) = stack.pop() {
            res += 1;
            stack.extend(n.replies.iter());
        }
        res
    }
}

/// Forest of comments for one post. Rebuilt from scratch on every change.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Thread {
    /// Top-level comments in chronological order
    pub roots: Vec<ThreadNode>,

    /// Resolved reply relation, after dropping dangling and cyclic references
    parents: HashMap<CommentId, CommentId>,

    refs: HashMap<CommentId, ReplyRef>,
}

// Cycle detection states
const UNVISITED: u8 = 0;
const ON_PATH: u8 = 1;
const DONE: u8 = 2;

impl Thread {
    /// Builds the forest out of a flat list of comments.
    ///
    /// This never fails: references to unknown comments, to comments of
    /// another post or to the comment itself make the comment a root, and
    /// every reference cycle is cut at its earliest comment. The result only
    /// depends on the set of comments, not on the order they were given in.
    pub fn build(comments: &[Comment], config: &ThreadConfig) -> Thread {
        let mut order = comments.iter().collect::<Vec<_>>();
        order.sort_by_key(|c| (c.date, c.id));
        let n = order.len();

        let mut index = HashMap::with_capacity(n);
        for (i, c) in order.iter().enumerate() {
            index.entry(c.id).or_insert(i);
        }

        let mut parent = order
            .iter()
            .map(|c| {
                let p = c.parent_id?;
                if p == c.id {
                    tracing::warn!(comment = ?c.id, "comment replies to itself, treating it as top-level");
                    return None;
                }
                let Some(&p_idx) = index.get(&p) else {
                    tracing::debug!(comment = ?c.id, parent = ?p, "parent comment is gone, treating reply as top-level");
                    return None;
                };
                if order[p_idx].post_id != c.post_id {
                    tracing::warn!(comment = ?c.id, parent = ?p, "parent comment belongs to another post");
                    return None;
                }
                Some(p_idx)
            })
            .collect::<Vec<Option<usize>>>();

        // Each comment has at most one parent, so every cycle is found by
        // walking up from each comment once
        let mut state = vec![UNVISITED; n];
        let mut path = Vec::new();
        for start in 0..n {
            let mut cur = Some(start);
            while let Some(i) = cur {
                match state[i] {
                    UNVISITED => {
                        state[i] = ON_PATH;
                        path.push(i);
                        cur = parent[i];
                    }
                    ON_PATH => {
                        if let Some(pos) = path.iter().position(|&j| j == i) {
                            if let Some(&first) = path[pos..].iter().min() {
                                tracing::warn!(
                                    comment = ?order[first].id,
                                    cycle_len = path.len() - pos,
                                    "reply cycle detected, cutting it"
                                );
                                parent[first] = None;
                            }
                        }
                        cur = None;
                    }
                    _ => cur = None,
                }
            }
            for i in path.drain(..) {
                state[i] = DONE;
            }
        }

        let mut children = vec![Vec::new(); n];
        let mut bfs = Vec::with_capacity(n);
        for i in 0..n {
            match parent[i] {
                Some(p) => children[p].push(i),
                None => bfs.push(i),
            }
        }
        let mut next = 0;
        while next < bfs.len() {
            let i = bfs[next];
            bfs.extend_from_slice(&children[i]);
            next += 1;
        }
        debug_assert_eq!(bfs.len(), n, "comment unreachable after cycle removal");

        // Parents come before their replies in bfs, so their placement is known
        let mut depth = vec![0; n];
        let mut attach_to = vec![None; n];
        for &i in &bfs {
            if let Some(p) = parent[i] {
                if depth[p] < config.max_depth {
                    attach_to[i] = Some(p);
                    depth[i] = depth[p] + 1;
                } else {
                    // p is at the max depth: hang i next to p, under p's container
                    attach_to[i] = attach_to[p];
                    depth[i] = depth[p];
                }
            }
        }

        let refs_by_idx = order.iter().map(|c| ReplyRef::of(c)).collect::<Vec<_>>();

        let mut replies = vec![Vec::new(); n];
        let mut roots = Vec::new();
        for i in 0..n {
            match attach_to[i] {
                Some(p) => replies[p].push(i),
                None => roots.push(i),
            }
        }

        // Containers are ancestors, so reverse bfs builds replies before their containers
        let mut built = (0..n).map(|_| None).collect::<Vec<Option<ThreadNode>>>();
        for &i in bfs.iter().rev() {
            let node_replies = replies[i]
                .iter()
                .filter_map(|&j| built[j].take())
                .collect();
            built[i] = Some(ThreadNode {
                comment: order[i].clone(),
                depth: depth[i],
                reply_to: parent[i].map(|p| refs_by_idx[p].clone()),
                replies: node_replies,
            });
        }

        let mut parents = HashMap::with_capacity(n);
        let mut refs = HashMap::with_capacity(n);
        for i in 0..n {
            if let Some(p) = parent[i] {
                parents.entry(order[i].id).or_insert(order[p].id);
            }
            refs.entry(order[i].id)
                .or_insert_with(|| refs_by_idx[i].clone());
        }

        Thread {
            roots: roots.into_iter().filter_map(|i| built[i].take()).collect(),
            parents,
            refs,
        }
    }

    /// Total number of comments in the thread
    pub fn len(&self) -> usize {
        self.roots.iter().map(|r| 1 + r.descendants()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first, pre-order walk over all nodes
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stack: self.roots.iter().rev().collect(),
        }
    }

    pub fn find(&self, id: CommentId) -> Option<&ThreadNode> {
        self.iter().find(|n| n.id() == id)
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.refs.contains_key(&id)
    }

    /// The comment `id` replies to, if it is part of this thread
    pub fn parent_of(&self, id: CommentId) -> Option<CommentId> {
        self.parents.get(&id).copied()
    }

    pub fn reply_ref(&self, id: CommentId) -> Option<&ReplyRef> {
        self.refs.get(&id)
    }
}

pub struct Iter<'a> {
    stack: Vec<&'a ThreadNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ThreadNode;

    fn next(&mut self) -> Option<&'a ThreadNode> {
        let n = self.stack.pop()?;
        self.stack.extend(n.replies.iter().rev());
        Some(n)
    }
}
