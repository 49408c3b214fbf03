use std::collections::HashSet;

use crate::{
    api::CommentId,
    thread::{ReplyRef, Thread, ThreadConfig, ThreadNode},
};

/// One line of a rendered thread
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Row<'a> {
    pub node: &'a ThreadNode,
    pub indent: usize,
    pub collapsed: bool,

    /// Number of comments hidden below this row because it is collapsed
    pub hidden_replies: usize,
}

/// Per-viewer presentation state over a `Thread`: which nodes are
/// collapsed, and how deep rows are indented.
///
/// Only the deviations from the default collapse state are stored, so the
/// view survives thread rebuilds.
#[derive(Clone, Debug, Default)]
pub struct ThreadView {
    config: ThreadConfig,
    toggled: HashSet<CommentId>,
}

impl ThreadView {
    pub fn new(config: ThreadConfig) -> ThreadView {
        ThreadView {
            config,
            toggled: HashSet::new(),
        }
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    pub fn collapsed_by_default(&self, node: &ThreadNode) -> bool {
        node.replies.len() > self.config.collapse_threshold
    }

    pub fn is_collapsed(&self, node: &ThreadNode) -> bool {
        self.collapsed_by_default(node) != self.toggled.contains(&node.id())
    }

    /// Flips the collapse state of a single node, leaving all others untouched
    pub fn toggle(&mut self, id: CommentId) {
        if !self.toggled.remove(&id) {
            self.toggled.insert(id);
        }
    }

    pub fn indent(&self, node: &ThreadNode) -> usize {
        node.depth.min(self.config.max_depth)
    }

    /// Forgets about comments that are no longer part of the thread
    pub fn retain(&mut self, thread: &Thread) {
        self.toggled.retain(|id| thread.contains(*id));
    }

    /// Visible rows, in display order
    pub fn rows<'a>(&self, thread: &'a Thread) -> Vec<Row<'a>> {
        let mut res = Vec::new();
        let mut stack = thread.roots.iter().rev().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            let collapsed = self.is_collapsed(node);
            res.push(Row {
                node,
                indent: self.indent(node),
                collapsed,
                hidden_replies: if collapsed { node.descendants() } else { 0 },
            });
            if !collapsed {
                stack.extend(node.replies.iter().rev());
            }
        }
        res
    }

    /// Context shown for a reply: the comments it answers, root first and
    /// ending with `target` itself. The walk up stops at a root or after
    /// `max_depth` hops.
    pub fn reply_chain(&self, thread: &Thread, target: CommentId) -> Vec<ReplyRef> {
        let cap = self.config.max_depth + 1;
        let mut res = Vec::new();
        let mut cur = Some(target);
        while let Some(id) = cur {
            if res.len() >= cap {
                break;
            }
            match thread.reply_ref(id) {
                Some(r) => res.push(r.clone()),
                None => break,
            }
            cur = thread.parent_of(id);
        }
        res.reverse();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::{cid, comment};

    fn config(max_depth: usize, collapse_threshold: usize) -> ThreadConfig {
        ThreadConfig {
            max_depth,
            collapse_threshold,
        }
    }

    /// 1 has `replies` direct replies, numbered from 10
    fn fan(replies: u128) -> Thread {
        let mut comments = vec![comment(1, None, 0)];
        comments.extend((0..replies).map(|i| comment(10 + i, Some(1), 1 + i as i64)));
        Thread::build(&comments, &config(4, 3))
    }

    #[test]
    fn big_fans_start_collapsed() {
        let view = ThreadView::new(config(4, 3));
        let t = fan(5);
        assert!(view.is_collapsed(&t.roots[0]));
        let rows = view.rows(&t);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hidden_replies, 5);

        let t = fan(3);
        assert!(!view.is_collapsed(&t.roots[0]));
        assert_eq!(view.rows(&t).len(), 4);
    }

    #[test]
    fn toggling_is_per_node() {
        let mut comments = vec![comment(1, None, 0), comment(2, None, 1)];
        comments.extend((0..2).map(|i| comment(10 + i, Some(1), 2)));
        comments.extend((0..2).map(|i| comment(20 + i, Some(2), 3)));
        let t = Thread::build(&comments, &config(4, 3));

        let mut view = ThreadView::new(config(4, 3));
        view.toggle(cid(1));
        assert!(view.is_collapsed(&t.roots[0]));
        assert!(!view.is_collapsed(&t.roots[1]));
        assert_eq!(view.rows(&t).len(), 4);

        view.toggle(cid(1));
        assert!(!view.is_collapsed(&t.roots[0]));
        assert_eq!(view.rows(&t).len(), 6);
    }

    #[test]
    fn toggles_survive_rebuilds_and_get_pruned() {
        let mut view = ThreadView::new(config(4, 3));
        view.toggle(cid(1));
        let t = fan(5);
        // collapsed by default, toggled open
        assert!(!view.is_collapsed(&t.roots[0]));
        view.retain(&t);
        assert!(!view.is_collapsed(&fan(5).roots[0]));

        view.retain(&Thread::default());
        assert!(view.is_collapsed(&t.roots[0]));
    }

    #[test]
    fn rows_are_indented_in_order() {
        let t = Thread::build(
            &[
                comment(1, None, 0),
                comment(2, Some(1), 1),
                comment(3, Some(2), 2),
                comment(4, None, 3),
            ],
            &config(1, 3),
        );
        let view = ThreadView::new(config(1, 3));
        let rows = view
            .rows(&t)
            .iter()
            .map(|r| (r.node.id(), r.indent))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![(cid(1), 0), (cid(2), 1), (cid(3), 1), (cid(4), 0)]
        );
    }

    #[test]
    fn reply_chains() {
        let comments = (1..=6)
            .map(|i| comment(i, (i > 1).then(|| i - 1), i as i64))
            .collect::<Vec<_>>();
        let t = Thread::build(&comments, &config(3, 3));
        let view = ThreadView::new(config(3, 3));

        let chain = view
            .reply_chain(&t, cid(2))
            .iter()
            .map(|r| r.id)
            .collect::<Vec<_>>();
        assert_eq!(chain, vec![cid(1), cid(2)]);

        let chain = view
            .reply_chain(&t, cid(6))
            .iter()
            .map(|r| r.id)
            .collect::<Vec<_>>();
        assert_eq!(chain, vec![cid(3), cid(4), cid(5), cid(6)]);

        assert!(view.reply_chain(&t, cid(42)).is_empty());

        let flat = ThreadView::new(config(0, 3));
        assert_eq!(flat.reply_chain(&t, cid(6)).len(), 1);
    }

    #[test]
    fn reply_chain_of_deepest_nested_reply_reaches_root() {
        let comments = (1..=5)
            .map(|i| comment(i, (i > 1).then(|| i - 1), i as i64))
            .collect::<Vec<_>>();
        let t = Thread::build(&comments, &config(4, 3));
        assert_eq!(t.find(cid(5)).map(|n| n.depth), Some(4));
        let chain = ThreadView::new(config(4, 3))
            .reply_chain(&t, cid(5))
            .iter()
            .map(|r| r.id)
            .collect::<Vec<_>>();
        assert_eq!(chain, (1..=5).map(cid).collect::<Vec<_>>());
    }
}
