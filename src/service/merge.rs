//! Timeline merging
//!
//! Pure functions over already-fetched posts: deduplication, thread root
//! resolution and the final ordering.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::Duration;

use crate::data::{Post, ThreadContext};

/// Upper bound on `reply_to` hops when walking towards a thread root
pub const MAX_THREAD_HOPS: u32 = 10;

/// A reply is pulled under its parent only if the parent is this close
pub const REPLY_LOOKAHEAD: usize = 10;

/// Posts of one thread within this span of its newest post are grouped
pub fn thread_span() -> Duration {
    Duration::hours(24)
}

/// Newest first, ties broken by id so the order is total
fn newest_first(a: &Post, b: &Post) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn oldest_first(a: &Post, b: &Post) -> Ordering {
    newest_first(b, a)
}

/// Drop repeated ids, keeping the first occurrence
pub fn dedupe(posts: impl IntoIterator<Item = Post>) -> Vec<Post> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|post| seen.insert(post.id.clone()))
        .collect()
}

/// Root and depth of `post` within `index`
///
/// Walks `reply_to_id` at most [`MAX_THREAD_HOPS`] times. If the parent
/// chain is still unresolved after that (deep or cyclic threads), the
/// post is its own root.
fn resolve_thread(post: &Post, index: &HashMap<&str, &Post>) -> ThreadContext {
    let parent_of = |p: &Post| {
        p.reply_to_id
            .as_deref()
            .and_then(|parent| index.get(parent).copied())
    };

    let mut current = post;
    let mut depth = 0;
    while depth < MAX_THREAD_HOPS {
        match parent_of(current) {
            Some(parent) => {
                current = parent;
                depth += 1;
            }
            None => {
                return ThreadContext {
                    root_id: current.id.clone(),
                    reply_depth: depth,
                };
            }
        }
    }

    if parent_of(current).is_some() {
        ThreadContext {
            root_id: post.id.clone(),
            reply_depth: 0,
        }
    } else {
        ThreadContext {
            root_id: current.id.clone(),
            reply_depth: depth,
        }
    }
}

/// Attach thread context to every post
fn annotate_threads(posts: &mut [Post]) {
    let contexts: Vec<ThreadContext> = {
        let index: HashMap<&str, &Post> = posts.iter().map(|p| (p.id.as_str(), p)).collect();
        posts.iter().map(|p| resolve_thread(p, &index)).collect()
    };
    for (post, context) in posts.iter_mut().zip(contexts) {
        post.thread = Some(context);
    }
}

fn root_of(post: &Post) -> &str {
    post.thread
        .as_ref()
        .map(|thread| thread.root_id.as_str())
        .unwrap_or(post.id.as_str())
}

/// Emit each thread cluster oldest-first at the position of its newest post
///
/// `posts` must be newest-first. A cluster is every not-yet-emitted post of
/// the same root no older than [`thread_span`] before the anchor.
fn group_threads(posts: Vec<Post>) -> Vec<Post> {
    let span = thread_span();
    let mut emitted = vec![false; posts.len()];
    let mut order = Vec::with_capacity(posts.len());

    for anchor in 0..posts.len() {
        if emitted[anchor] {
            continue;
        }
        let root = root_of(&posts[anchor]);
        let floor = posts[anchor].created_at - span;

        let mut cluster: Vec<usize> = (anchor..posts.len())
            .filter(|&i| {
                !emitted[i] && root_of(&posts[i]) == root && posts[i].created_at >= floor
            })
            .collect();
        cluster.sort_by(|&a, &b| oldest_first(&posts[a], &posts[b]));

        for i in cluster {
            emitted[i] = true;
            order.push(i);
        }
    }

    let mut slots: Vec<Option<Post>> = posts.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// True when following `reply_to_id` from `post` reaches `ancestor_id`
fn descends_from(post: &Post, ancestor_id: &str, index: &HashMap<String, Option<String>>) -> bool {
    let mut parent = post.reply_to_id.as_deref();
    for _ in 0..MAX_THREAD_HOPS {
        match parent {
            Some(id) if id == ancestor_id => return true,
            Some(id) => parent = index.get(id).and_then(|p| p.as_deref()),
            None => return false,
        }
    }
    false
}

fn position_of(posts: &[Post], id: &str) -> Option<usize> {
    posts.iter().position(|p| p.id == id)
}

/// End (exclusive) of the block formed by the post at `start` and the
/// replies already pulled under it
fn pulled_block_end(
    posts: &[Post],
    start: usize,
    pulled: &HashSet<String>,
    parents: &HashMap<String, Option<String>>,
) -> usize {
    let head = posts[start].id.as_str();
    let mut end = start + 1;
    while end < posts.len()
        && pulled.contains(&posts[end].id)
        && descends_from(&posts[end], head, parents)
    {
        end += 1;
    }
    end
}

/// Move replies directly under a nearby parent
///
/// A reply whose parent is at most [`REPLY_LOOKAHEAD`] positions away is
/// placed after the parent and after any replies already pulled under it.
/// The replies already pulled under the moved reply travel with it. Every
/// candidate is considered once, so reply cycles terminate.
fn pull_replies(mut posts: Vec<Post>) -> Vec<Post> {
    let parents: HashMap<String, Option<String>> = posts
        .iter()
        .map(|p| (p.id.clone(), p.reply_to_id.clone()))
        .collect();
    let candidates: Vec<(String, String)> = posts
        .iter()
        .filter_map(|p| Some((p.id.clone(), p.reply_to_id.clone()?)))
        .filter(|(id, parent)| id != parent && parents.contains_key(parent))
        .collect();
    let mut pulled: HashSet<String> = HashSet::new();

    for (reply_id, parent_id) in candidates {
        let (Some(reply_pos), Some(parent_pos)) =
            (position_of(&posts, &reply_id), position_of(&posts, &parent_id))
        else {
            continue;
        };
        if reply_pos.abs_diff(parent_pos) > REPLY_LOOKAHEAD {
            continue;
        }

        let block_end = pulled_block_end(&posts, reply_pos, &pulled, &parents);
        if (reply_pos..block_end).contains(&parent_pos) {
            continue;
        }

        let block: Vec<Post> = posts.drain(reply_pos..block_end).collect();
        let parent_pos = if parent_pos >= block_end {
            parent_pos - block.len()
        } else {
            parent_pos
        };

        let insert_at = pulled_block_end(&posts, parent_pos, &pulled, &parents);
        posts.splice(insert_at..insert_at, block);
        pulled.insert(reply_id);
    }

    posts
}

/// Merge posts from every source into one timeline
///
/// Earlier sources win on duplicate ids. The result is newest-first with
/// recent thread activity grouped oldest-first, and replies pulled under
/// nearby parents.
pub fn merge_timeline(posts: impl IntoIterator<Item = Post>) -> Vec<Post> {
    let mut posts = dedupe(posts);
    annotate_threads(&mut posts);
    posts.sort_by(newest_first);

    pull_replies(group_threads(posts))
}

/// Thread view used by the local timeline
///
/// Threads are ordered by their root, newest first; replies follow their
/// parent depth-first, oldest first among siblings.
pub fn thread_order(posts: impl IntoIterator<Item = Post>) -> Vec<Post> {
    let mut posts = dedupe(posts);
    annotate_threads(&mut posts);
    posts.sort_by(newest_first);

    let ids: HashSet<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut tops = Vec::new();
    for (i, post) in posts.iter().enumerate() {
        let self_rooted = root_of(post) == post.id;
        match post.reply_to_id.as_deref() {
            Some(parent) if ids.contains(parent) && parent != post.id => {
                children.entry(parent).or_default().push(i);
                if self_rooted {
                    tops.push(i);
                }
            }
            _ => tops.push(i),
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|&a, &b| oldest_first(&posts[a], &posts[b]));
    }

    let mut visited = vec![false; posts.len()];
    let mut order: Vec<(usize, ThreadContext)> = Vec::with_capacity(posts.len());
    for &top in &tops {
        if visited[top] {
            continue;
        }
        let root_id = posts[top].id.clone();
        let mut stack = vec![(top, 0u32)];
        while let Some((i, depth)) = stack.pop() {
            if visited[i] {
                continue;
            }
            visited[i] = true;
            order.push((
                i,
                ThreadContext {
                    root_id: root_id.clone(),
                    reply_depth: depth,
                },
            ));
            if let Some(kids) = children.get(posts[i].id.as_str()) {
                for &kid in kids.iter().rev() {
                    stack.push((kid, depth + 1));
                }
            }
        }
    }

    let mut slots: Vec<Option<Post>> = posts.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|(i, context)| {
            let mut post = slots[i].take()?;
            post.thread = Some(context);
            Some(post)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AuthorRef;
    use chrono::{DateTime, Utc};

    fn at(hours_ago: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            - Duration::hours(hours_ago)
    }

    fn post(id: &str, hours_ago: i64, reply_to: Option<&str>) -> Post {
        Post {
            id: id.to_string(),
            author: AuthorRef {
                actor_uri: "https://remote.example/users/bob".to_string(),
                username: "bob".to_string(),
                domain: "remote.example".to_string(),
                display_name: None,
            },
            content: id.to_string(),
            created_at: at(hours_ago),
            reply_to_id: reply_to.map(str::to_string),
            is_local: false,
            like_count: 0,
            boost_count: 0,
            reply_count: 0,
            thread: None,
        }
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut local = post("a", 1, None);
        local.is_local = true;
        let merged = merge_timeline(vec![local, post("a", 1, None), post("b", 2, None)]);

        assert_eq!(ids(&merged), vec!["a", "b"]);
        assert!(merged[0].is_local);
    }

    #[test]
    fn base_order_is_newest_first_with_id_tiebreak() {
        let merged = merge_timeline(vec![
            post("a", 3, None),
            post("c", 1, None),
            post("b", 1, None),
        ]);
        assert_eq!(ids(&merged), vec!["c", "b", "a"]);
    }

    #[test]
    fn thread_root_walk_is_capped() {
        let mut chain = vec![post("p0", 20, None)];
        for i in 1..=11 {
            let parent = format!("p{}", i - 1);
            chain.push(post(&format!("p{i}"), 20 - i, Some(&parent)));
        }

        let merged = merge_timeline(chain);
        let thread = |id: &str| {
            merged
                .iter()
                .find(|p| p.id == id)
                .and_then(|p| p.thread.clone())
                .unwrap()
        };

        assert_eq!(thread("p10").root_id, "p0");
        assert_eq!(thread("p10").reply_depth, 10);
        assert_eq!(thread("p11").root_id, "p11");
        assert_eq!(thread("p11").reply_depth, 0);
    }

    #[test]
    fn reply_cycles_terminate() {
        let merged = merge_timeline(vec![post("a", 1, Some("b")), post("b", 2, Some("a"))]);

        assert_eq!(merged.len(), 2);
        for p in &merged {
            assert_eq!(p.thread.as_ref().unwrap().root_id, p.id);
        }
    }

    #[test]
    fn recent_thread_is_grouped_oldest_first() {
        let merged = merge_timeline(vec![
            post("root", 5, None),
            post("other", 3, None),
            post("reply", 1, Some("root")),
        ]);
        assert_eq!(ids(&merged), vec!["root", "reply", "other"]);
    }

    #[test]
    fn old_parent_within_window_pulls_reply() {
        let merged = merge_timeline(vec![
            post("root", 30, None),
            post("other", 2, None),
            post("reply", 1, Some("root")),
        ]);
        assert_eq!(ids(&merged), vec!["other", "root", "reply"]);
    }

    #[test]
    fn distant_parent_does_not_pull_reply() {
        let mut posts = vec![post("reply", 1, Some("root")), post("root", 40, None)];
        for i in 0..11 {
            posts.push(post(&format!("u{i:02}"), 2 + i, None));
        }

        let merged = merge_timeline(posts);
        assert_eq!(merged.first().map(|p| p.id.as_str()), Some("reply"));
        assert_eq!(merged.last().map(|p| p.id.as_str()), Some("root"));
    }

    #[test]
    fn pulled_siblings_stay_after_earlier_pulls() {
        let merged = merge_timeline(vec![
            post("root", 48, None),
            post("x", 3, None),
            post("r1", 2, Some("root")),
            post("r2", 1, Some("root")),
        ]);
        // r2 anchors a cluster with r1; both follow root afterwards.
        assert_eq!(ids(&merged), vec!["x", "root", "r1", "r2"]);
    }

    #[test]
    fn pulled_reply_moves_with_its_parent() {
        // b is pulled under a first; a is then pulled under r and must
        // bring b along.
        let merged = merge_timeline(vec![
            post("r", 100, None),
            post("a", 60, Some("r")),
            post("b", 1, Some("a")),
            post("f1", 2, None),
            post("f2", 3, None),
            post("f3", 4, None),
            post("g", 70, None),
        ]);

        assert_eq!(ids(&merged), vec!["f1", "f2", "f3", "g", "r", "a", "b"]);
        let position = |id: &str| merged.iter().position(|p| p.id == id).unwrap();
        assert_eq!(position("b"), position("a") + 1);
        assert_eq!(position("a"), position("r") + 1);
    }

    #[test]
    fn thread_order_nests_replies_depth_first() {
        let ordered = thread_order(vec![
            post("old-root", 10, None),
            post("new-root", 2, None),
            post("reply-a", 9, Some("old-root")),
            post("reply-b", 1, Some("old-root")),
            post("reply-a1", 8, Some("reply-a")),
        ]);

        assert_eq!(
            ids(&ordered),
            vec!["new-root", "old-root", "reply-a", "reply-a1", "reply-b"]
        );
        let depth: Vec<u32> = ordered
            .iter()
            .map(|p| p.thread.as_ref().unwrap().reply_depth)
            .collect();
        assert_eq!(depth, vec![0, 0, 1, 2, 1]);
        assert_eq!(ordered[3].thread.as_ref().unwrap().root_id, "old-root");
    }

    #[test]
    fn thread_order_keeps_orphans_and_cycles() {
        let ordered = thread_order(vec![
            post("orphan", 1, Some("https://gone.example/1")),
            post("a", 3, Some("b")),
            post("b", 4, Some("a")),
        ]);
        let mut seen = ids(&ordered);
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "orphan"]);
    }
}
