//! Leaderboard ordering
//!
//! `RankKey` is the single definition of leaderboard order: points
//! descending, then earliest `updated_at`, then `user_id` so that the order
//! is total. The Postgres refresh uses the same three columns in its
//! `ROW_NUMBER()` window.
//!
//! `RankIndex` is an order-statistics treap keyed by `RankKey`. Updates,
//! rank lookups and positional selects are all O(log n) expected.

use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankKey {
    pub total_points: u64,
    pub updated_at: i64,
    pub user_id: String,
}

impl RankKey {
    pub fn new(user_id: &str, total_points: u64, updated_at: i64) -> Self {
        Self {
            total_points,
            updated_at,
            user_id: user_id.to_string(),
        }
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total_points
            .cmp(&self.total_points)
            .then_with(|| self.updated_at.cmp(&other.updated_at))
            .then_with(|| self.user_id.cmp(&other.user_id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type Link = Option<Box<Node>>;

struct Node {
    key: RankKey,
    priority: u64,
    size: usize,
    left: Link,
    right: Link,
}

impl Node {
    fn new(key: RankKey, priority: u64) -> Box<Self> {
        Box::new(Self {
            key,
            priority,
            size: 1,
            left: None,
            right: None,
        })
    }

    fn update(&mut self) {
        self.size = 1 + size(&self.left) + size(&self.right);
    }
}

fn size(link: &Link) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

/// Split into (< key, >= key), or (<= key, > key) when `inclusive`.
fn split(link: Link, key: &RankKey, inclusive: bool) -> (Link, Link) {
    match link {
        None => (None, None),
        Some(mut node) => {
            let goes_left = if inclusive {
                node.key <= *key
            } else {
                node.key < *key
            };
            if goes_left {
                let (left, right) = split(node.right.take(), key, inclusive);
                node.right = left;
                node.update();
                (Some(node), right)
            } else {
                let (left, right) = split(node.left.take(), key, inclusive);
                node.left = right;
                node.update();
                (left, Some(node))
            }
        }
    }
}

/// Every key in `a` must order before every key in `b`.
fn merge(a: Link, b: Link) -> Link {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(mut b)) => {
            if a.priority > b.priority {
                a.right = merge(a.right.take(), Some(b));
                a.update();
                Some(a)
            } else {
                b.left = merge(Some(a), b.left.take());
                b.update();
                Some(b)
            }
        }
    }
}

#[derive(Default)]
pub struct RankIndex {
    root: Link,
    /// Current key per user, needed to remove the stale position on update
    keys: HashMap<String, RankKey>,
    seed: u64,
}

impl RankIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert a user or move them to their new position
    pub fn upsert(&mut self, key: RankKey) {
        self.remove(&key.user_id);
        let priority = self.next_priority();
        let (left, right) = split(self.root.take(), &key, false);
        self.root = merge(merge(left, Some(Node::new(key.clone(), priority))), right);
        self.keys.insert(key.user_id.clone(), key);
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        let Some(key) = self.keys.remove(user_id) else {
            return false;
        };
        let (left, rest) = split(self.root.take(), &key, false);
        let (_removed, right) = split(rest, &key, true);
        self.root = merge(left, right);
        true
    }

    /// 1-based dense rank
    pub fn rank_of(&self, user_id: &str) -> Option<u32> {
        let key = self.keys.get(user_id)?;
        Some(self.count_before(key) as u32 + 1)
    }

    /// Key at 0-based position `index`
    pub fn select(&self, index: usize) -> Option<&RankKey> {
        let mut node = self.root.as_deref();
        let mut index = index;
        while let Some(n) = node {
            let left = size(&n.left);
            match index.cmp(&left) {
                Ordering::Less => node = n.left.as_deref(),
                Ordering::Equal => return Some(&n.key),
                Ordering::Greater => {
                    index -= left + 1;
                    node = n.right.as_deref();
                }
            }
        }
        None
    }

    /// `(rank, key)` pairs for the window `[offset, offset + limit)`
    pub fn page(&self, offset: usize, limit: usize) -> Vec<(u32, &RankKey)> {
        let end = offset.saturating_add(limit).min(self.len());
        (offset..end)
            .filter_map(|index| self.select(index).map(|key| (index as u32 + 1, key)))
            .collect()
    }

    fn count_before(&self, key: &RankKey) -> usize {
        let mut node = self.root.as_deref();
        let mut count = 0;
        while let Some(n) = node {
            if n.key < *key {
                count += size(&n.left) + 1;
                node = n.right.as_deref();
            } else {
                node = n.left.as_deref();
            }
        }
        count
    }

    // splitmix64
    fn next_priority(&mut self) -> u64 {
        self.seed = self.seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.seed;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}
