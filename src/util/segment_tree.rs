use std::ops::RangeInclusive;

/// Something covering a closed range of positions
pub trait Interval {
    fn span(&self) -> RangeInclusive<usize>;
}

impl Interval for RangeInclusive<usize> {
    fn span(&self) -> RangeInclusive<usize> {
        self.clone()
    }
}

impl<I: Interval> Interval for &I {
    fn span(&self) -> RangeInclusive<usize> {
        (*self).span()
    }
}

/// Stabbing-query index over intervals of a dense domain `0..domain`
///
/// Nodes are laid out heap-style in a flat vector; each interval is recorded on the
/// `O(log n)` canonical nodes that cover it, so finding every interval containing a point only
/// walks one root-to-leaf path.
#[derive(Debug)]
pub struct SegmentTree<I> {
    domain: usize,
    nodes: Vec<Vec<usize>>,
    intervals: Vec<I>,
}

impl<I: Interval> SegmentTree<I> {
    /// Index all intervals, clamping them to the domain
    pub fn new(domain: usize, intervals: Vec<I>) -> SegmentTree<I> {
        let mut tree = SegmentTree {
            domain,
            nodes: vec![Vec::new(); 4 * domain.max(1)],
            intervals: Vec::new(),
        };
        for interval in intervals {
            let span = interval.span();
            let index = tree.intervals.len();
            tree.intervals.push(interval);
            if domain == 0 || span.start() > span.end() || *span.start() >= domain {
                continue;
            }
            let until = (*span.end()).min(domain - 1);
            tree.insert(1, 0, domain - 1, *span.start(), until, index);
        }
        tree
    }

    fn insert(&mut self, node: usize, lo: usize, hi: usize, from: usize, until: usize, idx: usize) {
        if from <= lo && hi <= until {
            self.nodes[node].push(idx);
            return;
        }
        let mid = (lo + hi) / 2;
        if from <= mid {
            self.insert(2 * node, lo, mid, from, until, idx);
        }
        if until > mid {
            self.insert(2 * node + 1, mid + 1, hi, from, until, idx);
        }
    }

    /// All intervals whose span contains `point`
    pub fn intervals_containing(&self, point: usize) -> Vec<&I> {
        let mut found = vec![];
        if point >= self.domain {
            return found;
        }
        let (mut node, mut lo, mut hi) = (1, 0, self.domain - 1);
        loop {
            found.extend(self.nodes[node].iter().map(|idx| &self.intervals[*idx]));
            if lo == hi {
                break;
            }
            let mid = (lo + hi) / 2;
            if point <= mid {
                node = 2 * node;
                hi = mid;
            } else {
                node = 2 * node + 1;
                lo = mid + 1;
            }
        }
        found
    }

    pub fn intervals(&self) -> &[I] {
        &self.intervals
    }
}
