//! Lazy combination enumeration over ranked indices

/// k-combinations of `0..n` in lexicographic order
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            started: false,
            done: k == 0 || k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.indices.clone());
        }

        let k = self.indices.len();
        // Rightmost position that can still move right
        let pivot = (0..k).rev().find(|&i| self.indices[i] != i + self.n - k);
        match pivot {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                Some(self.indices.clone())
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Every non-empty subset of `0..n`, largest first, lexicographic within a size
pub fn descending_subsets(n: usize) -> impl Iterator<Item = Vec<usize>> {
    (1..=n).rev().flat_map(move |k| Combinations::new(n, k))
}

/// Index tuples (one index per group) whose components sum to `target`,
/// in lexicographic order, stopping once `out` holds `limit` entries
pub fn tuples_with_sum(
    lens: &[usize],
    target: usize,
    limit: usize,
    out: &mut Vec<Vec<usize>>,
) {
    let mut current = Vec::with_capacity(lens.len());
    collect_tuples(lens, target, limit, &mut current, out);
}

fn collect_tuples(
    lens: &[usize],
    remaining: usize,
    limit: usize,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if out.len() >= limit {
        return;
    }
    let depth = current.len();
    if depth == lens.len() {
        if remaining == 0 {
            out.push(current.clone());
        }
        return;
    }

    // What the remaining groups can still absorb
    let tail_capacity: usize = lens[depth + 1..].iter().map(|l| l - 1).sum();
    let low = remaining.saturating_sub(tail_capacity);
    let high = remaining.min(lens[depth] - 1);
    for value in low..=high {
        if out.len() >= limit {
            return;
        }
        current.push(value);
        collect_tuples(lens, remaining - value, limit, current, out);
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinations_lexicographic() {
        let combos: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            combos,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
    }

    #[test]
    fn test_degenerate_combinations_are_empty() {
        assert_eq!(Combinations::new(3, 0).count(), 0);
        assert_eq!(Combinations::new(2, 3).count(), 0);
    }

    #[test]
    fn test_descending_subsets_starts_with_full_set() {
        let subsets: Vec<Vec<usize>> = descending_subsets(3).collect();
        assert_eq!(subsets.len(), 7);
        assert_eq!(subsets[0], vec![0, 1, 2]);
        assert_eq!(subsets[1], vec![0, 1]);
        assert_eq!(subsets[6], vec![2]);
    }

    #[test]
    fn test_tuples_with_sum_respects_group_sizes() {
        let mut out = Vec::new();
        tuples_with_sum(&[2, 3], 2, usize::MAX, &mut out);
        assert_eq!(out, vec![vec![0, 2], vec![1, 1]]);

        let mut limited = Vec::new();
        tuples_with_sum(&[3, 3], 2, 2, &mut limited);
        assert_eq!(limited, vec![vec![0, 2], vec![1, 1]]);
    }
}
