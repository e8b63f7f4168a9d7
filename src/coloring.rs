//! Jacobian sparsity patterns and perturbation coloring.
//!
//! Columns of a Jacobian whose sparsity patterns share no row can be
//! perturbed simultaneously in one evaluation and their contributions
//! disentangled afterward. The coloring is a greedy vertex coloring of the
//! column intersection graph (two columns are adjacent when some row
//! contains both), computed once at setup and cached.

use std::collections::HashSet;

/// Rectangular sparsity pattern in COO format.
///
/// Entries are sorted by (row, col) and mark positions where the Jacobian
/// may have non-zero values.
#[derive(Debug, Clone)]
pub struct SparsityPattern {
    pub nrows: usize,
    pub ncols: usize,
    /// Row indices (0-based).
    pub rows: Vec<u32>,
    /// Column indices (0-based).
    pub cols: Vec<u32>,
}

impl SparsityPattern {
    /// Build a pattern from unsorted COO entries.
    pub fn from_entries(nrows: usize, ncols: usize, mut entries: Vec<(u32, u32)>) -> Self {
        entries.sort_unstable();
        entries.dedup();
        let rows = entries.iter().map(|&(r, _)| r).collect();
        let cols = entries.iter().map(|&(_, c)| c).collect();
        SparsityPattern {
            nrows,
            ncols,
            rows,
            cols,
        }
    }

    /// Fully dense pattern.
    pub fn dense(nrows: usize, ncols: usize) -> Self {
        let mut entries = Vec::with_capacity(nrows * ncols);
        for r in 0..nrows {
            for c in 0..ncols {
                entries.push((r as u32, c as u32));
            }
        }
        SparsityPattern::from_entries(nrows, ncols, entries)
    }

    /// Number of non-zero entries in the pattern.
    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Greedy coloring of the columns of a sparsity pattern.
///
/// Two columns conflict when they share a row; columns of one color can be
/// perturbed together and recovered directly from a single evaluation.
/// Vertices are visited in decreasing-degree order for better results.
///
/// Returns `(colors, num_colors)` where `colors[j]` is the color of column `j`.
pub fn column_coloring(pattern: &SparsityPattern) -> (Vec<u32>, u32) {
    let n = pattern.ncols;
    if n == 0 {
        return (Vec::new(), 0);
    }

    // Columns present in each row
    let mut row_cols: Vec<Vec<u32>> = vec![Vec::new(); pattern.nrows];
    for (&r, &c) in pattern.rows.iter().zip(pattern.cols.iter()) {
        row_cols[r as usize].push(c);
    }

    // Column adjacency: columns sharing any row
    let mut adj: Vec<HashSet<u32>> = vec![HashSet::new(); n];
    for cols in &row_cols {
        for i in 0..cols.len() {
            for j in (i + 1)..cols.len() {
                adj[cols[i] as usize].insert(cols[j]);
                adj[cols[j] as usize].insert(cols[i]);
            }
        }
    }

    // Visit by decreasing degree, ties by column index for determinism
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| adj[b].len().cmp(&adj[a].len()).then(a.cmp(&b)));

    let mut colors = vec![u32::MAX; n];
    let mut num_colors = 0u32;

    for &v in &order {
        let mut used = HashSet::new();
        for &neighbor in &adj[v] {
            if colors[neighbor as usize] != u32::MAX {
                used.insert(colors[neighbor as usize]);
            }
        }

        let mut color = 0u32;
        while used.contains(&color) {
            color += 1;
        }
        colors[v] = color;
        if color + 1 > num_colors {
            num_colors = color + 1;
        }
    }

    (colors, num_colors)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every pair of same-colored columns must be row-disjoint.
    fn assert_valid_coloring(pattern: &SparsityPattern, colors: &[u32]) {
        let mut row_cols: Vec<Vec<u32>> = vec![Vec::new(); pattern.nrows];
        for (&r, &c) in pattern.rows.iter().zip(pattern.cols.iter()) {
            row_cols[r as usize].push(c);
        }
        for cols in &row_cols {
            for i in 0..cols.len() {
                for j in (i + 1)..cols.len() {
                    assert_ne!(
                        colors[cols[i] as usize],
                        colors[cols[j] as usize],
                        "columns {} and {} share a row but a color",
                        cols[i],
                        cols[j]
                    );
                }
            }
        }
    }

    #[test]
    fn diagonal_pattern_needs_one_color() {
        let entries = (0..5).map(|i| (i, i)).collect();
        let pattern = SparsityPattern::from_entries(5, 5, entries);
        let (colors, num_colors) = column_coloring(&pattern);
        assert_eq!(num_colors, 1);
        assert_valid_coloring(&pattern, &colors);
    }

    #[test]
    fn dense_pattern_needs_all_colors() {
        let pattern = SparsityPattern::dense(3, 4);
        let (colors, num_colors) = column_coloring(&pattern);
        assert_eq!(num_colors, 4);
        assert_valid_coloring(&pattern, &colors);
    }

    #[test]
    fn banded_pattern_colors_validly() {
        // Tridiagonal 6x6
        let mut entries = Vec::new();
        for i in 0..6u32 {
            entries.push((i, i));
            if i > 0 {
                entries.push((i, i - 1));
            }
            if i < 5 {
                entries.push((i, i + 1));
            }
        }
        let pattern = SparsityPattern::from_entries(6, 6, entries);
        let (colors, num_colors) = column_coloring(&pattern);
        assert!(num_colors <= 3, "tridiagonal should need at most 3 colors");
        assert_valid_coloring(&pattern, &colors);
    }

    #[test]
    fn empty_pattern() {
        let pattern = SparsityPattern::from_entries(0, 0, Vec::new());
        let (colors, num_colors) = column_coloring(&pattern);
        assert!(colors.is_empty());
        assert_eq!(num_colors, 0);
    }

    #[test]
    fn from_entries_sorts_and_dedups() {
        let pattern =
            SparsityPattern::from_entries(2, 2, vec![(1, 0), (0, 1), (1, 0), (0, 0)]);
        assert_eq!(pattern.nnz(), 3);
        assert_eq!(pattern.rows, vec![0, 0, 1]);
        assert_eq!(pattern.cols, vec![0, 1, 0]);
    }
}
