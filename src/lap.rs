//! Dense linear assignment by shortest augmenting paths.
//!
//! Rows are augmented one at a time with a Dijkstra pass on reduced costs
//! `cost[i][j] - row[i] - col[j]`, and the potentials are moved by the path
//! lengths after each pass. At the end the potentials are an optimal dual of
//! the assignment LP: every reduced cost is non-negative and the assigned
//! cells have reduced cost zero.

use crate::error::{QapError, Result};

/// Optimal assignment of a cost matrix with its dual potentials
#[derive(Debug, Clone)]
pub struct LapSolution {
    /// Column of each row
    pub row_to_col: Vec<usize>,
    pub cost: f64,
    pub row_potential: Vec<f64>,
    /// Zero on columns no row is assigned to
    pub col_potential: Vec<f64>,
}

impl LapSolution {
    #[inline]
    pub fn reduced_cost(&self, cost: &[Vec<f64>], i: usize, j: usize) -> f64 {
        cost[i][j] - self.row_potential[i] - self.col_potential[j]
    }
}

/// Minimum cost assignment of every row to a distinct column.
///
/// Needs at least as many columns as rows and finite costs.
pub fn solve_min(cost: &[Vec<f64>]) -> Result<LapSolution> {
    let n = cost.len();
    let m = cost.first().map_or(0, |row| row.len());
    if cost.iter().any(|row| row.len() != m) {
        return Err(QapError::Solver("LAP cost matrix is ragged".to_string()));
    }
    if n > m {
        return Err(QapError::Solver(format!("LAP with {} rows and only {} columns", n, m)));
    }
    if cost.iter().flatten().any(|c| !c.is_finite()) {
        return Err(QapError::Solver("LAP cost matrix has non-finite entries".to_string()));
    }

    // 1-based, index 0 is the virtual root of each pass
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; m + 1];
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        owner[0] = i;
        let mut j0 = 0;
        let mut dist = vec![f64::INFINITY; m + 1];
        let mut done = vec![false; m + 1];
        loop {
            done[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=m {
                if done[j] {
                    continue;
                }
                let reduced = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if reduced < dist[j] {
                    dist[j] = reduced;
                    way[j] = j0;
                }
                if dist[j] < delta {
                    delta = dist[j];
                    j1 = j;
                }
            }
            if j1 == 0 {
                return Err(QapError::Solver("LAP augmentation found no free column".to_string()));
            }
            for j in 0..=m {
                if done[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    dist[j] -= delta;
                }
            }
            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }
        // flip the alternating path back to the root
        while j0 != 0 {
            let prev = way[j0];
            owner[j0] = owner[prev];
            j0 = prev;
        }
    }

    let mut row_to_col = vec![0; n];
    for j in 1..=m {
        if owner[j] != 0 {
            row_to_col[owner[j] - 1] = j - 1;
        }
    }
    let total = row_to_col.iter().enumerate().map(|(i, &j)| cost[i][j]).sum();

    Ok(LapSolution {
        row_to_col,
        cost: total,
        row_potential: u[1..].to_vec(),
        col_potential: v[1..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::tests::injective_assignments;

    fn brute_force(cost: &[Vec<f64>]) -> f64 {
        let m = cost.first().map_or(0, |row| row.len());
        injective_assignments(cost.len(), m)
            .iter()
            .map(|a| a.as_slice().iter().enumerate().map(|(i, &j)| cost[i][j]).sum::<f64>())
            .fold(f64::INFINITY, f64::min)
    }

    fn assert_dual_optimal(cost: &[Vec<f64>], sol: &LapSolution) {
        for i in 0..cost.len() {
            for j in 0..cost[i].len() {
                let rc = sol.reduced_cost(cost, i, j);
                assert!(rc >= -1e-9, "negative reduced cost {} at ({}, {})", rc, i, j);
            }
            assert!(sol.reduced_cost(cost, i, sol.row_to_col[i]).abs() < 1e-9);
        }
        let dual: f64 = sol.row_potential.iter().sum::<f64>() + sol.col_potential.iter().sum::<f64>();
        assert!((dual - sol.cost).abs() < 1e-9);
    }

    #[test]
    fn test_square_optimum_and_duals() {
        let cost = vec![
            vec![4.0, 1.0, 3.0, 7.0],
            vec![2.0, 0.0, 5.0, 1.0],
            vec![3.0, 2.0, 2.0, 6.0],
            vec![-1.0, 8.0, 4.0, -3.0],
        ];
        let sol = solve_min(&cost).unwrap();
        assert!((sol.cost - brute_force(&cost)).abs() < 1e-9);
        assert_dual_optimal(&cost, &sol);

        let mut cols = sol.row_to_col.clone();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_identical_rows() {
        // the same row twice, as for a facility occupying two locations
        let cost = vec![vec![-6.0, -2.0, -9.0], vec![-6.0, -2.0, -9.0], vec![0.0, -4.0, -1.0]];
        let sol = solve_min(&cost).unwrap();
        assert!((sol.cost - brute_force(&cost)).abs() < 1e-9);
        assert_dual_optimal(&cost, &sol);
    }

    #[test]
    fn test_rectangular_leaves_free_columns_at_zero() {
        let cost = vec![vec![5.0, 2.0, 8.0, 1.0], vec![3.0, 7.0, 1.0, 4.0]];
        let sol = solve_min(&cost).unwrap();
        assert!((sol.cost - 2.0).abs() < 1e-9);
        for j in 0..4 {
            if !sol.row_to_col.contains(&j) {
                assert_eq!(sol.col_potential[j], 0.0);
            }
        }
    }

    #[test]
    fn test_rejects_more_rows_than_columns() {
        let cost = vec![vec![1.0], vec![2.0]];
        assert!(matches!(solve_min(&cost), Err(QapError::Solver(_))));
        assert!(solve_min(&[]).unwrap().row_to_col.is_empty());
    }
}
