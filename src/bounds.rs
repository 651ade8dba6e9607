//! LAP bound precomputation.
//!
//! For every (location, facility) pair the oracle solves constrained Linear
//! Assignment Problems over the cost vector
//! `beta[l][f] = flow[f*][f] * distance[l*][l]` of the fixed pair `(l*, f*)`,
//! and records the minimum and maximum cost facility `f*` can induce at `l*`.
//! Fischetti additionally derives (lifted) reduced costs from the potentials
//! of the maximizing LAP.
//!
//! Pairs are independent. Each worker owns a [`LapScratch`] and modifies it
//! only through [`ModelDescriptor::scoped`], so the scratch is back in its
//! base state after every pair whatever the outcome.

use crate::error::{QapError, Result};
use crate::formulation::{add_assignment_constraints, objectives_agree};
use crate::grid::PairGrid;
use crate::instance::QapInstance;
use crate::lap;
use crate::oracle::{ConstrSense, LinExpr, ModelDescriptor, ModelSense, SolveParams, SolverOracle, VarId};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the per-pair LAP bounds are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundStrategy {
    /// Fixed-pair LAP on one reused model, with lifted reduced costs
    Fischetti,
    /// Fixed-pair LAP with conflicts removed from the cost vector
    XiaYuan,
    /// Unfixed max LAP plus a min LAP restricted by exclusion rows
    Zhang,
}

impl fmt::Display for BoundStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundStrategy::Fischetti => write!(f, "fischetti"),
            BoundStrategy::XiaYuan => write!(f, "xiayuan"),
            BoundStrategy::Zhang => write!(f, "zhang"),
        }
    }
}

/// Bound phase configuration
#[derive(Debug, Clone)]
pub struct BoundConfig {
    /// Spread pairs over the rayon pool, one scratch model per worker
    pub parallel: bool,
    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl Default for BoundConfig {
    fn default() -> Self {
        BoundConfig {
            parallel: true,
            show_progress: false,
        }
    }
}

/// Bounds of a single pair
#[derive(Debug, Clone)]
pub struct PairBound {
    pub min: f64,
    pub max: f64,
    pub reduced_costs: Option<PairGrid<f64>>,
}

/// Per-pair bounds of one instance under one strategy. Read-only once built.
#[derive(Debug, Clone)]
pub struct BoundRecord {
    pub strategy: BoundStrategy,
    /// `min[(l, f)]`, over the instance's own facilities
    pub min: PairGrid<f64>,
    pub max: PairGrid<f64>,
    /// Fischetti only: `reduced_costs[(l, f)][(l', f')]`. The inner grids
    /// span the slack-padded facility set when the instance is not full.
    pub reduced_costs: Option<PairGrid<PairGrid<f64>>>,
    pub elapsed: Duration,
}

impl BoundRecord {
    #[inline]
    pub fn spread(&self, l: usize, f: usize) -> f64 {
        self.max[(l, f)] - self.min[(l, f)]
    }
}

/// Whether `(l, f)` can never be 1 together with the fixed pair `(l0, f0)`.
///
/// Another facility at `l0` always conflicts. Another location for `f0` only
/// conflicts when `f0` occupies a single location.
pub fn is_conflict(instance: &QapInstance, (l0, f0): (usize, usize), (l, f): (usize, usize)) -> bool {
    (l == l0 && f != f0) || (f == f0 && l != l0 && instance.multiplicity[f0] == 1)
}

/// Conflicting pairs of `(l0, f0)`, location-major.
pub fn conflicts(instance: &QapInstance, l0: usize, f0: usize) -> Vec<(usize, usize)> {
    let m = instance.num_locations();
    let n = instance.num_facilities();
    (0..m)
        .flat_map(|l| (0..n).map(move |f| (l, f)))
        .filter(|&pair| is_conflict(instance, (l0, f0), pair))
        .collect()
}

/// Continuous LAP columns over every pair, with or without assignment rows.
fn lap_model(instance: &QapInstance, name: &str, ub: f64, with_rows: bool) -> (ModelDescriptor, PairGrid<VarId>) {
    let mut model = ModelDescriptor::new(name);
    let x = PairGrid::from_fn(instance.num_locations(), instance.num_facilities(), |l, f| {
        model.add_continuous(format!("lap_x_{}_{}", l, f), 0.0, ub)
    });
    if with_rows {
        add_assignment_constraints(&mut model, instance, &x);
    }
    (model, x)
}

/// Per-worker LAP models for one instance
#[derive(Clone)]
pub struct LapScratch<'a> {
    oracle: &'a dyn SolverOracle,
    strategy: BoundStrategy,
    instance: Arc<QapInstance>,
    x: PairGrid<VarId>,
    /// Fixed-pair LAP (Fischetti, Xia-Yuan) or the max LAP (Zhang)
    lap: ModelDescriptor,
    /// Zhang's row-less min LAP, same column layout as `lap`
    lap_min: Option<ModelDescriptor>,
}

impl<'a> LapScratch<'a> {
    pub fn new(oracle: &'a dyn SolverOracle, strategy: BoundStrategy, instance: &QapInstance) -> Self {
        match strategy {
            BoundStrategy::Fischetti => {
                // tight location rows keep the reduced cost identity exact
                let padded = instance.with_slack_facility().unwrap_or_else(|| instance.clone());
                let (lap, x) = lap_model(&padded, "lap", f64::INFINITY, true);
                LapScratch {
                    oracle,
                    strategy,
                    instance: Arc::new(padded),
                    x,
                    lap,
                    lap_min: None,
                }
            }
            BoundStrategy::XiaYuan => {
                let (lap, x) = lap_model(instance, "lap", 1.0, true);
                LapScratch {
                    oracle,
                    strategy,
                    instance: Arc::new(instance.clone()),
                    x,
                    lap,
                    lap_min: None,
                }
            }
            BoundStrategy::Zhang => {
                let (lap, x) = lap_model(instance, "lap_max", 1.0, true);
                let (lap_min, _) = lap_model(instance, "lap_min", 1.0, false);
                LapScratch {
                    oracle,
                    strategy,
                    instance: Arc::new(instance.clone()),
                    x,
                    lap,
                    lap_min: Some(lap_min),
                }
            }
        }
    }

    /// Cost vector of the fixed pair, optionally without its conflicts.
    fn beta(&self, l0: usize, f0: usize, skip_conflicts: bool) -> LinExpr {
        let instance = &self.instance;
        self.x
            .iter()
            .filter(|&((l, f), _)| !(skip_conflicts && is_conflict(instance, (l0, f0), (l, f))))
            .map(|((l, f), &var)| (var, instance.pair_weight(f0, l0, f, l)))
            .collect()
    }

    fn fix_expr(&self, l: usize, f: usize) -> LinExpr {
        LinExpr::from_iter([(self.x[(l, f)], 1.0)])
    }

    pub fn compute_pair(&mut self, l: usize, f: usize) -> Result<PairBound> {
        match self.strategy {
            BoundStrategy::Fischetti => self.fischetti_pair(l, f),
            BoundStrategy::XiaYuan => self.xia_yuan_pair(l, f),
            BoundStrategy::Zhang => self.zhang_pair(l, f),
        }
    }

    fn fischetti_pair(&mut self, l0: usize, f0: usize) -> Result<PairBound> {
        let beta = self.beta(l0, f0, false);
        let fix = self.fix_expr(l0, f0);
        let oracle = self.oracle;
        let x = &self.x;

        let (min, max, selected) = {
            let mut scope = self.lap.scoped();
            scope.add_constr("fix", fix, ConstrSense::Eq, 1.0);
            scope.set_objective(beta, ModelSense::Minimize);
            let min = oracle.solve(&scope, &SolveParams::default())?.optimal_objective("lap")?;

            scope.set_sense(ModelSense::Maximize);
            let out = oracle.solve(&scope, &SolveParams::default())?;
            let max = out.optimal_objective("lap")?;
            let selected = x.map(|&var| out.value(var).round() == 1.0);
            (min, max, selected)
        };

        let duals = fixed_max_lap_duals(&self.instance, l0, f0)?;
        if !objectives_agree(duals.max, max) {
            log::warn!(
                "LAP max of ({}, {}) is {} from {} but {} from its potentials",
                l0,
                f0,
                max,
                oracle.name(),
                duals.max
            );
        }
        // only non-positive reduced costs on unselected columns
        let mut rc = PairGrid::from_fn(x.locations(), x.facilities(), |l, f| {
            if selected[(l, f)] {
                0.0
            } else {
                -duals.reduced_costs[(l, f)].abs()
            }
        });

        let conflicting = conflicts(&self.instance, l0, f0);
        for &pair in &conflicting {
            rc[pair] = 0.0;
        }
        for &(lc, fc) in &conflicting {
            let lifted: LinExpr = x.iter().map(|(pair, &var)| (var, rc[pair])).collect();
            let pin = LinExpr::from_iter([(x[(lc, fc)], 1.0)]);
            let mut scope = self.lap.scoped();
            scope.add_constr("lift", pin, ConstrSense::Eq, 1.0);
            scope.set_objective(lifted, ModelSense::Maximize);
            let best = oracle.solve(&scope, &SolveParams::default())?.optimal_objective("lap-lift")?;
            rc[(lc, fc)] = -best;
        }

        Ok(PairBound {
            min,
            max,
            reduced_costs: Some(rc),
        })
    }

    fn xia_yuan_pair(&mut self, l0: usize, f0: usize) -> Result<PairBound> {
        let beta = self.beta(l0, f0, true);
        let fix = self.fix_expr(l0, f0);
        let oracle = self.oracle;

        // a facility spread over several locations may leave `l0` without
        // freeing a slot for the facility that sits there, so its max is
        // taken over the unfixed polytope
        let unfixed_max = self.instance.multiplicity[f0] > 1;

        let mut scope = self.lap.scoped();
        let fix_id = scope.add_constr("fix", fix, ConstrSense::Eq, 1.0);
        scope.set_objective(beta, ModelSense::Minimize);
        let min = oracle.solve(&scope, &SolveParams::default())?.optimal_objective("lap")?;
        if unfixed_max {
            scope.remove_constr(fix_id);
        }
        scope.set_sense(ModelSense::Maximize);
        let max = oracle.solve(&scope, &SolveParams::default())?.optimal_objective("lap")?;

        Ok(PairBound {
            min,
            max,
            reduced_costs: None,
        })
    }

    fn zhang_pair(&mut self, l0: usize, f0: usize) -> Result<PairBound> {
        let oracle = self.oracle;
        let max = {
            let full = self.beta(l0, f0, false);
            let mut scope = self.lap.scoped();
            scope.set_objective(full, ModelSense::Maximize);
            oracle.solve(&scope, &SolveParams::default())?.optimal_objective("lap_max")?
        };

        let reduced = self.beta(l0, f0, true);
        let instance = Arc::clone(&self.instance);
        let x = &self.x;
        let lap_min = self
            .lap_min
            .as_mut()
            .ok_or_else(|| QapError::Solver("min LAP missing from scratch".to_string()))?;
        let m = instance.num_locations();
        let n = instance.num_facilities();
        let spread = instance.multiplicity[f0] > 1;

        let mut scope = lap_min.scoped();
        for f in 0..n {
            if f == f0 && !spread {
                continue;
            }
            let demand = if f == f0 { instance.multiplicity[f] - 1 } else { instance.multiplicity[f] };
            let expr: LinExpr = (0..m).filter(|&l| l != l0).map(|l| (x[(l, f)], 1.0)).collect();
            scope.add_constr(format!("exclude_f{}", f), expr, ConstrSense::Eq, demand as f64);
        }
        for l in (0..m).filter(|&l| l != l0) {
            let expr: LinExpr = (0..n).filter(|&f| f != f0 || spread).map(|f| (x[(l, f)], 1.0)).collect();
            scope.add_constr(format!("exclude_l{}", l), expr, ConstrSense::Le, 1.0);
        }
        scope.set_objective(reduced, ModelSense::Minimize);
        let min = oracle.solve(&scope, &SolveParams::default())?.optimal_objective("lap_min")?;

        Ok(PairBound {
            min,
            max,
            reduced_costs: None,
        })
    }
}

/// Max LAP of a fixed pair with the reduced costs of an optimal dual.
pub(crate) struct LapDuals {
    pub max: f64,
    /// `rc[(l, f)] <= 0`, zero on the fixed pair
    pub reduced_costs: PairGrid<f64>,
}

/// Dual of the fixed-pair max LAP of a full instance, read off the
/// potentials of [`lap::solve_min`].
///
/// Facility `f` becomes `multiplicity[f]` identical rows and the fixed pair
/// takes location `l0` and one row of `f0` out of the matrix. Copies of one
/// facility share the mean of their row potentials. The duals of `l0`, of
/// `f0` when it has no row left, and of the fix row are set to the tightest
/// feasible value.
pub(crate) fn fixed_max_lap_duals(instance: &QapInstance, l0: usize, f0: usize) -> Result<LapDuals> {
    let m = instance.num_locations();
    let n = instance.num_facilities();
    if !instance.is_full() {
        return Err(QapError::MalformedInstance(format!(
            "{}: reduced costs need every location occupied",
            instance.name
        )));
    }
    // min form of the max problem
    let cost = |l: usize, f: usize| -instance.pair_weight(f0, l0, f, l);

    let rows: Vec<usize> = (0..n)
        .flat_map(|f| {
            let copies = instance.multiplicity[f] - usize::from(f == f0);
            std::iter::repeat(f).take(copies)
        })
        .collect();
    let cols: Vec<usize> = (0..m).filter(|&l| l != l0).collect();
    let matrix: Vec<Vec<f64>> = rows
        .iter()
        .map(|&f| cols.iter().map(|&l| cost(l, f)).collect())
        .collect();
    let sol = lap::solve_min(&matrix)?;

    let mut sums = vec![0.0; n];
    for (i, &f) in rows.iter().enumerate() {
        sums[f] += sol.row_potential[i];
    }
    let mut facility_dual: Vec<Option<f64>> = (0..n)
        .map(|f| {
            let copies = rows.iter().filter(|&&g| g == f).count();
            (copies > 0).then(|| sums[f] / copies as f64)
        })
        .collect();
    let mut location_dual = vec![0.0; m];
    for (j, &l) in cols.iter().enumerate() {
        location_dual[l] = sol.col_potential[j];
    }

    for f in 0..n {
        if facility_dual[f].is_none() {
            let dual = cols.iter().map(|&l| cost(l, f) - location_dual[l]).reduce(f64::min);
            facility_dual[f] = Some(dual.unwrap_or(0.0));
        }
    }
    let facility_dual: Vec<f64> = facility_dual.into_iter().map(|d| d.unwrap_or(0.0)).collect();
    location_dual[l0] = (0..n)
        .filter(|&f| f != f0)
        .map(|f| cost(l0, f) - facility_dual[f])
        .reduce(f64::min)
        .unwrap_or(0.0);

    let reduced_costs = PairGrid::from_fn(m, n, |l, f| {
        if (l, f) == (l0, f0) {
            0.0
        } else {
            -(cost(l, f) - facility_dual[f] - location_dual[l]).max(0.0)
        }
    });

    Ok(LapDuals {
        max: instance.pair_weight(f0, l0, f0, l0) - sol.cost,
        reduced_costs,
    })
}

/// Computes a [`BoundRecord`] through a [`SolverOracle`]
pub struct BoundOracle<'a> {
    oracle: &'a dyn SolverOracle,
    strategy: BoundStrategy,
    config: BoundConfig,
}

impl<'a> BoundOracle<'a> {
    pub fn new(oracle: &'a dyn SolverOracle, strategy: BoundStrategy, config: BoundConfig) -> Self {
        BoundOracle {
            oracle,
            strategy,
            config,
        }
    }

    pub fn strategy(&self) -> BoundStrategy {
        self.strategy
    }

    /// Bounds of a single pair, on a fresh scratch model.
    pub fn compute_pair(&self, instance: &QapInstance, l: usize, f: usize) -> Result<PairBound> {
        LapScratch::new(self.oracle, self.strategy, instance).compute_pair(l, f)
    }

    /// Bounds of every (location, facility) pair of the instance.
    pub fn compute(&self, instance: &QapInstance) -> Result<BoundRecord> {
        let start = Instant::now();
        let m = instance.num_locations();
        let n = instance.num_facilities();
        let pairs: Vec<(usize, usize)> = (0..m).flat_map(|l| (0..n).map(move |f| (l, f))).collect();

        log::info!(
            "Computing {} bounds for {} ({} pairs, {})",
            self.strategy,
            instance.name,
            pairs.len(),
            if self.config.parallel { "parallel" } else { "sequential" }
        );

        let progress = if self.config.show_progress {
            let bar = ProgressBar::new(pairs.len() as u64);
            if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})") {
                bar.set_style(style);
            }
            bar.set_message(format!("{} LAPs", self.strategy));
            bar
        } else {
            ProgressBar::hidden()
        };

        let scratch = LapScratch::new(self.oracle, self.strategy, instance);
        let results: Vec<PairBound> = if self.config.parallel {
            pairs
                .par_iter()
                .map_init(
                    || scratch.clone(),
                    |scratch, &(l, f)| {
                        let bound = scratch.compute_pair(l, f);
                        progress.inc(1);
                        bound
                    },
                )
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut scratch = scratch;
            pairs
                .iter()
                .map(|&(l, f)| {
                    let bound = scratch.compute_pair(l, f);
                    progress.inc(1);
                    bound
                })
                .collect::<Result<Vec<_>>>()?
        };
        progress.finish_and_clear();

        let min = PairGrid::from_cells(m, n, results.iter().map(|b| b.min).collect());
        let max = PairGrid::from_cells(m, n, results.iter().map(|b| b.max).collect());
        let reduced_costs = match self.strategy {
            BoundStrategy::Fischetti => {
                let grids: Option<Vec<PairGrid<f64>>> = results.into_iter().map(|b| b.reduced_costs).collect();
                grids.map(|cells| PairGrid::from_cells(m, n, cells))
            }
            _ => None,
        };

        let elapsed = start.elapsed();
        log::info!("# finished {} bounds in {:.3} seconds", self.strategy, elapsed.as_secs_f64());

        Ok(BoundRecord {
            strategy: self.strategy,
            min,
            max,
            reduced_costs,
            elapsed,
        })
    }
}
