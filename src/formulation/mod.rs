//! Master MILP formulations of the QAP.
//!
//! All five variants share binary columns `x[l][f]` (facility `f` occupies
//! location `l`) and the assignment rows; they differ in how the quadratic
//! cost is expressed. Variants are looked up through a static registry keyed
//! by name, see [`Variant::formulation`].

mod fischetti;
mod linearized;
mod quadratic;
mod xia_yuan;
mod zhang;

pub use fischetti::Fischetti;
pub use linearized::Linearized;
pub use quadratic::Quadratic;
pub use xia_yuan::XiaYuan;
pub use zhang::Zhang;

use crate::bounds::{BoundConfig, BoundOracle, BoundRecord, BoundStrategy};
use crate::equivalence::Reduction;
use crate::error::{QapError, Result};
use crate::grid::PairGrid;
use crate::instance::{Assignment, Placement, QapInstance};
use crate::oracle::{
    ConstrSense, LinExpr, ModelDescriptor, ModelSense, SolveOutcome, SolveParams, SolverOracle, Status, VarId,
};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Available formulations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Quadratic,
    Linearized,
    Fischetti,
    XiaYuan,
    Zhang,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Quadratic,
        Variant::Linearized,
        Variant::Fischetti,
        Variant::XiaYuan,
        Variant::Zhang,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Quadratic => "quadratic",
            Variant::Linearized => "linearized",
            Variant::Fischetti => "fischetti",
            Variant::XiaYuan => "xiayuan",
            Variant::Zhang => "zhang",
        }
    }

    pub fn formulation(&self) -> &'static dyn Formulation {
        static QUADRATIC: Quadratic = Quadratic;
        static LINEARIZED: Linearized = Linearized;
        static FISCHETTI: Fischetti = Fischetti;
        static XIA_YUAN: XiaYuan = XiaYuan;
        static ZHANG: Zhang = Zhang;

        match self {
            Variant::Quadratic => &QUADRATIC,
            Variant::Linearized => &LINEARIZED,
            Variant::Fischetti => &FISCHETTI,
            Variant::XiaYuan => &XIA_YUAN,
            Variant::Zhang => &ZHANG,
        }
    }

    /// Parse a comma separated list such as `"quadratic,zhang"`.
    pub fn parse_list(list: &str) -> Result<Vec<Variant>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Variant::from_str)
            .collect()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = QapError;

    fn from_str(s: &str) -> Result<Self> {
        Variant::ALL
            .iter()
            .copied()
            .find(|v| v.name() == s.to_ascii_lowercase())
            .ok_or_else(|| QapError::UnknownVariant(s.to_string()))
    }
}

/// Limits passed to the master solve
#[derive(Debug, Clone)]
pub struct SolveLimits {
    /// Wall-clock limit in seconds (None = unlimited)
    pub time_limit: Option<f64>,
    /// Solver threads (None = backend default)
    pub threads: Option<usize>,
    /// Number of best solutions to collect
    pub pool_size: usize,
    /// Forward the solver log
    pub verbose: bool,
}

impl Default for SolveLimits {
    fn default() -> Self {
        SolveLimits {
            time_limit: None,
            threads: None,
            pool_size: 1,
            verbose: false,
        }
    }
}

impl SolveLimits {
    fn params(&self) -> SolveParams {
        SolveParams {
            time_limit: self.time_limit,
            threads: self.threads,
            pool_size: self.pool_size.max(1),
            verbose: self.verbose,
            reduced_costs: false,
        }
    }
}

/// A master model ready to be handed to an oracle
#[derive(Debug, Clone)]
pub struct BuiltModel {
    pub descriptor: ModelDescriptor,
    /// `x[(l, f)]` for the instance's own facilities
    pub x: PairGrid<VarId>,
}

impl BuiltModel {
    /// Facilities of the instance, without any slack padding
    pub fn real_facilities(&self) -> usize {
        self.x.facilities()
    }
}

/// Structured result of one variant on one instance
#[derive(Debug, Clone)]
pub struct VariantOutcome {
    pub variant: Variant,
    pub status: Status,
    /// Objective reported by the solver
    pub objective: Option<f64>,
    /// Locations of every facility of the instance that was passed in
    pub placement: Option<Placement>,
    /// Same as `placement` when every facility occupies one location
    pub assignment: Option<Assignment>,
    /// Objectives of the solution pool, best first
    pub pool_objectives: Vec<f64>,
    /// Facility count of the model actually solved
    pub solved_facilities: usize,
    pub solve_time: Duration,
    pub bound_time: Duration,
}

impl VariantOutcome {
    fn unsolved(variant: Variant, status: Status, solved_facilities: usize, solve_time: Duration) -> Self {
        VariantOutcome {
            variant,
            status,
            objective: None,
            placement: None,
            assignment: None,
            pool_objectives: Vec::new(),
            solved_facilities,
            solve_time,
            bound_time: Duration::ZERO,
        }
    }

    /// The pool holds exactly one solution at the optimal objective.
    pub fn unique_optimum(&self) -> bool {
        match (self.objective, self.pool_objectives.get(1)) {
            (Some(_), None) => true,
            (Some(best), Some(&second)) => !objectives_agree(best, second),
            _ => false,
        }
    }
}

/// Relative comparison used for objective cross-checks.
pub fn objectives_agree(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

/// A QAP master formulation
pub trait Formulation: Send + Sync {
    fn variant(&self) -> Variant;

    /// Bounds the master needs, if any
    fn bound_strategy(&self) -> Option<BoundStrategy> {
        None
    }

    fn build(&self, instance: &QapInstance, bounds: Option<&BoundRecord>) -> Result<BuiltModel>;

    /// Compute bounds, build and solve the master on `instance`.
    fn solve(
        &self,
        instance: &QapInstance,
        oracle: &dyn SolverOracle,
        limits: &SolveLimits,
        bound_config: &BoundConfig,
    ) -> Result<VariantOutcome> {
        let (built, bound_time) = self.prepare(instance, oracle, bound_config)?;
        let start = Instant::now();
        let out = oracle.solve(&built.descriptor, &limits.params())?;
        log::info!(
            "{} on {}: {} in {:.3}s",
            self.variant(),
            instance.name,
            out.status,
            start.elapsed().as_secs_f64()
        );
        finish(self.variant(), instance, &built, out, start.elapsed(), bound_time)
    }

    /// Solve the reduced instance, expand the solution to the original
    /// facilities and confirm it with a zero-objective feasibility re-solve.
    fn solve_with_equivalence(
        &self,
        reduction: &Reduction,
        oracle: &dyn SolverOracle,
        limits: &SolveLimits,
        bound_config: &BoundConfig,
    ) -> Result<VariantOutcome> {
        let reduced = &reduction.instance;
        let (built, bound_time) = self.prepare(reduced, oracle, bound_config)?;
        let start = Instant::now();
        let out = oracle.solve(&built.descriptor, &limits.params())?;
        log::info!(
            "{} on {}: {} in {:.3}s",
            self.variant(),
            reduced.name,
            out.status,
            start.elapsed().as_secs_f64()
        );
        let mut outcome = finish(self.variant(), reduced, &built, out, start.elapsed(), bound_time)?;
        let Some(reduced_placement) = outcome.placement.take() else {
            return Ok(outcome);
        };

        let expanded = reduction.expand_placement(&reduced_placement)?;
        let status = verify_expansion(built, reduction, &expanded, oracle, limits)?;
        if status != Status::Optimal {
            return Err(QapError::ExpansionInfeasible {
                variant: self.variant().to_string(),
                status,
            });
        }
        log::debug!("{}: expansion of {} confirmed", self.variant(), reduced.name);

        outcome.solve_time = start.elapsed();
        outcome.assignment = as_assignment(&expanded);
        outcome.placement = Some(expanded);
        Ok(outcome)
    }

    /// Compute the bounds this variant needs and build its master.
    fn prepare(
        &self,
        instance: &QapInstance,
        oracle: &dyn SolverOracle,
        bound_config: &BoundConfig,
    ) -> Result<(BuiltModel, Duration)> {
        let record = match self.bound_strategy() {
            Some(strategy) => Some(BoundOracle::new(oracle, strategy, bound_config.clone()).compute(instance)?),
            None => None,
        };
        let bound_time = record.as_ref().map(|r| r.elapsed).unwrap_or_default();
        let built = self.build(instance, record.as_ref())?;
        log::debug!(
            "{} model: {} vars, {} constrs",
            self.variant(),
            built.descriptor.num_vars(),
            built.descriptor.num_constrs()
        );
        Ok((built, bound_time))
    }
}

fn finish(
    variant: Variant,
    instance: &QapInstance,
    built: &BuiltModel,
    out: SolveOutcome,
    solve_time: Duration,
    bound_time: Duration,
) -> Result<VariantOutcome> {
    let n = instance.num_facilities();
    if !out.is_optimal() {
        let mut outcome = VariantOutcome::unsolved(variant, out.status, n, solve_time);
        outcome.bound_time = bound_time;
        return Ok(outcome);
    }
    let placement = extract_placement(instance, &built.x, &out.values)?;
    Ok(VariantOutcome {
        variant,
        status: out.status,
        objective: out.objective,
        assignment: as_assignment(&placement),
        placement: Some(placement),
        pool_objectives: out.pool.iter().map(|s| s.objective).collect(),
        solved_facilities: n,
        solve_time,
        bound_time,
    })
}

fn as_assignment(placement: &Placement) -> Option<Assignment> {
    placement
        .iter()
        .map(|locs| if locs.len() == 1 { Some(locs[0]) } else { None })
        .collect::<Option<Vec<_>>>()
        .map(Assignment::new)
}

/// Read the occupied locations of every facility from a solution.
pub fn extract_placement(instance: &QapInstance, x: &PairGrid<VarId>, values: &[f64]) -> Result<Placement> {
    let mut placement: Placement = vec![Vec::new(); instance.num_facilities()];
    for ((l, f), &var) in x.iter() {
        if values.get(var.index()).copied().unwrap_or(0.0) > 0.5 {
            placement[f].push(l);
        }
    }
    for (f, locs) in placement.iter().enumerate() {
        if locs.len() != instance.multiplicity[f] {
            return Err(QapError::Solver(format!(
                "solution puts facility `{}` on {} locations, expected {}",
                instance.facilities[f],
                locs.len(),
                instance.multiplicity[f]
            )));
        }
    }
    Ok(placement)
}

/// Binary `x[(l, f)]` over every pair of the instance.
pub(crate) fn binary_grid(model: &mut ModelDescriptor, instance: &QapInstance) -> PairGrid<VarId> {
    PairGrid::from_fn(instance.num_locations(), instance.num_facilities(), |l, f| {
        model.add_binary(format!("x_{}_{}", l, f))
    })
}

/// Every facility fills its multiplicity, every location holds at most one
/// facility (exactly one when the instance is full).
pub(crate) fn add_assignment_constraints(model: &mut ModelDescriptor, instance: &QapInstance, x: &PairGrid<VarId>) {
    for f in 0..x.facilities() {
        let expr: LinExpr = (0..x.locations()).map(|l| (x[(l, f)], 1.0)).collect();
        model.add_constr(
            format!("facility_{}", f),
            expr,
            ConstrSense::Eq,
            instance.multiplicity[f] as f64,
        );
    }
    let location_sense = if instance.is_full() {
        ConstrSense::Eq
    } else {
        ConstrSense::Le
    };
    for l in 0..x.locations() {
        let expr: LinExpr = (0..x.facilities()).map(|f| (x[(l, f)], 1.0)).collect();
        model.add_constr(format!("location_{}", l), expr, location_sense, 1.0);
    }
}

pub(crate) fn require_bounds(variant: Variant, bounds: Option<&BoundRecord>) -> Result<&BoundRecord> {
    bounds.ok_or_else(|| QapError::Solver(format!("{} needs precomputed bounds", variant)))
}

/// Branching priorities from the bound spread.
///
/// Pairs are ranked ascending by (spread, facility, location) and the rank is
/// the priority, so the widest spread is branched on first.
pub fn branch_priorities(bounds: &BoundRecord) -> PairGrid<i32> {
    let mut order: Vec<(usize, usize)> = bounds.min.pairs().collect();
    order.sort_by_key(|&(l, f)| (OrderedFloat(bounds.spread(l, f)), f, l));
    let mut priorities = PairGrid::new(bounds.min.locations(), bounds.min.facilities(), 0);
    for (rank, pair) in order.into_iter().enumerate() {
        priorities[pair] = rank as i32 + 1;
    }
    priorities
}

/// Name of the model re-solved to confirm an expansion
pub const EXPANSION_MODEL: &str = "expansion-check";

/// Strip a solved reduced model down to its `x` columns, pin them to the
/// expansion, add the original facilities' columns and rows and re-solve
/// with a zero objective.
fn verify_expansion(
    built: BuiltModel,
    reduction: &Reduction,
    expanded: &Placement,
    oracle: &dyn SolverOracle,
    limits: &SolveLimits,
) -> Result<Status> {
    let BuiltModel { descriptor: mut model, x } = built;
    let original = &reduction.original;
    model.set_name(EXPANSION_MODEL);

    let mut keep = vec![false; model.var_capacity()];
    for (_, &var) in x.iter() {
        keep[var.index()] = true;
    }
    model.remove_all_constrs();
    let auxiliary: Vec<VarId> = model.vars().map(|(id, _)| id).filter(|id| !keep[id.index()]).collect();
    for var in auxiliary {
        model.remove_var(var);
    }

    let columns = PairGrid::from_fn(original.num_locations(), original.num_facilities(), |l, f| {
        let class = reduction.class_of[f];
        let var = if reduction.representatives[class] == f {
            x[(l, class)]
        } else {
            model.add_binary(format!("x_{}_{}", l, f))
        };
        let occupied = expanded[f].contains(&l);
        model.fix(var, if occupied { 1.0 } else { 0.0 });
        var
    });
    add_assignment_constraints(&mut model, original, &columns);
    model.set_objective(LinExpr::new(), ModelSense::Minimize);

    let params = SolveParams {
        pool_size: 1,
        ..limits.params()
    };
    Ok(oracle.solve(&model, &params)?.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::tests::{generated, injective_assignments, rectangular, rectangular_clones};
    use crate::equivalence::reduce;
    use crate::instance::tests::{ids, scenario_b};
    use crate::oracle::MicrolpOracle;

    fn brute_force_optimum(instance: &QapInstance) -> f64 {
        injective_assignments(instance.num_facilities(), instance.num_locations())
            .iter()
            .map(|a| instance.objective(a))
            .fold(f64::INFINITY, f64::min)
    }

    fn sequential() -> BoundConfig {
        BoundConfig {
            parallel: false,
            show_progress: false,
        }
    }

    /// Four facilities where f2 and f3 are clones.
    fn clone_instance() -> QapInstance {
        QapInstance::new(
            "clones",
            ids("f", 4),
            ids("", 4),
            vec![vec![0, 3, 3, 1], vec![2, 0, 6, 4], vec![2, 6, 0, 4], vec![5, 1, 1, 0]],
            vec![
                vec![0.0, 1.0, 4.0, 3.0],
                vec![2.0, 0.0, 2.0, 5.0],
                vec![4.0, 2.0, 0.0, 1.0],
                vec![3.0, 6.0, 1.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_variant_names() {
        for variant in Variant::ALL {
            assert_eq!(variant.name().parse::<Variant>().unwrap(), variant);
            assert_eq!(variant.formulation().variant(), variant);
        }
        assert_eq!(
            Variant::parse_list("quadratic, zhang,").unwrap(),
            vec![Variant::Quadratic, Variant::Zhang]
        );
        assert!(matches!("simplex".parse::<Variant>(), Err(QapError::UnknownVariant(_))));
    }

    #[test]
    fn test_scenario_b_all_variants_agree() {
        let instance = scenario_b();
        let expected = brute_force_optimum(&instance);
        let oracle = MicrolpOracle::new();
        for variant in Variant::ALL {
            let outcome = variant
                .formulation()
                .solve(&instance, &oracle, &SolveLimits::default(), &sequential())
                .unwrap();
            assert_eq!(outcome.status, Status::Optimal, "{}", variant);
            let assignment = outcome.assignment.unwrap();
            let reported = outcome.objective.unwrap();
            assert!(objectives_agree(reported, expected), "{}: {} vs {}", variant, reported, expected);
            assert!(objectives_agree(instance.objective(&assignment), reported), "{}", variant);
        }
    }

    #[test]
    fn test_rectangular_instance_variants() {
        let instance = rectangular();
        let expected = brute_force_optimum(&instance);
        let oracle = MicrolpOracle::new();
        for variant in Variant::ALL {
            let outcome = variant
                .formulation()
                .solve(&instance, &oracle, &SolveLimits::default(), &sequential())
                .unwrap();
            let assignment = outcome.assignment.unwrap();
            assert!(assignment.is_injective(instance.num_locations()));
            assert!(objectives_agree(outcome.objective.unwrap(), expected), "{}", variant);
        }
    }

    #[test]
    fn test_reduce_then_expand_matches_direct_solve() {
        let instance = clone_instance();
        let reduction = reduce(&instance).unwrap();
        assert_eq!(reduction.classes, vec![vec![0], vec![1, 2], vec![3]]);

        let expected = brute_force_optimum(&instance);
        let oracle = MicrolpOracle::new();
        for variant in [Variant::Quadratic, Variant::Fischetti, Variant::XiaYuan, Variant::Zhang] {
            let outcome = variant
                .formulation()
                .solve_with_equivalence(&reduction, &oracle, &SolveLimits::default(), &sequential())
                .unwrap();
            assert_eq!(outcome.solved_facilities, 3);
            let assignment = outcome.assignment.unwrap();
            assert!(assignment.is_injective(4));
            assert!(objectives_agree(instance.objective(&assignment), expected), "{}", variant);
            assert!(objectives_agree(outcome.objective.unwrap(), expected), "{}", variant);
        }
    }

    #[test]
    fn test_generated_instances_match_brute_force() {
        let oracle = MicrolpOracle::new();
        for seed in 0..3 {
            for square in [true, false] {
                let instance = generated(3, square, 1, seed);
                let expected = brute_force_optimum(&instance);
                for variant in Variant::ALL {
                    let outcome = variant
                        .formulation()
                        .solve(&instance, &oracle, &SolveLimits::default(), &sequential())
                        .unwrap();
                    assert_eq!(outcome.status, Status::Optimal, "{} on {}", variant, instance.name);
                    let reported = outcome.objective.unwrap();
                    assert!(
                        objectives_agree(reported, expected),
                        "{} on {}: {} vs {}",
                        variant,
                        instance.name,
                        reported,
                        expected
                    );
                }
            }
        }
    }

    #[test]
    fn test_rectangular_reduction_all_variants() {
        let instance = rectangular_clones();
        let reduction = reduce(&instance).unwrap();
        let expected = brute_force_optimum(&instance);
        let oracle = MicrolpOracle::new();
        for variant in Variant::ALL {
            let outcome = variant
                .formulation()
                .solve_with_equivalence(&reduction, &oracle, &SolveLimits::default(), &sequential())
                .unwrap();
            let assignment = outcome.assignment.unwrap();
            assert!(assignment.is_injective(5));
            assert!(objectives_agree(instance.objective(&assignment), expected), "{}", variant);
        }
    }

    #[test]
    fn test_default_limits_leave_threads_to_backend() {
        let limits = SolveLimits::default();
        assert_eq!(limits.threads, None);
        assert_eq!(limits.time_limit, None);
        assert_eq!(limits.pool_size, 1);
        assert!(!limits.verbose);
        assert_eq!(limits.params().threads, None);
    }

    #[test]
    fn test_expansion_check_rejects_shared_location() {
        let instance = clone_instance();
        let reduction = reduce(&instance).unwrap();
        let oracle = MicrolpOracle::new();
        let limits = SolveLimits::default();
        let build = || Variant::Quadratic.formulation().build(&reduction.instance, None).unwrap();

        let valid: Placement = vec![vec![0], vec![1], vec![2], vec![3]];
        assert_eq!(
            verify_expansion(build(), &reduction, &valid, &oracle, &limits).unwrap(),
            Status::Optimal
        );

        // both clones pinned to location 1
        let shared: Placement = vec![vec![0], vec![1], vec![1], vec![3]];
        let status = verify_expansion(build(), &reduction, &shared, &oracle, &limits).unwrap();
        assert_ne!(status, Status::Optimal);
    }

    #[test]
    fn test_branch_priority_follows_spread() {
        let instance = scenario_b();
        let oracle = MicrolpOracle::new();
        let bounds = BoundOracle::new(&oracle, BoundStrategy::Fischetti, sequential())
            .compute(&instance)
            .unwrap();
        let priorities = branch_priorities(&bounds);

        let mut by_priority: Vec<((usize, usize), i32)> = priorities.iter().map(|(p, &v)| (p, v)).collect();
        by_priority.sort_by_key(|&(_, v)| std::cmp::Reverse(v));
        for pair in by_priority.windows(2) {
            let ((l1, f1), _) = pair[0];
            let ((l2, f2), _) = pair[1];
            assert!(bounds.spread(l1, f1) >= bounds.spread(l2, f2));
        }

        let mut distinct: Vec<i32> = priorities.iter().map(|(_, &v)| v).collect();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 9);
    }

    #[test]
    fn test_pool_lists_alternatives() {
        let instance = scenario_b();
        let oracle = MicrolpOracle::new();
        let limits = SolveLimits {
            pool_size: 3,
            ..Default::default()
        };
        let outcome = Variant::Quadratic
            .formulation()
            .solve(&instance, &oracle, &limits, &sequential())
            .unwrap();
        assert_eq!(outcome.pool_objectives.len(), 3);
        assert!(outcome.pool_objectives.windows(2).all(|w| w[0] <= w[1] + 1e-9));
    }
}
