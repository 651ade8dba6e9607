//! Pure Rust oracle backed by the `microlp` crate.
//!
//! `microlp` solves linear and mixed binary programs only, so the descriptor
//! is lowered before solving:
//! - bilinear objective terms over binaries become product variables
//!   `w <= a`, `w <= b`, `w >= a + b - 1`;
//! - solution pools are collected by re-solving with no-good cuts.
//!
//! It reports no reduced costs.

use super::{
    ConstrSense, ModelDescriptor, ModelSense, PoolSolution, SolveOutcome, SolveParams, SolverOracle, Status, VarId,
    VarKind,
};
use crate::error::{QapError, Result};
use microlp::{ComparisonOp, OptimizationDirection, Problem, Variable};
use std::collections::BTreeMap;
use std::time::Instant;

const FEAS_TOL: f64 = 1e-9;

/// Default LP/MILP backend
#[derive(Debug, Clone, Default)]
pub struct MicrolpOracle;

impl MicrolpOracle {
    pub fn new() -> Self {
        MicrolpOracle
    }
}

/// A descriptor translated into a `microlp` problem
struct Lowered {
    problem: Problem,
    columns: Vec<Option<Variable>>,
    binaries: Vec<(VarId, Variable)>,
    constant: f64,
}

impl Lowered {
    fn values(&self, solution: &microlp::Solution) -> Vec<f64> {
        self.columns
            .iter()
            .map(|col| col.map(|c| solution[c]).unwrap_or(0.0))
            .collect()
    }
}

fn direction(sense: ModelSense) -> OptimizationDirection {
    match sense {
        ModelSense::Minimize => OptimizationDirection::Minimize,
        ModelSense::Maximize => OptimizationDirection::Maximize,
    }
}

fn comparison(sense: ConstrSense) -> ComparisonOp {
    match sense {
        ConstrSense::Le => ComparisonOp::Le,
        ConstrSense::Eq => ComparisonOp::Eq,
        ConstrSense::Ge => ComparisonOp::Ge,
    }
}

/// Linear objective coefficient of every variable slot, with binary squares
/// folded in.
fn linear_objective(model: &ModelDescriptor) -> Vec<f64> {
    let mut obj = vec![0.0; model.var_capacity()];
    for (v, c) in model.objective().linear.merged() {
        obj[v.index()] += c;
    }
    obj
}

/// Translate the descriptor. `None` means the model is trivially infeasible
/// (empty bound interval or a violated constant row).
fn lower(model: &ModelDescriptor) -> Result<Option<Lowered>> {
    let objective = model.objective();
    let mut obj = linear_objective(model);

    let mut products: BTreeMap<(VarId, VarId), f64> = BTreeMap::new();
    for &(a, b, c) in &objective.quad {
        for v in [a, b] {
            match model.var(v) {
                Some(spec) if spec.kind == VarKind::Binary => {}
                Some(spec) => {
                    return Err(QapError::Solver(format!(
                        "microlp cannot handle the quadratic term over continuous variable `{}`",
                        spec.name
                    )))
                }
                None => return Err(QapError::Solver("quadratic term over a removed variable".to_string())),
            }
        }
        if a == b {
            // x * x == x for binaries
            obj[a.index()] += c;
        } else {
            let key = if a < b { (a, b) } else { (b, a) };
            *products.entry(key).or_insert(0.0) += c;
        }
    }

    let mut problem = Problem::new(direction(model.sense()));
    let mut columns = vec![None; model.var_capacity()];
    let mut binaries = Vec::new();

    for (id, spec) in model.vars() {
        let coeff = obj[id.index()];
        let column = match spec.kind {
            VarKind::Binary => {
                let lo = (spec.lb.max(0.0) - 1e-6).ceil();
                let hi = (spec.ub.min(1.0) + 1e-6).floor();
                if lo > hi {
                    return Ok(None);
                }
                let var = if lo == hi {
                    problem.add_var(coeff, (lo, hi))
                } else {
                    problem.add_binary_var(coeff)
                };
                binaries.push((id, var));
                var
            }
            VarKind::Continuous => {
                if spec.lb > spec.ub + FEAS_TOL {
                    return Ok(None);
                }
                problem.add_var(coeff, (spec.lb, spec.ub.max(spec.lb)))
            }
        };
        columns[id.index()] = Some(column);
    }

    for ((a, b), c) in products {
        if c == 0.0 {
            continue;
        }
        if let (Some(xa), Some(xb)) = (columns[a.index()], columns[b.index()]) {
            let w = problem.add_var(c, (0.0, 1.0));
            problem.add_constraint([(w, 1.0), (xa, -1.0)], ComparisonOp::Le, 0.0);
            problem.add_constraint([(w, 1.0), (xb, -1.0)], ComparisonOp::Le, 0.0);
            problem.add_constraint([(w, 1.0), (xa, -1.0), (xb, -1.0)], ComparisonOp::Ge, -1.0);
        }
    }

    for constr in model.constraints() {
        let terms: Vec<(Variable, f64)> = constr
            .expr
            .merged()
            .into_iter()
            .filter_map(|(v, c)| columns[v.index()].map(|col| (col, c)))
            .collect();
        let rhs = constr.rhs - constr.expr.constant;
        if terms.is_empty() {
            let holds = match constr.sense {
                ConstrSense::Le => 0.0 <= rhs + FEAS_TOL,
                ConstrSense::Ge => 0.0 >= rhs - FEAS_TOL,
                ConstrSense::Eq => rhs.abs() <= FEAS_TOL,
            };
            if !holds {
                log::debug!("constraint `{}` of `{}` is constant and violated", constr.name, model.name());
                return Ok(None);
            }
            continue;
        }
        problem.add_constraint(terms, comparison(constr.sense), rhs);
    }

    Ok(Some(Lowered {
        problem,
        columns,
        binaries,
        constant: objective.linear.constant,
    }))
}

/// Collect further solutions by cutting off every binary pattern found so far.
fn collect_pool(lowered: &mut Lowered, first: &[f64], size: usize, pool: &mut Vec<PoolSolution>) -> Result<()> {
    if lowered.binaries.is_empty() {
        return Ok(());
    }
    let mut last = first.to_vec();
    while pool.len() < size {
        let mut ones = 0.0;
        let cut: Vec<(Variable, f64)> = lowered
            .binaries
            .iter()
            .map(|&(id, col)| {
                if last[id.index()] > 0.5 {
                    ones += 1.0;
                    (col, -1.0)
                } else {
                    (col, 1.0)
                }
            })
            .collect();
        lowered.problem.add_constraint(cut, ComparisonOp::Ge, 1.0 - ones);

        match lowered.problem.solve() {
            Ok(solution) => {
                let values = lowered.values(&solution);
                pool.push(PoolSolution {
                    objective: solution.objective() + lowered.constant,
                    values: values.clone(),
                });
                last = values;
            }
            Err(microlp::Error::Infeasible) => break,
            Err(e) => return Err(QapError::Solver(e.to_string())),
        }
    }
    Ok(())
}

impl SolverOracle for MicrolpOracle {
    fn name(&self) -> &str {
        "microlp"
    }

    fn solve(&self, model: &ModelDescriptor, params: &SolveParams) -> Result<SolveOutcome> {
        let start = Instant::now();
        if let Some(limit) = params.time_limit {
            log::warn!("microlp has no time limit, ignoring {:.1}s for `{}`", limit, model.name());
        }
        if let Some(threads) = params.threads {
            log::debug!("microlp is single-threaded, ignoring threads={}", threads);
        }
        if model.vars().any(|(_, v)| v.priority != 0) {
            log::debug!("microlp ignores branching priorities of `{}`", model.name());
        }

        let Some(mut lowered) = lower(model)? else {
            return Ok(SolveOutcome::without_solution(Status::Infeasible, start.elapsed()));
        };

        let solution = match lowered.problem.solve() {
            Ok(solution) => solution,
            Err(microlp::Error::Infeasible) => {
                return Ok(SolveOutcome::without_solution(Status::Infeasible, start.elapsed()))
            }
            Err(microlp::Error::Unbounded) => {
                return Ok(SolveOutcome::without_solution(Status::Unbounded, start.elapsed()))
            }
            Err(e) => return Err(QapError::Solver(format!("`{}`: {}", model.name(), e))),
        };

        let values = lowered.values(&solution);
        let objective = solution.objective() + lowered.constant;
        if params.verbose {
            log::info!(
                "microlp solved `{}` ({} vars, {} constrs): obj={:.6}",
                model.name(),
                model.num_vars(),
                model.num_constrs(),
                objective
            );
        }

        if params.reduced_costs {
            log::debug!("microlp exposes no duals, `{}` solved without reduced costs", model.name());
        }

        let mut pool = vec![PoolSolution {
            objective,
            values: values.clone(),
        }];
        if params.pool_size > 1 {
            collect_pool(&mut lowered, &values, params.pool_size, &mut pool)?;
        }

        Ok(SolveOutcome {
            status: Status::Optimal,
            objective: Some(objective),
            values,
            reduced_costs: None,
            pool,
            runtime: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{LinExpr, QuadExpr};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_lp() {
        let mut model = ModelDescriptor::new("lp");
        let x = model.add_continuous("x", 0.0, f64::INFINITY);
        let y = model.add_continuous("y", 0.0, 3.0);
        model.add_constr("a", LinExpr::from_iter([(x, 1.0), (y, 1.0)]), ConstrSense::Le, 4.0);
        model.add_constr("b", LinExpr::from_iter([(x, 2.0), (y, 1.0)]), ConstrSense::Ge, 2.0);
        model.set_objective(LinExpr::from_iter([(x, 1.0), (y, 2.0)]), ModelSense::Maximize);

        let out = MicrolpOracle.solve(&model, &SolveParams::default()).unwrap();
        assert!(out.is_optimal());
        assert!(approx(out.objective.unwrap(), 7.0));
        assert!(approx(out.value(x), 1.0));
        assert!(approx(out.value(y), 3.0));
    }

    #[test]
    fn test_binary_knapsack() {
        let mut model = ModelDescriptor::new("knapsack");
        let a = model.add_binary("a");
        let b = model.add_binary("b");
        let c = model.add_binary("c");
        model.add_constr("w", LinExpr::from_iter([(a, 2.0), (b, 3.0), (c, 1.0)]), ConstrSense::Le, 5.0);
        model.set_objective(LinExpr::from_iter([(a, 5.0), (b, 4.0), (c, 3.0)]), ModelSense::Maximize);

        let out = MicrolpOracle.solve(&model, &SolveParams::default()).unwrap();
        assert!(approx(out.objective.unwrap(), 9.0));
        assert!(out.value(a) > 0.5 && out.value(b) > 0.5 && out.value(c) < 0.5);
    }

    fn quadratic_model() -> (ModelDescriptor, VarId, VarId) {
        let mut model = ModelDescriptor::new("quad");
        let a = model.add_binary("a");
        let b = model.add_binary("b");
        model.add_constr("cover", LinExpr::from_iter([(a, 1.0), (b, 1.0)]), ConstrSense::Ge, 1.0);
        let mut obj = QuadExpr::new();
        obj.add_qterm(a, b, 3.0);
        obj.linear.add_term(a, 1.0).add_term(b, 2.0);
        model.set_objective(obj, ModelSense::Minimize);
        (model, a, b)
    }

    #[test]
    fn test_quadratic_lowering() {
        let (model, a, b) = quadratic_model();
        let out = MicrolpOracle.solve(&model, &SolveParams::default()).unwrap();
        assert!(approx(out.objective.unwrap(), 1.0));
        assert!(out.value(a) > 0.5 && out.value(b) < 0.5);

        let mut max_model = model.clone();
        max_model.set_sense(ModelSense::Maximize);
        let out = MicrolpOracle.solve(&max_model, &SolveParams::default()).unwrap();
        assert!(approx(out.objective.unwrap(), 6.0));
    }

    #[test]
    fn test_pool_is_ordered() {
        let (model, _, _) = quadratic_model();
        let params = SolveParams {
            pool_size: 5,
            ..Default::default()
        };
        let out = MicrolpOracle.solve(&model, &params).unwrap();
        let objectives: Vec<f64> = out.pool.iter().map(|s| s.objective).collect();
        assert_eq!(objectives.len(), 3);
        assert!(approx(objectives[0], 1.0));
        assert!(approx(objectives[1], 2.0));
        assert!(approx(objectives[2], 6.0));
    }

    #[test]
    fn test_no_reduced_costs() {
        let mut model = ModelDescriptor::new("rc");
        let x = model.add_continuous("x", 0.0, f64::INFINITY);
        let y = model.add_continuous("y", 0.0, f64::INFINITY);
        model.add_constr("one", LinExpr::from_iter([(x, 1.0), (y, 1.0)]), ConstrSense::Eq, 1.0);
        model.set_objective(LinExpr::from_iter([(x, 2.0), (y, 3.0)]), ModelSense::Maximize);

        let out = MicrolpOracle.solve(&model, &SolveParams::with_reduced_costs()).unwrap();
        assert!(approx(out.objective.unwrap(), 3.0));
        assert!(out.reduced_costs.is_none());
        assert_eq!(out.reduced_cost(x), None);
    }

    #[test]
    fn test_infeasible_status() {
        let mut model = ModelDescriptor::new("infeasible");
        let x = model.add_binary("x");
        model.add_constr("too-much", LinExpr::from_iter([(x, 1.0)]), ConstrSense::Ge, 2.0);
        let out = MicrolpOracle.solve(&model, &SolveParams::default()).unwrap();
        assert_eq!(out.status, Status::Infeasible);
        assert!(out.optimal_objective("infeasible").is_err());

        let mut fixed = ModelDescriptor::new("empty-bounds");
        let y = fixed.add_binary("y");
        fixed.set_bounds(y, 1.0, 0.0);
        let out = MicrolpOracle.solve(&fixed, &SolveParams::default()).unwrap();
        assert_eq!(out.status, Status::Infeasible);
    }
}
