//! Oracle backed by the Gurobi optimizer.
//!
//! The descriptor is mapped one to one onto a Gurobi model: binaries and
//! continuous columns, linear rows, a linear or quadratic objective and
//! branching priorities. Pools use `PoolSearchMode = 2`.

use super::{
    ConstrSense, ModelDescriptor, ModelSense, PoolSolution, SolveOutcome, SolveParams, SolverOracle, Status, VarKind,
};
use crate::error::{QapError, Result};
use grb::expr::{LinExpr as GrbLinExpr, QuadExpr as GrbQuadExpr};
use grb::prelude::*;
use std::time::Instant;

/// Gurobi solver configuration
#[derive(Debug, Clone)]
pub struct GurobiConfig {
    /// MIP gap tolerance
    pub mip_gap: f64,
    /// Enable verbose output
    pub verbose: bool,
}

impl Default for GurobiConfig {
    fn default() -> Self {
        GurobiConfig {
            mip_gap: 0.0,
            verbose: false,
        }
    }
}

pub struct GurobiOracle {
    pub config: GurobiConfig,
}

impl GurobiOracle {
    pub fn new(config: GurobiConfig) -> Self {
        GurobiOracle { config }
    }
}

fn failed(what: &'static str) -> impl Fn(grb::Error) -> QapError {
    move |e| QapError::Solver(format!("Failed to {}: {}", what, e))
}

fn map_status(status: grb::Status) -> Status {
    match status {
        grb::Status::Optimal => Status::Optimal,
        grb::Status::Infeasible => Status::Infeasible,
        grb::Status::Unbounded => Status::Unbounded,
        grb::Status::InfOrUnbd => Status::InfeasibleOrUnbounded,
        grb::Status::SubOptimal => Status::Suboptimal,
        grb::Status::TimeLimit => Status::TimeLimit,
        grb::Status::WorkLimit => Status::WorkLimit,
        grb::Status::IterationLimit => Status::IterationLimit,
        grb::Status::MemLimit => Status::MemoryLimit,
        grb::Status::CutOff => Status::Cutoff,
        grb::Status::NodeLimit => Status::NodeLimit,
        grb::Status::SolutionLimit => Status::SolutionLimit,
        grb::Status::UserObjLimit => Status::ObjectiveLimit,
        grb::Status::Numeric => Status::Numeric,
        grb::Status::Interrupted => Status::Interrupted,
        other => {
            log::warn!("Gurobi returned {:?} after optimize, reported as interrupted", other);
            Status::Interrupted
        }
    }
}

impl SolverOracle for GurobiOracle {
    fn name(&self) -> &str {
        "gurobi"
    }

    fn solve(&self, descriptor: &ModelDescriptor, params: &SolveParams) -> Result<SolveOutcome> {
        let start = Instant::now();

        let env = Env::new("").map_err(failed("create Gurobi environment"))?;
        let mut model = Model::with_env(descriptor.name(), env).map_err(failed("create model"))?;

        if !(params.verbose || self.config.verbose) {
            model.set_param(param::OutputFlag, 0).map_err(failed("set output flag"))?;
        }
        if let Some(limit) = params.time_limit {
            model.set_param(param::TimeLimit, limit).map_err(failed("set time limit"))?;
        }
        if let Some(threads) = params.threads {
            model.set_param(param::Threads, threads as i32).map_err(failed("set threads"))?;
        }
        model.set_param(param::MIPGap, self.config.mip_gap).map_err(failed("set MIP gap"))?;
        if params.pool_size > 1 {
            model.set_param(param::PoolSearchMode, 2).map_err(failed("set pool search mode"))?;
            model
                .set_param(param::PoolSolutions, params.pool_size as i32)
                .map_err(failed("set pool size"))?;
        }

        let mut columns: Vec<Option<Var>> = vec![None; descriptor.var_capacity()];
        for (id, spec) in descriptor.vars() {
            let vtype = match spec.kind {
                VarKind::Binary => VarType::Binary,
                VarKind::Continuous => VarType::Continuous,
            };
            let var = model
                .add_var(&spec.name, vtype, 0.0, spec.lb, spec.ub, std::iter::empty())
                .map_err(failed("add variable"))?;
            columns[id.index()] = Some(var);
        }
        model.update().map_err(failed("update model"))?;

        for (id, spec) in descriptor.vars() {
            if spec.priority != 0 {
                if let Some(var) = &columns[id.index()] {
                    model
                        .set_obj_attr(attr::BranchPriority, var, spec.priority)
                        .map_err(failed("set branch priority"))?;
                }
            }
        }

        for constr in descriptor.constraints() {
            let mut lhs = GrbLinExpr::new();
            for (v, c) in constr.expr.merged() {
                if let Some(var) = columns[v.index()] {
                    lhs.add_term(c, var);
                }
            }
            let rhs = constr.rhs - constr.expr.constant;
            let ineq = match constr.sense {
                ConstrSense::Le => c!(lhs <= rhs),
                ConstrSense::Eq => c!(lhs == rhs),
                ConstrSense::Ge => c!(lhs >= rhs),
            };
            model.add_constr(&constr.name, ineq).map_err(failed("add constraint"))?;
        }

        let objective = descriptor.objective();
        let mut obj = GrbQuadExpr::new();
        for (v, c) in objective.linear.merged() {
            if let Some(var) = columns[v.index()] {
                obj.add_term(c, var);
            }
        }
        for &(a, b, c) in &objective.quad {
            if let (Some(va), Some(vb)) = (columns[a.index()], columns[b.index()]) {
                obj.add_qterm(c, va, vb);
            }
        }
        obj.add_constant(objective.linear.constant);
        let sense = match descriptor.sense() {
            ModelSense::Minimize => grb::ModelSense::Minimize,
            ModelSense::Maximize => grb::ModelSense::Maximize,
        };
        model.set_objective(obj, sense).map_err(failed("set objective"))?;

        model.optimize().map_err(failed("optimize"))?;
        let status = map_status(model.status().map_err(failed("get status"))?);
        let sol_count: i32 = model.get_attr(attr::SolCount).map_err(failed("get solution count"))?;
        if sol_count == 0 {
            return Ok(SolveOutcome::without_solution(status, start.elapsed()));
        }

        let read = |model: &Model, attribute: grb::attribute::VarDoubleAttr| -> Result<Vec<f64>> {
            columns
                .iter()
                .map(|col| match col {
                    Some(var) => model.get_obj_attr(attribute, var).map_err(failed("read variable")),
                    None => Ok(0.0),
                })
                .collect()
        };

        let values = read(&model, attr::X)?;
        let obj_val = model.get_attr(attr::ObjVal).map_err(failed("get objective"))?;

        let reduced_costs = if params.reduced_costs {
            if !descriptor.has_integer_vars() {
                Some(read(&model, attr::RC)?)
            } else {
                log::warn!("reduced costs requested for non-LP model `{}`", descriptor.name());
                None
            }
        } else {
            None
        };

        let mut pool = Vec::with_capacity(sol_count as usize);
        for k in 0..sol_count.min(params.pool_size.max(1) as i32) {
            model.set_param(param::SolutionNumber, k).map_err(failed("select pool solution"))?;
            pool.push(PoolSolution {
                objective: model.get_attr(attr::PoolObjVal).map_err(failed("get pool objective"))?,
                values: read(&model, attr::Xn)?,
            });
        }

        Ok(SolveOutcome {
            status,
            objective: Some(obj_val),
            values,
            reduced_costs,
            pool,
            runtime: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_statuses_keep_their_cause() {
        assert_eq!(map_status(grb::Status::NodeLimit), Status::NodeLimit);
        assert_eq!(map_status(grb::Status::SolutionLimit), Status::SolutionLimit);
        assert_eq!(map_status(grb::Status::UserObjLimit), Status::ObjectiveLimit);
        assert_eq!(map_status(grb::Status::Numeric), Status::Numeric);
        assert_eq!(map_status(grb::Status::Interrupted), Status::Interrupted);
        assert_eq!(map_status(grb::Status::InProgress), Status::Interrupted);
    }
}
