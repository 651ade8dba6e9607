//! Fischetti-Monaci-Salvagnin reformulation.
//!
//! Per pair, `sigma[l][f] >= (max - min) * x[l][f] + sum rc[l][f][j] * x[j]`
//! with the lifted reduced costs of the maximizing LAP. The objective is
//! `sum sigma + min * x`. When some locations stay empty the master carries
//! the same zero-flow slack facility as the bound LAPs, so the cuts see the
//! exact columns their reduced costs were computed on.

use super::{
    add_assignment_constraints, binary_grid, branch_priorities, require_bounds, BuiltModel, Formulation, Variant,
};
use crate::bounds::{BoundRecord, BoundStrategy};
use crate::error::{QapError, Result};
use crate::grid::PairGrid;
use crate::instance::QapInstance;
use crate::oracle::{ConstrSense, LinExpr, ModelDescriptor, ModelSense};

pub struct Fischetti;

impl Formulation for Fischetti {
    fn variant(&self) -> Variant {
        Variant::Fischetti
    }

    fn bound_strategy(&self) -> Option<BoundStrategy> {
        Some(BoundStrategy::Fischetti)
    }

    fn build(&self, instance: &QapInstance, bounds: Option<&BoundRecord>) -> Result<BuiltModel> {
        let bounds = require_bounds(self.variant(), bounds)?;
        let reduced_costs = bounds
            .reduced_costs
            .as_ref()
            .ok_or_else(|| QapError::Solver("fischetti bounds carry no reduced costs".to_string()))?;

        let padded = instance.with_slack_facility();
        let columns = padded.as_ref().unwrap_or(instance);
        let m = instance.num_locations();
        let n = instance.num_facilities();
        if bounds.min.facilities() != n || reduced_costs.facilities() != n {
            return Err(QapError::MalformedInstance(format!(
                "bounds cover {} facilities, instance has {}",
                bounds.min.facilities(),
                n
            )));
        }

        let mut model = ModelDescriptor::new("qap-fischetti");
        let all_x = binary_grid(&mut model, columns);
        add_assignment_constraints(&mut model, columns, &all_x);
        let x = PairGrid::from_fn(m, n, |l, f| all_x[(l, f)]);

        let mut objective = LinExpr::new();
        for ((l, f), &var) in x.iter() {
            let sigma = model.add_continuous(format!("sigma_{}_{}", l, f), 0.0, f64::INFINITY);
            let rc = &reduced_costs[(l, f)];
            if rc.facilities() != columns.num_facilities() {
                return Err(QapError::MalformedInstance(
                    "reduced costs computed on a different facility set".to_string(),
                ));
            }

            let mut cut = LinExpr::new();
            cut.add_term(sigma, 1.0).add_term(var, -bounds.spread(l, f));
            for (pair, &c) in rc.iter() {
                cut.add_term(all_x[pair], -c);
            }
            model.add_constr(format!("cut_{}_{}", l, f), cut, ConstrSense::Ge, 0.0);

            objective.add_term(sigma, 1.0).add_term(var, bounds.min[(l, f)]);
        }
        model.set_objective(objective, ModelSense::Minimize);

        for ((l, f), &priority) in branch_priorities(bounds).iter() {
            model.set_branch_priority(x[(l, f)], priority);
        }

        Ok(BuiltModel { descriptor: model, x })
    }
}
