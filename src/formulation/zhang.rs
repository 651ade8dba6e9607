//! Zhang reformulation: `sigma[l][f]` absorbs the part of the pair's cost
//! above its min bound, relaxed by the max bound when `x[l][f] = 0`.

use super::{add_assignment_constraints, binary_grid, require_bounds, BuiltModel, Formulation, Variant};
use crate::bounds::{BoundRecord, BoundStrategy};
use crate::error::Result;
use crate::instance::QapInstance;
use crate::oracle::{ConstrSense, LinExpr, ModelDescriptor, ModelSense};

pub struct Zhang;

impl Formulation for Zhang {
    fn variant(&self) -> Variant {
        Variant::Zhang
    }

    fn bound_strategy(&self) -> Option<BoundStrategy> {
        Some(BoundStrategy::Zhang)
    }

    fn build(&self, instance: &QapInstance, bounds: Option<&BoundRecord>) -> Result<BuiltModel> {
        let bounds = require_bounds(self.variant(), bounds)?;
        let mut model = ModelDescriptor::new("qap-zhang");
        let x = binary_grid(&mut model, instance);
        add_assignment_constraints(&mut model, instance, &x);

        let mut objective = LinExpr::new();
        for ((l, f), &var) in x.iter() {
            let sigma = model.add_continuous(format!("sigma_{}_{}", l, f), 0.0, f64::INFINITY);
            let min = bounds.min[(l, f)];
            let max = bounds.max[(l, f)];

            // sigma >= sum beta * x - max * (1 - x[l][f]) - min * x[l][f]
            let mut cost = LinExpr::new();
            cost.add_term(sigma, 1.0).add_term(var, -(max - min));
            for ((l2, f2), &other) in x.iter() {
                cost.add_term(other, -instance.pair_weight(f, l, f2, l2));
            }
            model.add_constr(format!("cost_{}_{}", l, f), cost, ConstrSense::Ge, -max);

            objective.add_term(sigma, 1.0).add_term(var, min);
        }
        model.set_objective(objective, ModelSense::Minimize);

        Ok(BuiltModel { descriptor: model, x })
    }
}
