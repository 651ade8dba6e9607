//! Xia-Yuan reformulation: `sigma[l][f]` bounded below by the pair's
//! conflict-free cost minus a max-bound penalty, and by its min bound.

use super::{add_assignment_constraints, binary_grid, require_bounds, BuiltModel, Formulation, Variant};
use crate::bounds::{is_conflict, BoundRecord, BoundStrategy};
use crate::error::Result;
use crate::instance::QapInstance;
use crate::oracle::{ConstrSense, LinExpr, ModelDescriptor, ModelSense};

pub struct XiaYuan;

impl Formulation for XiaYuan {
    fn variant(&self) -> Variant {
        Variant::XiaYuan
    }

    fn bound_strategy(&self) -> Option<BoundStrategy> {
        Some(BoundStrategy::XiaYuan)
    }

    fn build(&self, instance: &QapInstance, bounds: Option<&BoundRecord>) -> Result<BuiltModel> {
        let bounds = require_bounds(self.variant(), bounds)?;
        let mut model = ModelDescriptor::new("qap-xiayuan");
        let x = binary_grid(&mut model, instance);
        add_assignment_constraints(&mut model, instance, &x);

        let mut objective = LinExpr::new();
        for ((l, f), &var) in x.iter() {
            let sigma = model.add_continuous(format!("sigma_{}_{}", l, f), 0.0, f64::INFINITY);
            let max = bounds.max[(l, f)];

            // sigma - sum beta * x - max * x[l][f] >= -max
            let mut cost = LinExpr::new();
            cost.add_term(sigma, 1.0).add_term(var, -max);
            for ((l2, f2), &other) in x.iter() {
                if !is_conflict(instance, (l, f), (l2, f2)) {
                    cost.add_term(other, -instance.pair_weight(f, l, f2, l2));
                }
            }
            model.add_constr(format!("cost_{}_{}", l, f), cost, ConstrSense::Ge, -max);

            let floor = LinExpr::from_iter([(sigma, 1.0), (var, -bounds.min[(l, f)])]);
            model.add_constr(format!("floor_{}_{}", l, f), floor, ConstrSense::Ge, 0.0);

            objective.add_term(sigma, 1.0);
        }
        model.set_objective(objective, ModelSense::Minimize);

        Ok(BuiltModel { descriptor: model, x })
    }
}
