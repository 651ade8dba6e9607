//! Direct bilinear objective over the assignment columns.

use super::{add_assignment_constraints, binary_grid, BuiltModel, Formulation, Variant};
use crate::bounds::BoundRecord;
use crate::error::Result;
use crate::instance::QapInstance;
use crate::oracle::{ModelDescriptor, ModelSense, QuadExpr};

pub struct Quadratic;

impl Formulation for Quadratic {
    fn variant(&self) -> Variant {
        Variant::Quadratic
    }

    fn build(&self, instance: &QapInstance, _bounds: Option<&BoundRecord>) -> Result<BuiltModel> {
        let mut model = ModelDescriptor::new("qap-quadratic");
        let x = binary_grid(&mut model, instance);
        add_assignment_constraints(&mut model, instance, &x);

        let mut objective = QuadExpr::new();
        for ((l1, f1), &a) in x.iter() {
            for ((l2, f2), &b) in x.iter() {
                objective.add_qterm(a, b, instance.pair_weight(f1, l1, f2, l2));
            }
        }
        model.set_objective(objective, ModelSense::Minimize);

        Ok(BuiltModel { descriptor: model, x })
    }
}
