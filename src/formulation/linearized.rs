//! Linearization with one continuous product column per pair of pairs.
//!
//! `y[l1][l2][f1][f2]` stands for `x[l1][f1] * x[l2][f2]`. For a fixed
//! `(l2, f2)` the `y` columns form a copy of the assignment polytope scaled
//! by `x[l2][f2]`, and `y` is symmetric in its two pairs.

use super::{add_assignment_constraints, binary_grid, BuiltModel, Formulation, Variant};
use crate::bounds::BoundRecord;
use crate::error::Result;
use crate::instance::QapInstance;
use crate::oracle::{ConstrSense, LinExpr, ModelDescriptor, ModelSense, VarId};

pub struct Linearized;

impl Formulation for Linearized {
    fn variant(&self) -> Variant {
        Variant::Linearized
    }

    fn build(&self, instance: &QapInstance, _bounds: Option<&BoundRecord>) -> Result<BuiltModel> {
        let m = instance.num_locations();
        let n = instance.num_facilities();
        let mut model = ModelDescriptor::new("qap-linearized");
        let x = binary_grid(&mut model, instance);
        add_assignment_constraints(&mut model, instance, &x);

        let index = |l1: usize, l2: usize, f1: usize, f2: usize| ((l1 * m + l2) * n + f1) * n + f2;
        let mut y: Vec<VarId> = Vec::with_capacity(m * m * n * n);
        for l1 in 0..m {
            for l2 in 0..m {
                for f1 in 0..n {
                    for f2 in 0..n {
                        y.push(model.add_continuous(
                            format!("y_{}_{}_{}_{}", l1, l2, f1, f2),
                            0.0,
                            f64::INFINITY,
                        ));
                    }
                }
            }
        }

        let objective: LinExpr = (0..m)
            .flat_map(|l1| (0..m).flat_map(move |l2| (0..n).flat_map(move |f1| (0..n).map(move |f2| (l1, l2, f1, f2)))))
            .map(|(l1, l2, f1, f2)| (y[index(l1, l2, f1, f2)], instance.pair_weight(f1, l1, f2, l2)))
            .collect();
        model.set_objective(objective, ModelSense::Minimize);

        let location_sense = if instance.is_full() {
            ConstrSense::Eq
        } else {
            ConstrSense::Le
        };
        for ((l2, f2), &anchor) in x.iter() {
            for f1 in 0..n {
                let mut expr: LinExpr = (0..m).map(|l1| (y[index(l1, l2, f1, f2)], 1.0)).collect();
                expr.add_term(anchor, -(instance.multiplicity[f1] as f64));
                model.add_constr(format!("y_fac_{}_{}_{}", l2, f2, f1), expr, ConstrSense::Eq, 0.0);
            }
            for l1 in 0..m {
                let mut expr: LinExpr = (0..n).map(|f1| (y[index(l1, l2, f1, f2)], 1.0)).collect();
                expr.add_term(anchor, -1.0);
                model.add_constr(format!("y_loc_{}_{}_{}", l2, f2, l1), expr, location_sense, 0.0);
            }
            for l1 in 0..m {
                for f1 in 0..n {
                    // each unordered pair once
                    if (l1, f1) >= (l2, f2) {
                        continue;
                    }
                    let expr = LinExpr::from_iter([(y[index(l1, l2, f1, f2)], 1.0), (y[index(l2, l1, f2, f1)], -1.0)]);
                    model.add_constr(format!("y_sym_{}_{}_{}_{}", l1, l2, f1, f2), expr, ConstrSense::Eq, 0.0);
                }
            }
        }

        Ok(BuiltModel { descriptor: model, x })
    }
}
