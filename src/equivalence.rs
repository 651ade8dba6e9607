//! Clone-facility reduction.
//!
//! Two facilities are interchangeable when their flows to and from every
//! third facility agree and the flow between them is symmetric. Such a class
//! collapses into its first member, which then occupies as many locations as
//! the class has members; the flow between two members becomes the
//! representative's self-flow. A solution of the reduced instance is expanded
//! back by handing the class's locations out to its members.

use crate::error::{QapError, Result};
use crate::instance::{Assignment, Placement, QapInstance};

/// Partition of an instance's facilities into interchangeable classes
#[derive(Debug, Clone)]
pub struct Reduction {
    /// Instance the reduction was computed on
    pub original: QapInstance,
    /// Classes in scan order; the first member is the representative
    pub classes: Vec<Vec<usize>>,
    pub representatives: Vec<usize>,
    /// Number of members per class
    pub sizes: Vec<usize>,
    /// Class index of every original facility
    pub class_of: Vec<usize>,
    /// The collapsed instance, one facility per class
    pub instance: QapInstance,
}

/// Whether `f` and `g` may share a class.
///
/// A facility already spread over several locations carries the flow between
/// its own members on the diagonal, which must then match `flow[f][g]`.
pub fn equivalent(instance: &QapInstance, f: usize, g: usize) -> bool {
    let flow = &instance.flow;
    if flow[f][g] != flow[g][f] {
        return false;
    }
    let others_agree = (0..instance.num_facilities())
        .filter(|&h| h != f && h != g)
        .all(|h| flow[f][h] == flow[g][h] && flow[h][f] == flow[h][g]);
    if !others_agree {
        return false;
    }
    [f, g]
        .iter()
        .all(|&k| instance.multiplicity[k] == 1 || flow[k][k] == flow[f][g])
}

/// Partition the facilities of `instance` and build the reduced instance.
pub fn reduce(instance: &QapInstance) -> Result<Reduction> {
    let n = instance.num_facilities();
    let mut classified = vec![false; n];
    let mut classes: Vec<Vec<usize>> = Vec::new();

    for seed in 0..n {
        if classified[seed] {
            continue;
        }
        let mut class = vec![seed];
        for g in seed + 1..n {
            if !classified[g] && equivalent(instance, seed, g) {
                classified[g] = true;
                class.push(g);
            }
        }
        classified[seed] = true;
        classes.push(class);
    }

    let mut class_of = vec![0; n];
    for (k, class) in classes.iter().enumerate() {
        for &f in class {
            class_of[f] = k;
        }
    }
    let representatives: Vec<usize> = classes.iter().map(|c| c[0]).collect();
    let sizes: Vec<usize> = classes.iter().map(Vec::len).collect();

    let reduced_flow: Vec<Vec<i64>> = classes
        .iter()
        .enumerate()
        .map(|(k1, c1)| {
            classes
                .iter()
                .enumerate()
                .map(|(k2, c2)| {
                    if k1 != k2 {
                        instance.flow(c1[0], c2[0])
                    } else if c1.len() > 1 {
                        instance.flow(c1[0], c1[1])
                    } else if instance.multiplicity[c1[0]] > 1 {
                        instance.flow(c1[0], c1[0])
                    } else {
                        0
                    }
                })
                .collect()
        })
        .collect();

    let multiplicity: Vec<usize> = classes
        .iter()
        .map(|c| c.iter().map(|&f| instance.multiplicity[f]).sum())
        .collect();

    let reduced = QapInstance::new(
        format!("{}-reduced", instance.name),
        representatives.iter().map(|&r| instance.facilities[r].clone()).collect(),
        instance.locations.clone(),
        reduced_flow,
        instance.distance.clone(),
    )?
    .with_multiplicity(multiplicity)?;

    log::info!(
        "Equivalence reduction of {}: {} facilities -> {} classes",
        instance.name,
        n,
        classes.len()
    );

    Ok(Reduction {
        original: instance.clone(),
        classes,
        representatives,
        sizes,
        class_of,
        instance: reduced,
    })
}

/// Reduce an instance after overriding its multiplicities.
pub fn reduce_weighted(instance: &QapInstance, multiplicity: Vec<usize>) -> Result<Reduction> {
    reduce(&instance.clone().with_multiplicity(multiplicity)?)
}

impl Reduction {
    /// No class has more than one member.
    pub fn is_trivial(&self) -> bool {
        self.classes.iter().all(|c| c.len() == 1)
    }

    /// Map a placement of the reduced instance onto the original facilities.
    ///
    /// Each class's locations are taken in ascending order: the
    /// representative receives the first (its anchor), the other members
    /// the following ones in class order.
    pub fn expand_placement(&self, reduced: &Placement) -> Result<Placement> {
        if reduced.len() != self.classes.len() {
            return Err(QapError::MalformedInstance(format!(
                "reduced placement covers {} classes, expected {}",
                reduced.len(),
                self.classes.len()
            )));
        }

        let mut expanded: Placement = vec![Vec::new(); self.original.num_facilities()];
        for (k, class) in self.classes.iter().enumerate() {
            let mut locations = reduced[k].clone();
            locations.sort_unstable();
            let expected = self.instance.multiplicity[k];
            if locations.len() != expected {
                return Err(QapError::MalformedInstance(format!(
                    "class of `{}` received {} locations, expected {}",
                    self.instance.facilities[k],
                    locations.len(),
                    expected
                )));
            }
            let mut remaining = locations.into_iter();
            for &member in class {
                expanded[member] = remaining.by_ref().take(self.original.multiplicity[member]).collect();
            }
        }
        Ok(expanded)
    }

    /// Expand to an assignment of the original facilities.
    pub fn expand(&self, reduced: &Placement) -> Result<Assignment> {
        if self.original.multiplicity.iter().any(|&k| k != 1) {
            return Err(QapError::MalformedInstance(
                "original instance is itself reduced, expand to a placement instead".to_string(),
            ));
        }
        let placement = self.expand_placement(reduced)?;
        Ok(Assignment::new(placement.iter().map(|locs| locs[0]).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::{ids, scenario_b};

    fn scenario_a() -> QapInstance {
        QapInstance::new(
            "scenario-a",
            ids("f", 3),
            ids("", 3),
            vec![vec![0, 4, 4], vec![4, 0, 7], vec![4, 7, 0]],
            vec![vec![0.0, 2.0, 5.0], vec![2.0, 0.0, 3.0], vec![5.0, 3.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_a() {
        let reduction = reduce(&scenario_a()).unwrap();
        assert_eq!(reduction.classes, vec![vec![0], vec![1, 2]]);
        assert_eq!(reduction.representatives, vec![0, 1]);
        assert_eq!(reduction.sizes, vec![1, 2]);
        assert_eq!(reduction.instance.multiplicity, vec![1, 2]);
        assert_eq!(reduction.instance.flow, vec![vec![0, 4], vec![4, 7]]);
        assert_eq!(reduction.instance.facilities, vec!["f1".to_string(), "f2".to_string()]);
        assert!(!reduction.is_trivial());
    }

    #[test]
    fn test_reduction_is_idempotent() {
        let first = reduce(&scenario_a()).unwrap();
        let second = reduce(&first.instance).unwrap();
        assert!(second.is_trivial());
        assert_eq!(second.instance.flow, first.instance.flow);
        assert_eq!(second.instance.multiplicity, vec![1, 2]);

        // every facility interchangeable: one class, then nothing left to merge
        let uniform = QapInstance::new(
            "uniform",
            ids("f", 3),
            ids("", 3),
            vec![vec![0, 4, 4], vec![4, 0, 4], vec![4, 4, 0]],
            vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 1.0], vec![2.0, 1.0, 0.0]],
        )
        .unwrap();
        let first = reduce(&uniform).unwrap();
        assert_eq!(first.classes, vec![vec![0, 1, 2]]);
        assert!(reduce(&first.instance).unwrap().is_trivial());
    }

    #[test]
    fn test_asymmetric_flow_stays_apart() {
        assert!(reduce(&scenario_b()).unwrap().is_trivial());
    }

    #[test]
    fn test_expansion_preserves_objective() {
        let original = scenario_a();
        let reduction = reduce(&original).unwrap();
        let reduced_placement: Placement = vec![vec![2], vec![0, 1]];
        let assignment = reduction.expand(&reduced_placement).unwrap();
        assert_eq!(assignment.as_slice(), &[2, 0, 1]);
        assert!(assignment.is_injective(3));
        assert_eq!(
            original.objective(&assignment),
            reduction.instance.placement_objective(&reduced_placement)
        );
    }

    #[test]
    fn test_expansion_rejects_wrong_slot_count() {
        let reduction = reduce(&scenario_a()).unwrap();
        let err = reduction.expand(&vec![vec![2], vec![0]]).unwrap_err();
        assert!(matches!(err, QapError::MalformedInstance(_)));
    }
}
