//! Side-by-side comparison of formulations on one instance.
//!
//! Every requested variant is solved (directly or through the clone-facility
//! reduction), its assignment is re-evaluated against the instance's own
//! flow and distance data, and the variants are cross-checked against each
//! other. Failures of one variant are recorded in its row and never abort
//! the run.

use crate::bounds::BoundConfig;
use crate::equivalence::{reduce, Reduction};
use crate::error::{QapError, Result};
use crate::formulation::{objectives_agree, SolveLimits, Variant, VariantOutcome};
use crate::instance::{Placement, QapInstance};
use crate::oracle::{SolverOracle, Status};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Harness configuration
#[derive(Debug, Clone, Default)]
pub struct HarnessOptions {
    /// Collapse clone facilities before solving
    pub merge_equivalent: bool,
    pub limits: SolveLimits,
    pub bounds: BoundConfig,
}

/// Result of one variant on the instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRecord {
    pub variant: Variant,
    /// None when the variant failed before the master finished
    pub status: Option<Status>,
    /// Objective reported by the solver
    pub reported_objective: Option<f64>,
    /// Objective recomputed from flow, distance and the assignment
    pub recomputed_objective: Option<f64>,
    pub objective_mismatch: bool,
    /// Location index of every facility
    pub assignment: Option<Vec<usize>>,
    /// Sorted locations of every facility
    pub placement: Option<Placement>,
    /// Seconds spent in the master solve (and expansion check)
    pub solve_time: f64,
    /// Seconds spent computing bounds
    pub bound_time: f64,
    pub pool_size: usize,
    pub unique_optimum: bool,
    /// Facilities in the model that was actually solved
    pub solved_facilities: usize,
    pub error: Option<String>,
}

impl VariantRecord {
    fn failed(variant: Variant, error: &QapError) -> Self {
        VariantRecord {
            variant,
            status: None,
            reported_objective: None,
            recomputed_objective: None,
            objective_mismatch: false,
            assignment: None,
            placement: None,
            solve_time: 0.0,
            bound_time: 0.0,
            pool_size: 0,
            unique_optimum: false,
            solved_facilities: 0,
            error: Some(error.to_string()),
        }
    }

    fn is_optimal(&self) -> bool {
        self.status == Some(Status::Optimal)
    }
}

/// Flat row for CSV export
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    instance: &'a str,
    variant: Variant,
    status: String,
    reported_objective: Option<f64>,
    recomputed_objective: Option<f64>,
    objective_mismatch: bool,
    assignment: String,
    solve_time: f64,
    bound_time: f64,
    pool_size: usize,
    unique_optimum: bool,
    solved_facilities: usize,
    error: String,
}

/// Outcome of a comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub instance: String,
    pub facilities: usize,
    pub locations: usize,
    /// Number of classes when the run went through the reduction
    pub reduced_facilities: Option<usize>,
    /// RFC 3339 time the run started
    pub timestamp: String,
    pub facility_ids: Vec<String>,
    pub location_ids: Vec<String>,
    pub records: Vec<VariantRecord>,
    /// Every optimal variant reached the same objective
    pub agreement: bool,
    /// Per facility: every variant with a placement put it on the same locations
    pub facility_agreement: Vec<bool>,
    /// All of `facility_agreement`. Alternative optima may differ here
    /// without any variant being wrong.
    pub assignments_agree: bool,
}

impl ComparisonReport {
    /// Best objective among the optimal variants
    pub fn best_objective(&self) -> Option<f64> {
        self.records
            .iter()
            .filter(|r| r.is_optimal())
            .filter_map(|r| r.recomputed_objective)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// One CSV row per variant
    pub fn export_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(CsvRow {
                instance: &self.instance,
                variant: record.variant,
                status: record.status.map(|s| s.to_string()).unwrap_or_default(),
                reported_objective: record.reported_objective,
                recomputed_objective: record.recomputed_objective,
                objective_mismatch: record.objective_mismatch,
                assignment: record
                    .assignment
                    .as_ref()
                    .map(|a| a.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(" "))
                    .unwrap_or_default(),
                solve_time: record.solve_time,
                bound_time: record.bound_time,
                pool_size: record.pool_size,
                unique_optimum: record.unique_optimum,
                solved_facilities: record.solved_facilities,
                error: record.error.clone().unwrap_or_default(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Runs several formulations on one instance
pub struct ComparisonHarness<'a> {
    oracle: &'a dyn SolverOracle,
    options: HarnessOptions,
}

impl<'a> ComparisonHarness<'a> {
    pub fn new(oracle: &'a dyn SolverOracle, options: HarnessOptions) -> Self {
        ComparisonHarness { oracle, options }
    }

    pub fn run(&self, instance: &QapInstance, variants: &[Variant]) -> Result<ComparisonReport> {
        let timestamp = chrono::Local::now().to_rfc3339();
        let reduction = if self.options.merge_equivalent {
            let reduction = reduce(instance)?;
            if reduction.is_trivial() {
                return Err(QapError::TrivialReduction(instance.num_facilities()));
            }
            Some(reduction)
        } else {
            None
        };

        log::info!(
            "Comparing {} variant(s) on {} using {}",
            variants.len(),
            instance.name,
            self.oracle.name()
        );

        let records: Vec<VariantRecord> = variants
            .iter()
            .map(|&variant| match self.solve_variant(instance, reduction.as_ref(), variant) {
                Ok(outcome) => self.record(instance, outcome),
                Err(e) => {
                    log::error!("{} failed on {}: {}", variant, instance.name, e);
                    VariantRecord::failed(variant, &e)
                }
            })
            .collect();

        let agreement = cross_check(&records);
        if !agreement {
            log::error!("Variants disagree on the optimum of {}", instance.name);
        }
        let facility_agreement = placement_agreement(&records, instance.num_facilities());
        let assignments_agree = facility_agreement.iter().all(|&same| same);
        if !assignments_agree {
            log::info!("Variants placed some facilities of {} differently", instance.name);
        }

        Ok(ComparisonReport {
            instance: instance.name.clone(),
            facilities: instance.num_facilities(),
            locations: instance.num_locations(),
            reduced_facilities: reduction.as_ref().map(|r| r.classes.len()),
            timestamp,
            facility_ids: instance.facilities.clone(),
            location_ids: instance.locations.clone(),
            records,
            agreement,
            facility_agreement,
            assignments_agree,
        })
    }

    fn solve_variant(
        &self,
        instance: &QapInstance,
        reduction: Option<&Reduction>,
        variant: Variant,
    ) -> Result<VariantOutcome> {
        let formulation = variant.formulation();
        let HarnessOptions { limits, bounds, .. } = &self.options;
        match reduction {
            Some(reduction) => formulation.solve_with_equivalence(reduction, self.oracle, limits, bounds),
            None => formulation.solve(instance, self.oracle, limits, bounds),
        }
    }

    fn record(&self, instance: &QapInstance, outcome: VariantOutcome) -> VariantRecord {
        let recomputed = outcome.placement.as_ref().map(|p| instance.placement_objective(p));
        let mut error = None;
        if outcome.status != Status::Optimal {
            let non_optimal = QapError::SolverNonOptimal {
                model: outcome.variant.to_string(),
                status: outcome.status,
            };
            log::warn!("{}", non_optimal);
            error = Some(non_optimal.to_string());
        }
        let mut objective_mismatch = false;
        if let (Some(reported), Some(recomputed)) = (outcome.objective, recomputed) {
            if !objectives_agree(reported, recomputed) {
                let mismatch = QapError::ObjectiveMismatch {
                    variant: outcome.variant.to_string(),
                    reported,
                    recomputed,
                };
                log::error!("{}", mismatch);
                objective_mismatch = true;
                error = Some(mismatch.to_string());
            }
        }

        VariantRecord {
            variant: outcome.variant,
            status: Some(outcome.status),
            reported_objective: outcome.objective,
            recomputed_objective: recomputed,
            objective_mismatch,
            assignment: outcome.assignment.as_ref().map(|a| a.as_slice().to_vec()),
            placement: outcome.placement.as_ref().map(|placement| {
                let mut sorted = placement.clone();
                sorted.iter_mut().for_each(|locations| locations.sort_unstable());
                sorted
            }),
            solve_time: outcome.solve_time.as_secs_f64(),
            bound_time: outcome.bound_time.as_secs_f64(),
            pool_size: outcome.pool_objectives.len(),
            unique_optimum: outcome.unique_optimum(),
            solved_facilities: outcome.solved_facilities,
            error,
        }
    }
}

/// All optimal variants recompute to the same objective.
fn cross_check(records: &[VariantRecord]) -> bool {
    let mut objectives = records
        .iter()
        .filter(|r| r.is_optimal())
        .filter_map(|r| r.recomputed_objective);
    match objectives.next() {
        Some(first) => objectives.all(|o| objectives_agree(first, o)),
        None => true,
    }
}

/// Per facility, whether every record holding a placement agrees on it.
fn placement_agreement(records: &[VariantRecord], facilities: usize) -> Vec<bool> {
    let placed: Vec<&Placement> = records.iter().filter_map(|r| r.placement.as_ref()).collect();
    (0..facilities)
        .map(|f| placed.windows(2).all(|pair| pair[0].get(f) == pair[1].get(f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::EXPANSION_MODEL;
    use crate::instance::tests::{ids, scenario_b};
    use crate::oracle::{MicrolpOracle, ModelDescriptor, SolveOutcome, SolveParams};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// microlp, except that the first `remaining` expansion checks come back
    /// infeasible
    struct RejectExpansions {
        inner: MicrolpOracle,
        remaining: AtomicUsize,
    }

    impl SolverOracle for RejectExpansions {
        fn name(&self) -> &str {
            "reject-expansions"
        }

        fn solve(&self, model: &ModelDescriptor, params: &SolveParams) -> Result<SolveOutcome> {
            let reject = model.name() == EXPANSION_MODEL
                && self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if reject {
                return Ok(SolveOutcome::without_solution(Status::Infeasible, Duration::ZERO));
            }
            self.inner.solve(model, params)
        }
    }

    fn three_with_clones() -> QapInstance {
        QapInstance::new(
            "clones",
            ids("f", 3),
            ids("", 3),
            vec![vec![0, 4, 4], vec![4, 0, 7], vec![4, 7, 0]],
            vec![vec![0.0, 2.0, 5.0], vec![2.0, 0.0, 3.0], vec![5.0, 3.0, 0.0]],
        )
        .unwrap()
    }

    fn placed(variant: Variant, placement: Placement) -> VariantRecord {
        let mut record = VariantRecord::failed(variant, &QapError::UnknownVariant(String::new()));
        record.error = None;
        record.status = Some(Status::Optimal);
        record.placement = Some(placement);
        record
    }

    fn sequential_options() -> HarnessOptions {
        HarnessOptions {
            bounds: BoundConfig {
                parallel: false,
                show_progress: false,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_scenario_b_comparison() {
        let oracle = MicrolpOracle::new();
        let harness = ComparisonHarness::new(&oracle, sequential_options());
        let report = harness.run(&scenario_b(), &Variant::ALL).unwrap();

        assert_eq!(report.records.len(), 5);
        assert!(report.agreement);
        assert!(report.reduced_facilities.is_none());
        for record in &report.records {
            assert!(record.is_optimal(), "{} ended {:?}", record.variant, record.error);
            assert!(!record.objective_mismatch);
            assert_eq!(record.assignment.as_ref().map(Vec::len), Some(3));
        }
        let best = report.best_objective().unwrap();
        assert!(report
            .records
            .iter()
            .all(|r| objectives_agree(r.reported_objective.unwrap(), best)));
        assert!(report.to_json().unwrap().contains("\"xiayuan\""));
    }

    #[test]
    fn test_trivial_merge_is_rejected() {
        let oracle = MicrolpOracle::new();
        let options = HarnessOptions {
            merge_equivalent: true,
            ..sequential_options()
        };
        let err = ComparisonHarness::new(&oracle, options)
            .run(&scenario_b(), &[Variant::Quadratic])
            .unwrap_err();
        assert!(matches!(err, QapError::TrivialReduction(3)));
    }

    #[test]
    fn test_merged_run_reports_original_facilities() {
        let instance = three_with_clones();
        let oracle = MicrolpOracle::new();
        let options = HarnessOptions {
            merge_equivalent: true,
            ..sequential_options()
        };
        let merged = ComparisonHarness::new(&oracle, options)
            .run(&instance, &[Variant::Quadratic, Variant::Zhang])
            .unwrap();
        let direct = ComparisonHarness::new(&oracle, sequential_options())
            .run(&instance, &[Variant::Quadratic])
            .unwrap();

        assert_eq!(merged.reduced_facilities, Some(2));
        assert!(merged.agreement);
        for record in &merged.records {
            assert_eq!(record.solved_facilities, 2);
            assert_eq!(record.assignment.as_ref().map(Vec::len), Some(3));
        }
        assert_eq!(merged.best_objective(), direct.best_objective());
    }

    #[test]
    fn test_csv_export() {
        let oracle = MicrolpOracle::new();
        let report = ComparisonHarness::new(&oracle, sequential_options())
            .run(&scenario_b(), &[Variant::Quadratic, Variant::Linearized])
            .unwrap();
        let path = std::env::temp_dir().join(format!("qap-reform-report-{}.csv", std::process::id()));
        report.export_to_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().starts_with("instance,variant,status"));
    }

    #[test]
    fn test_rejected_expansion_fails_only_its_variant() {
        let oracle = RejectExpansions {
            inner: MicrolpOracle::new(),
            remaining: AtomicUsize::new(1),
        };
        let options = HarnessOptions {
            merge_equivalent: true,
            ..sequential_options()
        };
        let report = ComparisonHarness::new(&oracle, options)
            .run(&three_with_clones(), &[Variant::Quadratic, Variant::Zhang])
            .unwrap();

        let rejected = &report.records[0];
        assert_eq!(rejected.variant, Variant::Quadratic);
        assert!(rejected.status.is_none());
        assert!(rejected.placement.is_none());
        assert!(rejected.error.as_deref().unwrap().contains("expansion infeasible"));

        let confirmed = &report.records[1];
        assert!(confirmed.is_optimal(), "{:?}", confirmed.error);
        assert_eq!(confirmed.assignment.as_ref().map(Vec::len), Some(3));
        assert!(report.agreement);
        assert!(report.assignments_agree);
    }

    #[test]
    fn test_unique_optimum_placements_agree() {
        // swapping is strictly cheaper: 5 * 1 + 1 * 3 against 5 * 3 + 1 * 1
        let instance = QapInstance::new(
            "swap",
            ids("f", 2),
            ids("", 2),
            vec![vec![0, 5], vec![1, 0]],
            vec![vec![0.0, 3.0], vec![1.0, 0.0]],
        )
        .unwrap();
        let oracle = MicrolpOracle::new();
        let report = ComparisonHarness::new(&oracle, sequential_options())
            .run(&instance, &Variant::ALL)
            .unwrap();

        assert_eq!(report.facility_agreement, vec![true, true]);
        assert!(report.assignments_agree);
        assert_eq!(report.facility_ids, vec!["f1", "f2"]);
        for record in &report.records {
            assert_eq!(record.placement, Some(vec![vec![1], vec![0]]), "{}", record.variant);
        }
        assert!(objectives_agree(report.best_objective().unwrap(), 8.0));
    }

    #[test]
    fn test_placement_agreement_per_facility() {
        let records = vec![
            placed(Variant::Quadratic, vec![vec![0], vec![1, 2]]),
            placed(Variant::Zhang, vec![vec![0], vec![2, 3]]),
            VariantRecord::failed(Variant::Fischetti, &QapError::TrivialReduction(2)),
        ];
        assert_eq!(placement_agreement(&records, 2), vec![true, false]);
        assert_eq!(placement_agreement(&records[2..], 2), vec![true, true]);
    }
}
