//! QAP Reformulation Library
//!
//! Builds and compares exact mixed-integer reformulations of the Quadratic
//! Assignment Problem.
//!
//! # Features
//!
//! - Five master formulations: quadratic, linearized, Fischetti, Xia-Yuan, Zhang
//! - LAP-based min/max bounds and lifted reduced-cost cuts, computed in parallel
//! - Dense assignment solver with dual potentials for Fischetti's reduced costs
//! - Clone-facility reduction with solution expansion and a feasibility check
//! - Side-by-side comparison with objective cross-checks, CSV and JSON reports
//! - Random instance generator and QAPLIB importer
//! - Pure Rust MILP backend (microlp), Gurobi behind the `gurobi` feature
//!
//! # Example
//!
//! ```no_run
//! use qap_reform::formulation::Variant;
//! use qap_reform::harness::{ComparisonHarness, HarnessOptions};
//! use qap_reform::instance::QapInstance;
//! use qap_reform::oracle::MicrolpOracle;
//!
//! let instance = QapInstance::from_file("instance.json").unwrap();
//! let oracle = MicrolpOracle::new();
//! let harness = ComparisonHarness::new(&oracle, HarnessOptions::default());
//! let report = harness.run(&instance, &Variant::ALL).unwrap();
//!
//! println!("Agreement: {}", report.agreement);
//! ```

pub mod bounds;
pub mod equivalence;
pub mod error;
pub mod formulation;
pub mod generator;
pub mod grid;
pub mod harness;
pub mod instance;
pub mod lap;
pub mod oracle;
pub mod qaplib;

pub use error::{QapError, Result};
pub use formulation::{Formulation, Variant};
pub use instance::QapInstance;
