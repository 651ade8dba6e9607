//! Solver oracle boundary.
//!
//! Formulations describe their models as a [`ModelDescriptor`]: variables,
//! linear constraints and a linear or quadratic objective, without reference
//! to any solver library. A [`SolverOracle`] turns a descriptor into a
//! [`SolveOutcome`]. Oracles never mutate the descriptor, so one oracle can
//! serve many threads, each owning its own descriptor.

mod builtin;

pub use builtin::MicrolpOracle;

// When built with the `gurobi` feature, expose the real implementation
#[cfg(feature = "gurobi")]
mod gurobi;
#[cfg(feature = "gurobi")]
pub use gurobi::{GurobiConfig, GurobiOracle};

// Otherwise provide a lightweight stub so the rest of the codebase can compile
#[cfg(not(feature = "gurobi"))]
mod gurobi_stub {
    use super::{ModelDescriptor, SolveOutcome, SolveParams, SolverOracle};
    use crate::error::{QapError, Result};

    #[derive(Debug, Clone, Default)]
    pub struct GurobiConfig {
        pub mip_gap: f64,
        pub verbose: bool,
    }

    pub struct GurobiOracle {
        pub config: GurobiConfig,
    }

    impl GurobiOracle {
        pub fn new(config: GurobiConfig) -> Self {
            GurobiOracle { config }
        }
    }

    impl SolverOracle for GurobiOracle {
        fn name(&self) -> &str {
            "gurobi"
        }

        fn solve(&self, _model: &ModelDescriptor, _params: &SolveParams) -> Result<SolveOutcome> {
            Err(QapError::Solver("Gurobi feature not enabled in this build".to_string()))
        }
    }
}

#[cfg(not(feature = "gurobi"))]
pub use gurobi_stub::{GurobiConfig, GurobiOracle};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;

/// Handle of a variable inside one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a constraint inside one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstrId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Binary,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstrSense {
    Le,
    Eq,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSense {
    Minimize,
    Maximize,
}

/// Terminal status of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Optimal,
    Infeasible,
    Unbounded,
    InfeasibleOrUnbounded,
    Suboptimal,
    Interrupted,
    TimeLimit,
    WorkLimit,
    IterationLimit,
    MemoryLimit,
    NodeLimit,
    SolutionLimit,
    ObjectiveLimit,
    Cutoff,
    /// Solve stopped on numerical trouble
    Numeric,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Optimal => "Optimal",
            Status::Infeasible => "Infeasible",
            Status::Unbounded => "Unbounded",
            Status::InfeasibleOrUnbounded => "InfeasibleOrUnbounded",
            Status::Suboptimal => "Suboptimal",
            Status::Interrupted => "Interrupted",
            Status::TimeLimit => "TimeLimit",
            Status::WorkLimit => "WorkLimit",
            Status::IterationLimit => "IterationLimit",
            Status::MemoryLimit => "MemoryLimit",
            Status::NodeLimit => "NodeLimit",
            Status::SolutionLimit => "SolutionLimit",
            Status::ObjectiveLimit => "ObjectiveLimit",
            Status::Cutoff => "Cutoff",
            Status::Numeric => "Numeric",
        };
        f.write_str(s)
    }
}

/// Variable declaration
#[derive(Debug, Clone, PartialEq)]
pub struct VarSpec {
    pub name: String,
    pub kind: VarKind,
    pub lb: f64,
    pub ub: f64,
    /// Branching hint, higher is branched on first
    pub priority: i32,
}

/// Weighted sum of variables plus a constant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_term(&mut self, var: VarId, coeff: f64) -> &mut Self {
        if coeff != 0.0 {
            self.terms.push((var, coeff));
        }
        self
    }

    pub fn add_constant(&mut self, value: f64) -> &mut Self {
        self.constant += value;
        self
    }

    /// Sum of the same variable appearing several times, zero terms dropped.
    pub fn merged(&self) -> Vec<(VarId, f64)> {
        let mut terms = self.terms.clone();
        terms.sort_by_key(|&(v, _)| v);
        let mut out: Vec<(VarId, f64)> = Vec::with_capacity(terms.len());
        for (v, c) in terms {
            match out.last_mut() {
                Some((last, acc)) if *last == v => *acc += c,
                _ => out.push((v, c)),
            }
        }
        out.retain(|&(_, c)| c != 0.0);
        out
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.constant + self.terms.iter().map(|&(v, c)| c * values[v.0]).sum::<f64>()
    }
}

impl FromIterator<(VarId, f64)> for LinExpr {
    fn from_iter<I: IntoIterator<Item = (VarId, f64)>>(iter: I) -> Self {
        let mut expr = LinExpr::new();
        for (v, c) in iter {
            expr.add_term(v, c);
        }
        expr
    }
}

/// Linear expression plus bilinear terms `coeff * a * b`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadExpr {
    pub linear: LinExpr,
    pub quad: Vec<(VarId, VarId, f64)>,
}

impl QuadExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_qterm(&mut self, a: VarId, b: VarId, coeff: f64) -> &mut Self {
        if coeff != 0.0 {
            self.quad.push((a, b, coeff));
        }
        self
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.linear.evaluate(values)
            + self.quad.iter().map(|&(a, b, c)| c * values[a.0] * values[b.0]).sum::<f64>()
    }
}

impl From<LinExpr> for QuadExpr {
    fn from(linear: LinExpr) -> Self {
        QuadExpr { linear, quad: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub expr: LinExpr,
    pub sense: ConstrSense,
    pub rhs: f64,
}

impl Constraint {
    pub fn is_satisfied(&self, values: &[f64], tol: f64) -> bool {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            ConstrSense::Le => lhs <= self.rhs + tol,
            ConstrSense::Ge => lhs >= self.rhs - tol,
            ConstrSense::Eq => (lhs - self.rhs).abs() <= tol,
        }
    }
}

/// Solver-agnostic model: variables, constraints and objective.
///
/// Removed variables and constraints leave a hole so handles stay stable.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    name: String,
    vars: Vec<Option<VarSpec>>,
    constrs: Vec<Option<Constraint>>,
    objective: QuadExpr,
    sense: ModelSense,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        ModelDescriptor {
            name: name.into(),
            vars: Vec::new(),
            constrs: Vec::new(),
            objective: QuadExpr::new(),
            sense: ModelSense::Minimize,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn add_var(&mut self, name: impl Into<String>, kind: VarKind, lb: f64, ub: f64) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Some(VarSpec {
            name: name.into(),
            kind,
            lb,
            ub,
            priority: 0,
        }));
        id
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.add_var(name, VarKind::Binary, 0.0, 1.0)
    }

    pub fn add_continuous(&mut self, name: impl Into<String>, lb: f64, ub: f64) -> VarId {
        self.add_var(name, VarKind::Continuous, lb, ub)
    }

    pub fn add_constr(&mut self, name: impl Into<String>, expr: LinExpr, sense: ConstrSense, rhs: f64) -> ConstrId {
        let id = ConstrId(self.constrs.len());
        self.constrs.push(Some(Constraint {
            name: name.into(),
            expr,
            sense,
            rhs,
        }));
        id
    }

    pub fn remove_constr(&mut self, id: ConstrId) {
        if let Some(slot) = self.constrs.get_mut(id.0) {
            *slot = None;
        }
    }

    pub fn remove_all_constrs(&mut self) {
        self.constrs.iter_mut().for_each(|c| *c = None);
    }

    /// Remove a variable together with every term referencing it.
    pub fn remove_var(&mut self, var: VarId) {
        if let Some(slot) = self.vars.get_mut(var.0) {
            *slot = None;
        }
        for c in self.constrs.iter_mut().flatten() {
            c.expr.terms.retain(|&(v, _)| v != var);
        }
        self.objective.linear.terms.retain(|&(v, _)| v != var);
        self.objective.quad.retain(|&(a, b, _)| a != var && b != var);
    }

    pub fn set_objective(&mut self, objective: impl Into<QuadExpr>, sense: ModelSense) {
        self.objective = objective.into();
        self.sense = sense;
    }

    pub fn set_sense(&mut self, sense: ModelSense) {
        self.sense = sense;
    }

    pub fn set_bounds(&mut self, var: VarId, lb: f64, ub: f64) {
        if let Some(Some(spec)) = self.vars.get_mut(var.0) {
            spec.lb = lb;
            spec.ub = ub;
        }
    }

    pub fn fix(&mut self, var: VarId, value: f64) {
        self.set_bounds(var, value, value);
    }

    pub fn set_branch_priority(&mut self, var: VarId, priority: i32) {
        if let Some(Some(spec)) = self.vars.get_mut(var.0) {
            spec.priority = priority;
        }
    }

    pub fn var(&self, var: VarId) -> Option<&VarSpec> {
        self.vars.get(var.0).and_then(|v| v.as_ref())
    }

    /// Live variables with their handles
    pub fn vars(&self) -> impl Iterator<Item = (VarId, &VarSpec)> {
        self.vars
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|spec| (VarId(i), spec)))
    }

    /// Size of the handle space (including removed variables)
    pub fn var_capacity(&self) -> usize {
        self.vars.len()
    }

    pub fn num_vars(&self) -> usize {
        self.vars.iter().flatten().count()
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constrs.iter().flatten()
    }

    pub fn num_constrs(&self) -> usize {
        self.constrs.iter().flatten().count()
    }

    pub fn objective(&self) -> &QuadExpr {
        &self.objective
    }

    pub fn sense(&self) -> ModelSense {
        self.sense
    }

    pub fn has_integer_vars(&self) -> bool {
        self.vars().any(|(_, v)| v.kind == VarKind::Binary)
    }

    /// Open a scope whose constraint additions and objective changes are
    /// undone when the scope is dropped.
    pub fn scoped(&mut self) -> ScopedModel<'_> {
        let objective = self.objective.clone();
        let sense = self.sense;
        ScopedModel {
            model: self,
            added: Vec::new(),
            objective,
            sense,
        }
    }
}

/// Temporary modification of a [`ModelDescriptor`].
///
/// Constraints added through the scope are removed and the objective and
/// sense are restored on drop, on every exit path. Only changes the drop can
/// undo are reachable; the model itself is read through `Deref`.
///
/// ```compile_fail
/// use qap_reform::oracle::ModelDescriptor;
///
/// let mut model = ModelDescriptor::new("m");
/// let x = model.add_binary("x");
/// let mut scope = model.scoped();
/// scope.set_bounds(x, 0.0, 0.0);
/// ```
pub struct ScopedModel<'a> {
    model: &'a mut ModelDescriptor,
    added: Vec<ConstrId>,
    objective: QuadExpr,
    sense: ModelSense,
}

impl ScopedModel<'_> {
    pub fn add_constr(&mut self, name: impl Into<String>, expr: LinExpr, sense: ConstrSense, rhs: f64) -> ConstrId {
        let id = self.model.add_constr(name, expr, sense, rhs);
        self.added.push(id);
        id
    }

    /// Removes a constraint this scope added. Returns false for any other id.
    pub fn remove_constr(&mut self, id: ConstrId) -> bool {
        match self.added.iter().position(|&added| added == id) {
            Some(pos) => {
                self.added.remove(pos);
                self.model.remove_constr(id);
                true
            }
            None => {
                log::warn!("`{}`: scope cannot remove a constraint it did not add", self.model.name());
                false
            }
        }
    }

    pub fn set_objective(&mut self, objective: impl Into<QuadExpr>, sense: ModelSense) {
        self.model.set_objective(objective, sense);
    }

    pub fn set_sense(&mut self, sense: ModelSense) {
        self.model.set_sense(sense);
    }
}

impl Deref for ScopedModel<'_> {
    type Target = ModelDescriptor;

    fn deref(&self) -> &ModelDescriptor {
        self.model
    }
}

impl Drop for ScopedModel<'_> {
    fn drop(&mut self) {
        for id in self.added.drain(..).rev() {
            self.model.remove_constr(id);
        }
        // trailing holes left by the scope are dropped so scratch models do not grow
        while matches!(self.model.constrs.last(), Some(None)) {
            self.model.constrs.pop();
        }
        self.model.objective = std::mem::take(&mut self.objective);
        self.model.sense = self.sense;
    }
}

/// Per-solve parameters
#[derive(Debug, Clone)]
pub struct SolveParams {
    /// Wall-clock limit in seconds
    pub time_limit: Option<f64>,
    /// Solver threads (None = solver default)
    pub threads: Option<usize>,
    /// Number of best solutions to collect
    pub pool_size: usize,
    /// Forward solver log output
    pub verbose: bool,
    /// Compute reduced costs (LP models only)
    pub reduced_costs: bool,
}

impl Default for SolveParams {
    fn default() -> Self {
        SolveParams {
            time_limit: None,
            threads: None,
            pool_size: 1,
            verbose: false,
            reduced_costs: false,
        }
    }
}

impl SolveParams {
    pub fn with_reduced_costs() -> Self {
        SolveParams {
            reduced_costs: true,
            ..Default::default()
        }
    }
}

/// One solution of the pool
#[derive(Debug, Clone)]
pub struct PoolSolution {
    pub objective: f64,
    pub values: Vec<f64>,
}

/// Result of one oracle call. `values` and `reduced_costs` are indexed by
/// [`VarId::index`]; removed variables read as zero.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: Status,
    pub objective: Option<f64>,
    pub values: Vec<f64>,
    pub reduced_costs: Option<Vec<f64>>,
    /// Best solutions, best first (includes the incumbent)
    pub pool: Vec<PoolSolution>,
    pub runtime: Duration,
}

impl SolveOutcome {
    pub fn without_solution(status: Status, runtime: Duration) -> Self {
        SolveOutcome {
            status,
            objective: None,
            values: Vec::new(),
            reduced_costs: None,
            pool: Vec::new(),
            runtime,
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.status == Status::Optimal
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var.0).copied().unwrap_or(0.0)
    }

    pub fn reduced_cost(&self, var: VarId) -> Option<f64> {
        self.reduced_costs.as_ref().and_then(|rc| rc.get(var.0).copied())
    }

    /// Objective of an optimal solve, or `SolverNonOptimal` naming `model`.
    pub fn optimal_objective(&self, model: &str) -> Result<f64> {
        match (self.status, self.objective) {
            (Status::Optimal, Some(obj)) => Ok(obj),
            (status, _) => Err(crate::error::QapError::SolverNonOptimal {
                model: model.to_string(),
                status,
            }),
        }
    }
}

/// Generic LP/MILP solving service
pub trait SolverOracle: Send + Sync {
    fn name(&self) -> &str;

    fn solve(&self, model: &ModelDescriptor, params: &SolveParams) -> Result<SolveOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_model_restores_state() {
        let mut model = ModelDescriptor::new("scope");
        let x = model.add_continuous("x", 0.0, 1.0);
        let y = model.add_continuous("y", 0.0, 1.0);
        model.add_constr("base", [(x, 1.0), (y, 1.0)].into_iter().collect(), ConstrSense::Le, 1.0);
        model.set_objective(LinExpr::from_iter([(x, 1.0)]), ModelSense::Minimize);
        {
            let mut scope = model.scoped();
            scope.add_constr("fix", LinExpr::from_iter([(y, 1.0)]), ConstrSense::Eq, 1.0);
            scope.set_objective(LinExpr::from_iter([(y, 2.0)]), ModelSense::Maximize);
            assert_eq!(scope.num_constrs(), 2);
        }
        assert_eq!(model.num_constrs(), 1);
        assert_eq!(model.sense(), ModelSense::Minimize);
        assert_eq!(model.objective().linear.terms, vec![(x, 1.0)]);
    }

    #[test]
    fn test_scope_only_removes_its_own_constraints() {
        let mut model = ModelDescriptor::new("scope");
        let x = model.add_continuous("x", 0.0, 1.0);
        let base = model.add_constr("base", LinExpr::from_iter([(x, 1.0)]), ConstrSense::Le, 1.0);
        {
            let mut scope = model.scoped();
            let fix = scope.add_constr("fix", LinExpr::from_iter([(x, 1.0)]), ConstrSense::Eq, 1.0);
            assert!(!scope.remove_constr(base));
            assert_eq!(scope.num_constrs(), 2);
            assert!(scope.remove_constr(fix));
            assert!(!scope.remove_constr(fix));
            assert_eq!(scope.num_constrs(), 1);
        }
        assert_eq!(model.num_constrs(), 1);
        assert_eq!(model.constraints().next().unwrap().name, "base");
        assert_eq!(model.var(x).unwrap().ub, 1.0);
    }

    #[test]
    fn test_remove_var_drops_terms() {
        let mut model = ModelDescriptor::new("remove");
        let x = model.add_binary("x");
        let y = model.add_binary("y");
        model.add_constr("c", LinExpr::from_iter([(x, 1.0), (y, 1.0)]), ConstrSense::Eq, 1.0);
        let mut obj = QuadExpr::new();
        obj.add_qterm(x, y, 3.0);
        obj.linear.add_term(y, 1.0);
        model.set_objective(obj, ModelSense::Minimize);

        model.remove_var(y);
        assert_eq!(model.num_vars(), 1);
        assert!(model.objective().quad.is_empty());
        assert!(model.objective().linear.terms.is_empty());
        assert_eq!(model.constraints().next().unwrap().expr.terms, vec![(x, 1.0)]);
    }

    #[test]
    fn test_merged_expression() {
        let x = VarId(0);
        let y = VarId(1);
        let expr = LinExpr::from_iter([(y, 1.0), (x, 2.0), (y, -1.0), (x, 1.0)]);
        assert_eq!(expr.merged(), vec![(x, 3.0)]);
    }
}
