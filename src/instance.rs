//! Module for loading and representing QAP instances.
//!
//! Facility and location ids are resolved to dense indices once, when the
//! instance is built; everything downstream works on `0..N` and `0..M`.
//! Instances are persisted as JSON with the four named values
//! `facilities`, `locations`, `flow` and `distance`, where the two matrices
//! are lists of `[id, id, value]` entries.

use crate::error::{QapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Facility index -> the sorted locations it occupies.
///
/// A facility with multiplicity `k` occupies exactly `k` distinct locations.
pub type Placement = Vec<Vec<usize>>;

/// Immutable QAP instance over dense indices
#[derive(Debug, Clone, PartialEq)]
pub struct QapInstance {
    /// Name of the instance (file stem when loaded from disk)
    pub name: String,
    /// Facility ids in canonical order
    pub facilities: Vec<String>,
    /// Location ids in canonical order
    pub locations: Vec<String>,
    /// `flow[f1][f2]`, non-negative
    pub flow: Vec<Vec<i64>>,
    /// `distance[l1][l2]`, non-negative, zero diagonal
    pub distance: Vec<Vec<f64>>,
    /// Number of distinct locations each facility occupies (1 unless reduced)
    pub multiplicity: Vec<usize>,
}

/// On-disk representation of an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFile {
    pub facilities: Vec<String>,
    pub locations: Vec<String>,
    pub flow: Vec<(String, String, i64)>,
    pub distance: Vec<(String, String, f64)>,
}

/// Injective facility -> location mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment(Vec<usize>);

impl Assignment {
    pub fn new(locations: Vec<usize>) -> Self {
        Assignment(locations)
    }

    #[inline]
    pub fn location_of(&self, facility: usize) -> usize {
        self.0[facility]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// No two facilities share a location and every location is in range.
    pub fn is_injective(&self, num_locations: usize) -> bool {
        let mut used = vec![false; num_locations];
        for &l in &self.0 {
            if l >= num_locations || used[l] {
                return false;
            }
            used[l] = true;
        }
        true
    }

    /// View the assignment as a placement with one location per facility.
    pub fn to_placement(&self) -> Placement {
        self.0.iter().map(|&l| vec![l]).collect()
    }
}

impl QapInstance {
    /// Build an instance from dense matrices, validating shapes and signs.
    pub fn new(
        name: impl Into<String>,
        facilities: Vec<String>,
        locations: Vec<String>,
        flow: Vec<Vec<i64>>,
        distance: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let n = facilities.len();
        let m = locations.len();
        if m < n {
            return Err(QapError::MalformedInstance(format!(
                "{} locations cannot host {} facilities",
                m, n
            )));
        }
        if flow.len() != n || flow.iter().any(|row| row.len() != n) {
            return Err(QapError::MalformedInstance(format!("flow matrix must be {}x{}", n, n)));
        }
        if distance.len() != m || distance.iter().any(|row| row.len() != m) {
            return Err(QapError::MalformedInstance(format!("distance matrix must be {}x{}", m, m)));
        }
        if flow.iter().flatten().any(|&v| v < 0) {
            return Err(QapError::MalformedInstance("negative flow".to_string()));
        }
        if distance.iter().flatten().any(|&v| !(v >= 0.0) || !v.is_finite()) {
            return Err(QapError::MalformedInstance("negative or non-finite distance".to_string()));
        }
        if (0..m).any(|l| distance[l][l] != 0.0) {
            return Err(QapError::MalformedInstance("distance diagonal must be zero".to_string()));
        }

        Ok(QapInstance {
            name: name.into(),
            facilities,
            locations,
            flow,
            distance,
            multiplicity: vec![1; n],
        })
    }

    /// Replace the multiplicity vector (used for reduced instances).
    pub fn with_multiplicity(mut self, multiplicity: Vec<usize>) -> Result<Self> {
        if multiplicity.len() != self.facilities.len() || multiplicity.iter().any(|&k| k == 0) {
            return Err(QapError::MalformedInstance(
                "multiplicity must be positive for every facility".to_string(),
            ));
        }
        if multiplicity.iter().sum::<usize>() > self.locations.len() {
            return Err(QapError::MalformedInstance(format!(
                "total multiplicity exceeds {} locations",
                self.locations.len()
            )));
        }
        self.multiplicity = multiplicity;
        Ok(self)
    }

    /// Load an instance from its JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(QapError::InstanceNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let file: InstanceFile = serde_json::from_reader(reader)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "instance".to_string());
        Self::from_instance_file(name, file)
    }

    /// Resolve string ids of the persisted form into dense matrices.
    /// Pairs missing from the file are zero.
    pub fn from_instance_file(name: impl Into<String>, file: InstanceFile) -> Result<Self> {
        let fac_index = index_of(&file.facilities, "facility")?;
        let loc_index = index_of(&file.locations, "location")?;

        let n = file.facilities.len();
        let m = file.locations.len();
        let mut flow = vec![vec![0i64; n]; n];
        for (a, b, v) in &file.flow {
            let i = lookup(&fac_index, a, "facility")?;
            let j = lookup(&fac_index, b, "facility")?;
            flow[i][j] = *v;
        }
        let mut distance = vec![vec![0.0f64; m]; m];
        for (a, b, v) in &file.distance {
            let i = lookup(&loc_index, a, "location")?;
            let j = lookup(&loc_index, b, "location")?;
            distance[i][j] = *v;
        }

        Self::new(name, file.facilities, file.locations, flow, distance)
    }

    pub fn to_instance_file(&self) -> InstanceFile {
        let mut flow = Vec::with_capacity(self.num_facilities().pow(2));
        for (i, a) in self.facilities.iter().enumerate() {
            for (j, b) in self.facilities.iter().enumerate() {
                flow.push((a.clone(), b.clone(), self.flow[i][j]));
            }
        }
        let mut distance = Vec::with_capacity(self.num_locations().pow(2));
        for (i, a) in self.locations.iter().enumerate() {
            for (j, b) in self.locations.iter().enumerate() {
                distance.push((a.clone(), b.clone(), self.distance[i][j]));
            }
        }
        InstanceFile {
            facilities: self.facilities.clone(),
            locations: self.locations.clone(),
            flow,
            distance,
        }
    }

    /// Write the instance as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.to_instance_file())?;
        Ok(())
    }

    #[inline]
    pub fn num_facilities(&self) -> usize {
        self.facilities.len()
    }

    #[inline]
    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    /// Number of location slots the facilities need in total.
    pub fn total_demand(&self) -> usize {
        self.multiplicity.iter().sum()
    }

    /// Every location is occupied by every feasible placement.
    pub fn is_full(&self) -> bool {
        self.total_demand() == self.num_locations()
    }

    #[inline]
    pub fn flow(&self, f1: usize, f2: usize) -> i64 {
        self.flow[f1][f2]
    }

    #[inline]
    pub fn distance(&self, l1: usize, l2: usize) -> f64 {
        self.distance[l1][l2]
    }

    /// Cost of facility `f1` at `l1` interacting with `f2` at `l2`.
    #[inline]
    pub fn pair_weight(&self, f1: usize, l1: usize, f2: usize, l2: usize) -> f64 {
        self.flow[f1][f2] as f64 * self.distance[l1][l2]
    }

    /// True QAP objective of an assignment, recomputed from the matrices.
    pub fn objective(&self, assignment: &Assignment) -> f64 {
        let n = self.num_facilities();
        let mut total = 0.0;
        for f1 in 0..n {
            let l1 = assignment.location_of(f1);
            for f2 in 0..n {
                total += self.pair_weight(f1, l1, f2, assignment.location_of(f2));
            }
        }
        total
    }

    /// Objective of a placement, counting every occupied slot as one member.
    pub fn placement_objective(&self, placement: &Placement) -> f64 {
        placement
            .iter()
            .enumerate()
            .flat_map(|(f, locs)| locs.iter().map(move |&l| (f, l)))
            .map(|(f, l)| self.slot_cost(placement, f, l))
            .sum()
    }

    /// Cost facility `f` induces from location `l` against every occupied slot.
    pub fn slot_cost(&self, placement: &Placement, f: usize, l: usize) -> f64 {
        placement
            .iter()
            .enumerate()
            .flat_map(|(g, locs)| locs.iter().map(move |&l2| (g, l2)))
            .map(|(g, l2)| self.pair_weight(f, l, g, l2))
            .sum()
    }

    pub fn facility_cost(&self, assignment: &Assignment, f: usize) -> f64 {
        let l = assignment.location_of(f);
        (0..self.num_facilities())
            .map(|g| self.pair_weight(f, l, g, assignment.location_of(g)))
            .sum()
    }

    /// Copy of the instance with one zero-flow slack facility absorbing the
    /// unused locations, or `None` when every location is already needed.
    pub fn with_slack_facility(&self) -> Option<QapInstance> {
        let free = self.num_locations() - self.total_demand();
        if free == 0 {
            return None;
        }
        let n = self.num_facilities();
        let mut padded = self.clone();
        padded.facilities.push("#slack".to_string());
        for row in padded.flow.iter_mut() {
            row.push(0);
        }
        padded.flow.push(vec![0; n + 1]);
        padded.multiplicity.push(free);
        Some(padded)
    }

    /// Get statistics about the instance
    pub fn statistics(&self) -> InstanceStatistics {
        let n = self.num_facilities();
        let m = self.num_locations();
        let off_diagonal_flows: Vec<i64> = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| self.flow[i][j])
            .collect();
        let total_flow: i64 = off_diagonal_flows.iter().sum();
        let nonzero = off_diagonal_flows.iter().filter(|&&v| v != 0).count();
        let flow_density = if off_diagonal_flows.is_empty() {
            0.0
        } else {
            nonzero as f64 / off_diagonal_flows.len() as f64
        };

        let mut distances: Vec<f64> = Vec::new();
        for i in 0..m {
            for j in i + 1..m {
                distances.push(self.distance(i, j));
            }
        }
        let avg_distance = if distances.is_empty() {
            0.0
        } else {
            distances.iter().sum::<f64>() / distances.len() as f64
        };
        let max_distance = distances.iter().cloned().fold(0.0, f64::max);
        let symmetric_distance = (0..m).all(|i| (0..m).all(|j| self.distance[i][j] == self.distance[j][i]));

        InstanceStatistics {
            name: self.name.clone(),
            num_facilities: n,
            num_locations: m,
            total_flow,
            flow_density,
            avg_distance,
            max_distance,
            symmetric_distance,
        }
    }
}

fn index_of(ids: &[String], kind: &str) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if index.insert(id.clone(), i).is_some() {
            return Err(QapError::MalformedInstance(format!("duplicate {} id `{}`", kind, id)));
        }
    }
    Ok(index)
}

fn lookup(index: &HashMap<String, usize>, id: &str, kind: &str) -> Result<usize> {
    index
        .get(id)
        .copied()
        .ok_or_else(|| QapError::MalformedInstance(format!("unknown {} id `{}`", kind, id)))
}

/// Statistics about a QAP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub name: String,
    pub num_facilities: usize,
    pub num_locations: usize,
    pub total_flow: i64,
    pub flow_density: f64,
    pub avg_distance: f64,
    pub max_distance: f64,
    pub symmetric_distance: bool,
}

impl std::fmt::Display for InstanceStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Instance: {}", self.name)?;
        writeln!(f, "  Facilities: {}", self.num_facilities)?;
        writeln!(f, "  Locations: {}", self.num_locations)?;
        writeln!(f, "  Total flow: {}", self.total_flow)?;
        writeln!(f, "  Flow density: {:.2}%", self.flow_density * 100.0)?;
        writeln!(f, "  Avg distance: {:.2}", self.avg_distance)?;
        writeln!(f, "  Max distance: {:.2}", self.max_distance)?;
        writeln!(f, "  Symmetric distance: {}", self.symmetric_distance)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    /// 3x3 instance with zero flow diagonal and an asymmetric distance matrix.
    pub(crate) fn scenario_b() -> QapInstance {
        QapInstance::new(
            "scenario-b",
            ids("f", 3),
            ids("", 3),
            vec![vec![0, 5, 2], vec![3, 0, 4], vec![1, 6, 0]],
            vec![vec![0.0, 2.0, 7.0], vec![3.0, 0.0, 1.0], vec![5.0, 4.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_objective_recomputation() {
        let instance = scenario_b();
        let identity = Assignment::new(vec![0, 1, 2]);
        // 5*2 + 2*7 + 3*3 + 4*1 + 1*5 + 6*4
        assert_eq!(instance.objective(&identity), 66.0);
        let per_facility: f64 = (0..3).map(|f| instance.facility_cost(&identity, f)).sum();
        assert_eq!(per_facility, 66.0);
        assert_eq!(instance.placement_objective(&identity.to_placement()), 66.0);
    }

    #[test]
    fn test_rejects_unknown_ids() {
        let file = InstanceFile {
            facilities: ids("f", 2),
            locations: ids("", 2),
            flow: vec![("f1".into(), "f9".into(), 3)],
            distance: vec![],
        };
        let err = QapInstance::from_instance_file("bad", file).unwrap_err();
        assert!(matches!(err, QapError::MalformedInstance(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = QapInstance::from_file("/nonexistent/instance.json").unwrap_err();
        assert!(matches!(err, QapError::InstanceNotFound(_)));
    }

    #[test]
    fn test_json_file_round_trip() {
        let instance = scenario_b();
        let path = std::env::temp_dir().join(format!("qap-reform-{}.json", std::process::id()));
        instance.save(&path).unwrap();
        let loaded = QapInstance::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.flow, instance.flow);
        assert_eq!(loaded.distance, instance.distance);
        assert_eq!(loaded.facilities, instance.facilities);
    }

    #[test]
    fn test_slack_facility_padding() {
        let instance = QapInstance::new(
            "pad",
            ids("f", 2),
            ids("", 4),
            vec![vec![0, 1], vec![1, 0]],
            vec![vec![0.0; 4]; 4],
        )
        .unwrap();
        let padded = instance.with_slack_facility().unwrap();
        assert_eq!(padded.num_facilities(), 3);
        assert_eq!(padded.multiplicity, vec![1, 1, 2]);
        assert!(padded.is_full());
        assert!(scenario_b().with_slack_facility().is_none());
    }
}
