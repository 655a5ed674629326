//! Per-session reference data.
//!
//! Everything here is read-only once constructed and is passed explicitly to
//! whatever needs it.  Nothing is cached globally.
//!
//! | type               | source                                   |
//! |--------------------|------------------------------------------|
//! | [`SessionCatalog`] | JSON: subjects, probe datasets, sessions |
//! | [`MarkerChannels`] | JSON: session → marker channel(s)        |
//! | [`DentateSpikes`]  | detector output (1-based sample indices) |
//! | [`ClusterTable`]   | tab/comma-delimited cluster table        |
//! | [`SpikeTrain`]     | spike clusters + AP-band sample indices  |
//!
//! [`SessionBundle`] groups them for one session, together with the LFP
//! timestamps and [`DerivedArrays`] of its two probes.
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ensure_pre, PipelineError};
use crate::io::DerivedArrays;

const BUILTIN_CATALOG: &str = include_str!("../data/sessions.json");

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Which dentate granule-cell blades the event detector covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BladeCoverage {
    #[default]
    Both,
    SuperiorOnly,
}

/// Per-session constants and data-quality flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub subject_id: u32,
    pub recording_id: u32,
    /// Approximate hippocampal channel range `(lo, hi)` on the merged CSD.
    pub hpc_channel_limits: (u32, u32),
    /// `false` where dentate-spike detection failed.
    #[serde(default = "default_true")]
    pub has_dentate_spikes: bool,
    #[serde(default)]
    pub blade_coverage: BladeCoverage,
    /// Raw timestamps and exported LFP disagree in length.
    #[serde(default)]
    pub timestamp_mismatch: bool,
}

fn default_true() -> bool {
    true
}

/// One animal and the dataset id of each of its probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: u32,
    /// Probe name (`"AP1"`, `"AP2"`) → dataset id.
    pub probes: BTreeMap<String, u32>,
}

/// Injected lookup tables for a set of recordings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCatalog {
    pub subjects: Vec<Subject>,
    pub sessions: BTreeMap<String, SessionMetadata>,
}

impl SessionCatalog {
    pub fn from_json(text: &str) -> Result<Self> {
        let cat: Self = serde_json::from_str(text).context("parsing session catalog")?;
        cat.validate()?;
        Ok(cat)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// The catalog shipped with the crate (`data/sessions.json`).
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    fn validate(&self) -> Result<()> {
        for (id, meta) in &self.sessions {
            ensure_pre!(
                self.subject(meta.subject_id).is_some(),
                "session {id} refers to unknown subject {}",
                meta.subject_id
            );
            let (lo, hi) = meta.hpc_channel_limits;
            ensure_pre!(lo <= hi, "session {id}: inverted channel limits ({lo}, {hi})");
        }
        Ok(())
    }

    pub fn subject(&self, id: u32) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn session(&self, session_id: &str) -> Option<&SessionMetadata> {
        self.sessions.get(session_id)
    }

    /// Like [`session`](Self::session) but unknown ids are an error.
    pub fn require(&self, session_id: &str) -> Result<&SessionMetadata> {
        self.session(session_id).ok_or_else(|| {
            PipelineError::PreconditionViolation(format!("unknown session {session_id:?}")).into()
        })
    }

    pub fn dataset(&self, subject_id: u32, probe: &str) -> Option<u32> {
        self.subject(subject_id)?.probes.get(probe).copied()
    }

    /// Dataset id of the CA3 probe (`AP2`) for the session's subject.
    pub fn ca3_dataset(&self, session_id: &str) -> Result<u32> {
        let meta = self.require(session_id)?;
        self.dataset(meta.subject_id, "AP2").ok_or_else(|| {
            PipelineError::PreconditionViolation(format!(
                "subject {} has no AP2 probe",
                meta.subject_id
            ))
            .into()
        })
    }

    /// CA3 cells of a session from the cell-features table: rows whose
    /// `dataset` is the session's AP2 dataset, whose `recording` is the
    /// session's recording and whose `location` is `CA3`.
    pub fn select_cells(&self, features: &ClusterTable, session_id: &str) -> Result<Vec<u32>> {
        let meta = self.require(session_id)?;
        let dataset = self.ca3_dataset(session_id)?.to_string();
        let recording = meta.recording_id.to_string();
        features.ids_matching(&[("dataset", &dataset), ("recording", &recording), ("location", "CA3")])
    }

    /// Session ids in lexical (chronological) order.
    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}

// ── Marker channels ─────────────────────────────────────────────────────────

/// Dentate-spike marker: one channel, or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Marker {
    Single(u32),
    Span(Vec<u32>),
}

impl Marker {
    pub fn channels(&self) -> &[u32] {
        match self {
            Marker::Single(c) => std::slice::from_ref(c),
            Marker::Span(v) => v,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerChannels(pub BTreeMap<String, Marker>);

impl MarkerChannels {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing marker channels")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn get(&self, session_id: &str) -> Option<&Marker> {
        self.0.get(session_id)
    }
}

// ── Dentate spikes ──────────────────────────────────────────────────────────

/// Dentate-spike events by subtype, as 0-based LFP sample indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DentateSpikes {
    pub type1: Vec<usize>,
    pub type2: Vec<usize>,
}

impl DentateSpikes {
    /// Split detector output into the two subtypes.
    ///
    /// `samples_1based[i]` belongs to type 1 if `type1_mask[i]`, to type 2 if
    /// `type2_mask[i]` (both or neither are allowed).
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` if the three vectors differ in length or any
    /// index is 0.
    pub fn from_detector(samples_1based: &[u64], type1_mask: &[bool], type2_mask: &[bool]) -> Result<Self> {
        let n = samples_1based.len();
        ensure_pre!(
            type1_mask.len() == n && type2_mask.len() == n,
            "detector vectors differ in length: {n} samples, {} / {} mask entries",
            type1_mask.len(),
            type2_mask.len()
        );
        ensure_pre!(
            samples_1based.iter().all(|&s| s >= 1),
            "detector sample indices must be 1-based"
        );

        let pick = |mask: &[bool]| -> Vec<usize> {
            samples_1based
                .iter()
                .zip(mask)
                .filter(|&(_, &m)| m)
                .map(|(&s, _)| (s - 1) as usize)
                .collect()
        };
        let out = Self { type1: pick(type1_mask), type2: pick(type2_mask) };
        debug!(type1 = out.type1.len(), type2 = out.type2.len(), "dentate spikes");
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.type1.is_empty() && self.type2.is_empty()
    }
}

// ── Clusters ────────────────────────────────────────────────────────────────

/// Cluster metadata table, one row per cluster.
///
/// Every column is kept as text; `id` is parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTable {
    pub headers: Vec<String>,
    pub ids: Vec<u32>,
    rows: Vec<Vec<String>>,
}

impl ClusterTable {
    /// Read a delimited table with a header row containing `id`.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let id_col = headers.iter().position(|h| h == "id").ok_or_else(|| {
            PipelineError::PreconditionViolation(format!("cluster table has no `id` column: {headers:?}"))
        })?;

        let mut ids = Vec::new();
        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("cluster table row {}", line + 1))?;
            let raw = record.get(id_col).unwrap_or_default().trim();
            let id: u32 = raw.parse().map_err(|_| {
                PipelineError::PreconditionViolation(format!("row {}: cluster id {raw:?} is not an integer", line + 1))
            })?;
            ids.push(id);
            rows.push(record.iter().map(|f| f.trim().to_string()).collect());
        }
        Ok(Self { headers, ids, rows })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") => b'\t',
            _ => b',',
        };
        let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file, delimiter).with_context(|| format!("reading {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn column(&self, name: &str) -> Result<usize> {
        self.headers.iter().position(|h| h == name).ok_or_else(|| {
            PipelineError::PreconditionViolation(format!("cluster table has no {name:?} column")).into()
        })
    }

    /// Value of `column` for the row with cluster `id`.
    pub fn value(&self, id: u32, column: &str) -> Option<&str> {
        let col = self.column(column).ok()?;
        let row = self.ids.iter().position(|&i| i == id)?;
        self.rows[row].get(col).map(String::as_str)
    }

    /// Ids whose `column` equals `value`.
    pub fn ids_where(&self, column: &str, value: &str) -> Result<Vec<u32>> {
        self.ids_matching(&[(column, value)])
    }

    /// Ids of rows satisfying every `(column, value)` condition.  Conditions
    /// hold on the same row, so ids repeated across rows stay distinct.
    pub fn ids_matching(&self, conditions: &[(&str, &str)]) -> Result<Vec<u32>> {
        let mut cols = Vec::with_capacity(conditions.len());
        for &(column, value) in conditions {
            cols.push((self.column(column)?, value));
        }
        Ok(self
            .ids
            .iter()
            .zip(&self.rows)
            .filter(|(_, row)| cols.iter().all(|&(col, value)| row.get(col).map(String::as_str) == Some(value)))
            .map(|(&id, _)| id)
            .collect())
    }

    /// Ids recorded in `region` (the `location` column).
    pub fn ids_in_region(&self, region: &str) -> Result<Vec<u32>> {
        self.ids_where("location", region)
    }

    /// Rows whose id is in `ids`, order preserved.
    pub fn retain_ids(&self, ids: &[u32]) -> Self {
        let keep: BTreeSet<u32> = ids.iter().copied().collect();
        let (ids, rows) = self
            .ids
            .iter()
            .zip(&self.rows)
            .filter(|&(id, _)| keep.contains(id))
            .map(|(&id, row)| (id, row.clone()))
            .unzip();
        Self { headers: self.headers.clone(), ids, rows }
    }
}

// ── Spikes ──────────────────────────────────────────────────────────────────

/// Sorted spikes: parallel cluster ids and LFP-band sample indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpikeTrain {
    pub clusters: Vec<u32>,
    pub samples: Vec<u64>,
}

impl SpikeTrain {
    pub fn new(clusters: Vec<u32>, samples: Vec<u64>) -> Result<Self> {
        ensure_pre!(
            clusters.len() == samples.len(),
            "{} spike clusters for {} spike samples",
            clusters.len(),
            samples.len()
        );
        Ok(Self { clusters, samples })
    }

    /// Convert action-potential-band sample indices to the LFP band by
    /// integer division by `ratio` (30000 / 2500 = 12).
    pub fn from_ap(clusters: Vec<u32>, ap_samples: &[u64], ratio: u64) -> Result<Self> {
        ensure_pre!(ratio > 0, "AP/LFP ratio must be positive");
        Self::new(clusters, ap_samples.iter().map(|&s| s / ratio).collect())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Spikes belonging to any of `ids`.
    pub fn restrict_to(&self, ids: &[u32]) -> Self {
        let keep: BTreeSet<u32> = ids.iter().copied().collect();
        let (clusters, samples) = self
            .clusters
            .iter()
            .zip(&self.samples)
            .filter(|&(c, _)| keep.contains(c))
            .map(|(&c, &s)| (c, s))
            .unzip();
        Self { clusters, samples }
    }

    /// LFP sample indices of cluster `id`.
    pub fn samples_of(&self, id: u32) -> Vec<u64> {
        self.clusters
            .iter()
            .zip(&self.samples)
            .filter(|&(&c, _)| c == id)
            .map(|(_, &s)| s)
            .collect()
    }
}

// ── Bundle ──────────────────────────────────────────────────────────────────

/// One of the two LFP probes of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfpProbe {
    /// Dentate gyrus probe (`LF1`).
    Dg,
    /// CA probe (`LF2`).
    Ca,
}

/// LFP timestamps of one probe and its derived arrays (`csd`, `wav`, ...).
#[derive(Debug, Clone, Default)]
pub struct ProbeArrays {
    pub timestamps: Vec<i64>,
    pub derived: Option<Arc<DerivedArrays>>,
}

/// The materialized reference data for one session.
#[derive(Debug, Clone)]
pub struct SessionBundle {
    pub session_id: String,
    pub metadata: SessionMetadata,
    pub marker: Option<Marker>,
    pub dentate_spikes: DentateSpikes,
    /// CA3 cells selected from the features table.
    pub cells: Vec<u32>,
    /// Clusters restricted to [`cells`](Self::cells).
    pub clusters: ClusterTable,
    /// Spikes of the selected clusters, LFP-band samples.
    pub spikes: SpikeTrain,
    pub dg: ProbeArrays,
    pub ca: ProbeArrays,
}

impl SessionBundle {
    /// Assemble a session.  Cells come from
    /// [`SessionCatalog::select_cells`] on `features`; only their clusters
    /// and spikes are kept.  Dentate spikes are dropped for sessions flagged
    /// without detection.  Probe arrays start empty, see
    /// [`with_probe`](Self::with_probe).
    pub fn assemble(
        catalog: &SessionCatalog,
        session_id: &str,
        markers: &MarkerChannels,
        dentate_spikes: DentateSpikes,
        clusters: &ClusterTable,
        features: &ClusterTable,
        spikes: &SpikeTrain,
    ) -> Result<Self> {
        let metadata = catalog.require(session_id)?.clone();
        let cells = catalog.select_cells(features, session_id)?;
        let clusters = clusters.retain_ids(&cells);
        let spikes = spikes.restrict_to(&clusters.ids);
        let dentate_spikes = if metadata.has_dentate_spikes { dentate_spikes } else { DentateSpikes::default() };
        debug!(
            session_id,
            cells = cells.len(),
            clusters = clusters.len(),
            spikes = spikes.len(),
            "session bundle assembled"
        );
        Ok(Self {
            session_id: session_id.to_string(),
            metadata,
            marker: markers.get(session_id).cloned(),
            dentate_spikes,
            cells,
            clusters,
            spikes,
            dg: ProbeArrays::default(),
            ca: ProbeArrays::default(),
        })
    }

    /// Attach the LFP timestamps and derived arrays of `probe`.
    ///
    /// # Errors
    ///
    /// `ConsistencyCheckFailure` if a derived `csd` has a different number of
    /// samples than `timestamps`, unless the session is flagged with
    /// `timestamp_mismatch`.
    pub fn with_probe(mut self, probe: LfpProbe, timestamps: Vec<i64>, derived: Option<DerivedArrays>) -> Result<Self> {
        if let Some(info) = derived.as_ref().and_then(|d| d.info("csd")) {
            let samples = info.shape.first().copied().unwrap_or(0);
            if samples != timestamps.len() && !self.metadata.timestamp_mismatch {
                return Err(PipelineError::ConsistencyCheckFailure(format!(
                    "session {}: {probe:?} csd has {samples} samples for {} timestamps",
                    self.session_id,
                    timestamps.len()
                ))
                .into());
            }
        }
        let arrays = ProbeArrays { timestamps, derived: derived.map(Arc::new) };
        match probe {
            LfpProbe::Dg => self.dg = arrays,
            LfpProbe::Ca => self.ca = arrays,
        }
        Ok(self)
    }

    pub fn probe(&self, probe: LfpProbe) -> &ProbeArrays {
        match probe {
            LfpProbe::Dg => &self.dg,
            LfpProbe::Ca => &self.ca,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads() {
        let cat = SessionCatalog::builtin().unwrap();
        assert_eq!(cat.subjects.len(), 3);
        assert_eq!(cat.sessions.len(), 22);

        let s = cat.session("2020-01-16_20-25-54").unwrap();
        assert_eq!((s.subject_id, s.recording_id), (5, 13));
        assert_eq!(s.hpc_channel_limits, (69, 116));
        assert!(!s.has_dentate_spikes);

        let s = cat.session("2020-03-13_14-00-04").unwrap();
        assert_eq!(s.blade_coverage, BladeCoverage::Both);
        let s = cat.session("2020-03-13_19-11-00").unwrap();
        assert_eq!(s.blade_coverage, BladeCoverage::SuperiorOnly);
        assert!(s.has_dentate_spikes);
    }

    #[test]
    fn ca3_dataset_uses_ap2() {
        let cat = SessionCatalog::builtin().unwrap();
        assert_eq!(cat.ca3_dataset("2020-03-11_16-14-50").unwrap(), 7);
        assert_eq!(cat.dataset(9, "AP1"), Some(8));
        assert!(cat.ca3_dataset("1999-01-01_00-00-00").is_err());
    }

    #[test]
    fn catalog_rejects_unknown_subject() {
        let json = r#"{"subjects": [], "sessions": {"s": {"subject_id": 1, "recording_id": 2, "hpc_channel_limits": [0, 5]}}}"#;
        assert!(SessionCatalog::from_json(json).is_err());
    }

    #[test]
    fn marker_single_or_span() {
        let m = MarkerChannels::from_json(r#"{"a": 12, "b": [3, 4, 5]}"#).unwrap();
        assert_eq!(m.get("a"), Some(&Marker::Single(12)));
        assert_eq!(m.get("b").unwrap().channels(), &[3, 4, 5]);
        assert_eq!(m.get("c"), None);
    }

    #[test]
    fn dentate_spikes_zero_based() {
        let ds = DentateSpikes::from_detector(&[1, 10, 20, 30], &[true, false, true, false], &[false, true, false, false])
            .unwrap();
        assert_eq!(ds.type1, vec![0, 19]);
        assert_eq!(ds.type2, vec![9]);
    }

    #[test]
    fn dentate_spikes_reject_bad_input() {
        assert!(DentateSpikes::from_detector(&[1, 2], &[true], &[false, false]).is_err());
        assert!(DentateSpikes::from_detector(&[0, 2], &[true, true], &[false, false]).is_err());
    }

    #[test]
    fn cluster_table_filters() {
        let tsv = "id\tlocation\tgroup\n3\tCA3\tgood\n7\tDG\tgood\n9\tCA3\tmua\n";
        let t = ClusterTable::from_reader(tsv.as_bytes(), b'\t').unwrap();
        assert_eq!(t.ids, vec![3, 7, 9]);
        assert_eq!(t.ids_in_region("CA3").unwrap(), vec![3, 9]);
        assert_eq!(t.ids_where("group", "good").unwrap(), vec![3, 7]);
        assert_eq!(t.value(9, "group"), Some("mua"));
        assert!(t.ids_where("depth", "1").is_err());
        assert_eq!(t.retain_ids(&[9, 7]).ids, vec![7, 9]);
    }

    #[test]
    fn cluster_table_needs_id() {
        assert!(ClusterTable::from_reader("cluster,location\n1,CA3\n".as_bytes(), b',').is_err());
    }

    #[test]
    fn spike_train_ap_to_lfp() {
        let st = SpikeTrain::from_ap(vec![1, 2, 1], &[0, 23, 24], 12).unwrap();
        assert_eq!(st.samples, vec![0, 1, 2]);
        let r = st.restrict_to(&[1]);
        assert_eq!(r.clusters, vec![1, 1]);
        assert_eq!(r.samples, vec![0, 2]);
        assert_eq!(st.samples_of(2), vec![1]);
        assert!(SpikeTrain::new(vec![1], vec![]).is_err());
    }

    #[test]
    fn bundle_drops_undetected_dentate_spikes() {
        let cat = SessionCatalog::builtin().unwrap();
        let markers = MarkerChannels::from_json(r#"{"2020-01-16_17-35-48": 40}"#).unwrap();
        let ds = DentateSpikes { type1: vec![1], type2: vec![] };
        let table = ClusterTable::from_reader("id,location\n1,CA3\n2,CA1\n".as_bytes(), b',').unwrap();
        let features =
            ClusterTable::from_reader("id,dataset,recording,location\n1,5,8,CA3\n".as_bytes(), b',').unwrap();
        let spikes = SpikeTrain::new(vec![1, 2, 1], vec![5, 6, 7]).unwrap();

        let b = SessionBundle::assemble(&cat, "2020-01-16_17-35-48", &markers, ds, &table, &features, &spikes)
            .unwrap();
        assert!(b.dentate_spikes.is_empty());
        assert_eq!(b.marker, Some(Marker::Single(40)));
        assert_eq!(b.spikes.samples, vec![5, 7]);
        assert_eq!(b.clusters.ids, vec![1]);
    }

    #[test]
    fn select_cells_applies_dataset_recording_and_region() {
        let cat = SessionCatalog::builtin().unwrap();
        // Cluster 2 is CA3 in recording 9 but DG in this one.
        let csv = "id,dataset,recording,location\n1,5,8,CA3\n2,5,8,DG\n2,5,9,CA3\n3,5,9,CA3\n4,4,8,CA3\n5,5,8,CA3\n";
        let features = ClusterTable::from_reader(csv.as_bytes(), b',').unwrap();
        assert_eq!(cat.select_cells(&features, "2020-01-16_17-35-48").unwrap(), vec![1, 5]);
        assert!(cat.select_cells(&features, "unknown").is_err());

        let no_recording = ClusterTable::from_reader("id,dataset,location\n1,5,CA3\n".as_bytes(), b',').unwrap();
        assert!(cat.select_cells(&no_recording, "2020-01-16_17-35-48").is_err());
    }
}
