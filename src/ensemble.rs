//! Lookup of ensemble (variant label) identifiers to the model configuration
//! and experiment they represent.
//!
//! Emissions-MIP runs reuse one CMIP dataset name for several model
//! configurations and experiments, distinguished only by the forcing index of
//! the variant label. The table here turns e.g. "r1i1p5f102" back into
//! ("GISS-E2-1-G", "reference"). Tables are data: a run configuration can supply
//! its own, and [`EnsembleTable::default`] gives the GISS Emissions-MIP set.
use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::UnknownEnsembleError;

pub(crate) static GISS_EMIP_ENSEMBLES: &[(&str, &str, &str)] = &[
    ("r1i1p5f101", "GISS-E2-1-G", "season-so2"),
    ("r1i1p5f102", "GISS-E2-1-G", "reference"),
    ("r1i1p5f103", "GISS-E2-1-G-nudge", "reference"),
    ("r1i1p5f104", "GISS-E2-1-G-nudge", "season-so2"),
];

/// The model configuration and experiment behind one ensemble identifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleInfo {
    pub model: String,
    pub experiment: String,
}

impl EnsembleInfo {
    pub fn new<M: ToString, E: ToString>(model: M, experiment: E) -> Self {
        Self { model: model.to_string(), experiment: experiment.to_string() }
    }

    /// Label used for plot legends, "{model}_{experiment}".
    pub fn label(&self) -> String {
        format!("{}_{}", self.model, self.experiment)
    }
}

/// Mapping from ensemble identifier to [`EnsembleInfo`].
///
/// In TOML this is a plain table:
///
/// ```toml
/// [ensembles]
/// r1i1p5f101 = { model = "GISS-E2-1-G", experiment = "season-so2" }
/// r1i1p5f102 = { model = "GISS-E2-1-G", experiment = "reference" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct EnsembleTable(IndexMap<String, EnsembleInfo>);

impl EnsembleTable {
    /// An empty table, in which every lookup fails.
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    pub fn insert<S: ToString>(&mut self, ensemble: S, info: EnsembleInfo) -> Option<EnsembleInfo> {
        self.0.insert(ensemble.to_string(), info)
    }

    pub fn lookup(&self, ensemble: &str) -> Result<&EnsembleInfo, UnknownEnsembleError> {
        self.0.get(ensemble).ok_or_else(|| UnknownEnsembleError(ensemble.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, EnsembleInfo> {
        self.0.iter()
    }
}

impl Default for EnsembleTable {
    fn default() -> Self {
        GISS_EMIP_ENSEMBLES.iter()
            .map(|&(ens, model, exp)| (ens.to_string(), EnsembleInfo::new(model, exp)))
            .collect::<IndexMap<_, _>>()
            .into()
    }
}

impl From<IndexMap<String, EnsembleInfo>> for EnsembleTable {
    fn from(value: IndexMap<String, EnsembleInfo>) -> Self {
        Self(value)
    }
}
