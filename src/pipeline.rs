//! The diagnostic run: read the input metadata, load and optionally correct
//! each variable, reduce it to a time series and plot one chart per variable.
use std::collections::HashMap;
use std::path::PathBuf;

use error_stack::{Report, ResultExt};

use crate::{
    config::{DiagnosticConfig, TimeInterval},
    cube::Cube,
    derive::correct,
    metadata::{group_metadata, regroup, InputCollection, MetadataKey, VariableMetadata},
    plotting::{difference_series, PlotEmitter},
    variable::{self, EsmVariable, ReducedVariable},
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("An error occurred while reading the input metadata")]
    ReadingMetadata,
    #[error("An error occurred while loading a variable")]
    Loading,
    #[error("An error occurred while correcting a variable to grid cell area")]
    Correcting,
    #[error("An error occurred while reducing a variable")]
    Reducing,
    #[error("An error occurred while computing differences from the reference experiment")]
    Differencing,
    #[error("An error occurred while writing plots")]
    Plotting,
}

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Chart files, one per variable short name.
    pub plots: Vec<PathBuf>,
    /// Difference chart files, if difference plots were requested.
    pub difference_plots: Vec<PathBuf>,
    /// Number of series plotted across all charts.
    pub n_series: usize,
    /// Number of series that were corrected to grid cell area.
    pub n_corrected: usize,
}

/// Run the full diagnostic described by `config`.
pub fn run(config: &DiagnosticConfig) -> Result<RunSummary, Report<PipelineError>> {
    let inputs = InputCollection::from_json_file(&config.metadata_file)
        .change_context(PipelineError::ReadingMetadata)?;
    log::info!("{} input variables listed in {}", inputs.len(), config.metadata_file.display());

    let (reduced, n_corrected) = reduce_inputs(config, inputs.records())?;
    let ensembles = config.ensemble_table();

    let plots = PlotEmitter::new(config.plot_config())
        .label_by(config.label_by, ensembles.clone())
        .emit(&reduced)
        .change_context(PipelineError::Plotting)?;

    let difference_plots = if config.difference_plots {
        let differences = difference_series(&reduced, &ensembles, &config.reference_experiment)
            .change_context(PipelineError::Differencing)?;
        PlotEmitter::new(config.difference_plot_config())
            .label_by(config.label_by, ensembles)
            .emit(&differences)
            .change_context(PipelineError::Plotting)?
    } else {
        vec![]
    };

    Ok(RunSummary { plots, difference_plots, n_series: reduced.len(), n_corrected })
}

/// Load, correct (if configured) and reduce every input variable.
///
/// The result is ordered by variable short name (in order of first appearance),
/// then by input order. Land area fraction inputs used for the correction are
/// not part of the result. The second value is the number of corrected variables.
pub fn reduce_inputs(config: &DiagnosticConfig, records: &[VariableMetadata])
-> Result<(Vec<ReducedVariable>, usize), Report<PipelineError>> {
    let fraction_name = config.grid_correction.as_ref().map(|gc| gc.fraction_short_name.as_str());
    let by_dataset = group_metadata(records, MetadataKey::Dataset);

    let mut fractions = LandFractions::default();
    let mut to_plot = by_dataset.clone();
    if let Some(fraction_name) = fraction_name {
        for (dataset, recs) in by_dataset.iter() {
            for rec in recs.iter().filter(|r| r.short_name == fraction_name) {
                let cube = variable::load(rec)
                    .change_context(PipelineError::Loading)
                    .attach_printable_lazy(|| format!("land area fraction for {dataset} ({})", rec.ensemble))?;
                fractions.insert(rec, cube);
            }
        }
        for recs in to_plot.values_mut() {
            recs.retain(|r| r.short_name != fraction_name);
        }
    }

    let by_variable = regroup(&to_plot, MetadataKey::ShortName);
    let mut reduced = Vec::with_capacity(records.len());
    let mut n_corrected = 0;
    for (short_name, recs) in by_variable.iter() {
        let corrected = config.grid_correction.as_ref()
            .is_some_and(|gc| gc.variables.iter().any(|v| v == short_name));
        log::info!("Processing {short_name} from {} datasets", recs.len());

        for rec in recs {
            let mut var = EsmVariable::load(rec.clone())
                .change_context(PipelineError::Loading)
                .attach_printable_lazy(|| describe(rec))?;

            if corrected {
                let fraction = fractions.for_record(rec);
                if fraction.is_none() {
                    log::warn!("No land area fraction for {}, it will not be corrected to grid cell area", describe(rec));
                } else {
                    n_corrected += 1;
                }
                var = var.map_cube(|cube| correct(&cube, fraction))
                    .change_context(PipelineError::Correcting)
                    .attach_printable_lazy(|| describe(rec))?;
            }

            let mut series = var.area_statistic(config.statistic)
                .change_context(PipelineError::Reducing)?;
            if config.time_interval == TimeInterval::Annual {
                series = series.annual_statistic(config.statistic)
                    .change_context(PipelineError::Reducing)?;
            }
            reduced.push(series);
        }
    }

    Ok((reduced, n_corrected))
}

fn describe(rec: &VariableMetadata) -> String {
    format!("{} from {} ({}) in {}", rec.short_name, rec.dataset, rec.ensemble, rec.filename.display())
}

/// Land area fraction cubes by dataset and ensemble.
#[derive(Debug, Default)]
struct LandFractions(HashMap<String, Vec<(String, Cube)>>);

impl LandFractions {
    fn insert(&mut self, rec: &VariableMetadata, cube: Cube) {
        self.0.entry(rec.dataset.clone()).or_default().push((rec.ensemble.clone(), cube));
    }

    /// The fraction from the same dataset and ensemble, else the first one from the same dataset.
    fn for_record(&self, rec: &VariableMetadata) -> Option<&Cube> {
        let candidates = self.0.get(&rec.dataset)?;
        candidates.iter()
            .find(|(ens, _)| ens == &rec.ensemble)
            .or_else(|| candidates.first())
            .map(|(_, cube)| cube)
    }
}
