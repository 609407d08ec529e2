//! Line charts of reduced variables.
//!
//! [`PlotEmitter::emit`] takes a flat list of reduced (1-D, time series)
//! variables, groups them by short name and writes one chart per short name.
//! Each variable becomes one line, labeled either by its dataset or by the
//! model configuration and experiment its ensemble maps to.
//!
//! Drawing is delegated to a [`SeriesRenderer`]. [`PlotlyRenderer`] always
//! writes standalone HTML; static images (PNG, JPEG, SVG, PDF, WEBP) need the
//! `kaleido` feature.
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use itertools::Itertools;
use plotly::{
    common::{DashType, Line, Mode, Title},
    layout::Axis,
    Layout, Plot, Scatter,
};
use serde::{Deserialize, Serialize};

use crate::{
    cube::Cube,
    ensemble::EnsembleTable,
    error::{OutputWriteError, ShapeMismatchError, UnknownEnsembleError},
    variable::ReducedVariable,
};

pub const DEFAULT_FILENAME_TEMPLATE: &str = "time_series-{}.html";
pub const DEFAULT_TITLE_TEMPLATE: &str = "Annual Average - {}";
pub const DEFAULT_DIFFERENCE_FILENAME_TEMPLATE: &str = "time_series-difference-{}.html";
pub const DEFAULT_DIFFERENCE_TITLE_TEMPLATE: &str = "Difference from reference - {}";

static SERIES_COLORS: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd",
    "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22", "#17becf",
];

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error(transparent)]
    Write(#[from] OutputWriteError),
    #[error("Could not label series: {0}")]
    Label(#[from] UnknownEnsembleError),
    #[error("{short_name} from {dataset} ({ensemble}) has shape {shape:?} after reduction, only 1-D time series can be plotted")]
    NotATimeSeries {
        dataset: String,
        short_name: String,
        ensemble: String,
        shape: Vec<usize>,
    },
    #[error("Could not difference against the reference run: {0}")]
    Shape(#[from] ShapeMismatchError),
}

/// Substitute `value` into the first `{}` in `template`.
pub fn fill_template(template: &str, value: &str) -> String {
    template.replacen("{}", value, 1)
}

/// How each line on a chart is labeled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SeriesLabel {
    /// The dataset (model) name
    #[default]
    Dataset,
    /// "{model}_{experiment}" looked up from the ensemble
    Experiment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotConfig {
    /// Directory charts are written to, created if needed.
    pub output_directory: PathBuf,
    /// File name of each chart, with one `{}` replaced by the short name.
    pub filename_template: String,
    /// Chart title, with one `{}` replaced by the short name.
    pub title_template: String,
    pub time_axis_label: String,
    /// Also write the plotted values as JSON next to each chart.
    pub write_data: bool,
}

impl PlotConfig {
    pub fn new(output_directory: PathBuf) -> Self {
        Self {
            output_directory,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            title_template: DEFAULT_TITLE_TEMPLATE.to_string(),
            time_axis_label: "Years".to_string(),
            write_data: true,
        }
    }

    pub fn chart_path(&self, short_name: &str) -> PathBuf {
        self.output_directory.join(fill_template(&self.filename_template, short_name))
    }

    pub fn chart_title(&self, short_name: &str) -> String {
        fill_template(&self.title_template, short_name)
    }
}

/// One line on a chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledSeries {
    pub label: String,
    pub units: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Everything needed to draw (or dump) one chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub short_name: String,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<LabeledSeries>,
}

/// Something that can draw a [`Chart`] to a file.
pub trait SeriesRenderer {
    fn render(&self, chart: &Chart, path: &Path) -> Result<(), OutputWriteError>;
}

/// Renders charts with `plotly`.
#[derive(Debug, Clone, Copy)]
pub struct PlotlyRenderer {
    pub width: usize,
    pub height: usize,
}

impl Default for PlotlyRenderer {
    fn default() -> Self {
        Self { width: 1200, height: 600 }
    }
}

impl PlotlyRenderer {
    fn build_plot(chart: &Chart) -> Plot {
        let mut plot = Plot::new();
        for (i, series) in chart.series.iter().enumerate() {
            let line = Line::new()
                .color(SERIES_COLORS[i % SERIES_COLORS.len()])
                .dash(dash_type(i));
            let trace = Scatter::new(series.x.clone(), series.y.clone())
                .name(&series.label)
                .mode(Mode::Lines)
                .line(line);
            plot.add_trace(trace);
        }

        let layout = Layout::new()
            .title(Title::new(&chart.title))
            .x_axis(Axis::new().title(Title::new(&chart.x_label)))
            .y_axis(Axis::new().title(Title::new(&chart.y_label)));
        plot.set_layout(layout);
        plot
    }
}

impl SeriesRenderer for PlotlyRenderer {
    fn render(&self, chart: &Chart, path: &Path) -> Result<(), OutputWriteError> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let plot = Self::build_plot(chart);

        if ext == "html" {
            return std::fs::write(path, plot.to_html())
                .map_err(|e| OutputWriteError::write(path, e));
        }

        match write_image(&plot, path, &ext, self.width, self.height) {
            Some(res) => res,
            None => Err(OutputWriteError::UnsupportedFormat {
                path: path.to_owned(),
                reason: unsupported_reason(&ext),
            }),
        }
    }
}

fn dash_type(i: usize) -> DashType {
    match i % 4 {
        0 => DashType::Solid,
        1 => DashType::Dash,
        2 => DashType::Dot,
        _ => DashType::DashDot,
    }
}

#[cfg(feature = "kaleido")]
fn write_image(plot: &Plot, path: &Path, ext: &str, width: usize, height: usize) -> Option<Result<(), OutputWriteError>> {
    use plotly::ImageFormat;
    let format = match ext {
        "png" => ImageFormat::PNG,
        "jpeg" => ImageFormat::JPEG,
        "svg" => ImageFormat::SVG,
        "pdf" => ImageFormat::PDF,
        "webp" => ImageFormat::WEBP,
        _ => return None,
    };
    plot.write_image(path, format, width, height, 1.0);
    Some(Ok(()))
}

#[cfg(not(feature = "kaleido"))]
fn write_image(_plot: &Plot, _path: &Path, _ext: &str, _width: usize, _height: usize) -> Option<Result<(), OutputWriteError>> {
    None
}

fn unsupported_reason(ext: &str) -> String {
    match ext {
        "png" | "jpeg" | "svg" | "pdf" | "webp" => format!("writing .{ext} images requires the 'kaleido' feature"),
        "" => "the output file has no extension".to_string(),
        _ => format!("no chart format is associated with .{ext}"),
    }
}

/// Writes one chart per variable short name.
#[derive(Debug, Clone)]
pub struct PlotEmitter<R: SeriesRenderer = PlotlyRenderer> {
    config: PlotConfig,
    label: SeriesLabel,
    ensembles: EnsembleTable,
    renderer: R,
}

impl PlotEmitter<PlotlyRenderer> {
    pub fn new(config: PlotConfig) -> Self {
        Self::with_renderer(config, PlotlyRenderer::default())
    }
}

impl<R: SeriesRenderer> PlotEmitter<R> {
    pub fn with_renderer(config: PlotConfig, renderer: R) -> Self {
        Self { config, label: SeriesLabel::default(), ensembles: EnsembleTable::default(), renderer }
    }

    /// Set how series are labeled, and the ensemble table used for [`SeriesLabel::Experiment`].
    pub fn label_by(mut self, label: SeriesLabel, ensembles: EnsembleTable) -> Self {
        self.label = label;
        self.ensembles = ensembles;
        self
    }

    pub fn config(&self) -> &PlotConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Write one chart per distinct short name in `series`, returning the chart paths
    /// in order of first appearance of each short name.
    pub fn emit(&self, series: &[ReducedVariable]) -> Result<Vec<PathBuf>, PlotError> {
        let mut by_variable: IndexMap<&str, Vec<&ReducedVariable>> = IndexMap::new();
        for var in series {
            by_variable.entry(var.metadata().short_name.as_str()).or_default().push(var);
        }

        if !by_variable.is_empty() {
            let dir = &self.config.output_directory;
            std::fs::create_dir_all(dir)
                .map_err(|e| OutputWriteError::CreateDir { path: dir.to_owned(), reason: e.to_string() })?;
        }

        let mut paths = Vec::with_capacity(by_variable.len());
        for (short_name, vars) in by_variable {
            let chart = self.make_chart(short_name, &vars)?;
            let path = self.config.chart_path(short_name);
            log::info!("Plotting {} ({}) to {}",
                short_name,
                chart.series.iter().map(|s| s.label.as_str()).join(", "),
                path.display()
            );
            self.renderer.render(&chart, &path)?;

            if self.config.write_data {
                write_chart_data(&chart, &path.with_extension("json"))?;
            }
            paths.push(path);
        }
        Ok(paths)
    }

    fn make_chart(&self, short_name: &str, vars: &[&ReducedVariable]) -> Result<Chart, PlotError> {
        let series = vars.iter()
            .map(|v| self.labeled_series(v))
            .collect::<Result<Vec<_>, _>>()?;
        let units = series.first().map(|s| s.units.as_str()).unwrap_or_default();
        Ok(Chart {
            short_name: short_name.to_string(),
            title: self.config.chart_title(short_name),
            x_label: self.config.time_axis_label.clone(),
            y_label: format!("Area average ({units})"),
            series,
        })
    }

    fn labeled_series(&self, var: &ReducedVariable) -> Result<LabeledSeries, PlotError> {
        let meta = var.metadata();
        let cube = var.cube();
        if cube.ndim() != 1 {
            return Err(PlotError::NotATimeSeries {
                dataset: meta.dataset.clone(),
                short_name: meta.short_name.clone(),
                ensemble: meta.ensemble.clone(),
                shape: cube.shape().to_vec(),
            });
        }

        let label = match self.label {
            SeriesLabel::Dataset => meta.dataset.clone(),
            SeriesLabel::Experiment => self.ensembles.lookup(&meta.ensemble)?.label(),
        };

        Ok(LabeledSeries {
            label,
            units: cube.units().to_string(),
            x: time_axis_values(cube),
            y: cube.data().iter().copied().collect(),
        })
    }
}

/// X values for a 1-D cube: the calendar year of each point when every point
/// falls in a different year (i.e. annual data), otherwise the raw time values.
fn time_axis_values(cube: &Cube) -> Vec<f64> {
    match cube.years() {
        Ok(years) if years.iter().all_unique() => years.into_iter().map(f64::from).collect(),
        Ok(_) => cube.coords()[0].points.to_vec(),
        Err(e) => {
            log::debug!("Plotting raw time values for {}: {e}", cube.name());
            cube.coords()[0].points.to_vec()
        }
    }
}

fn write_chart_data(chart: &Chart, path: &Path) -> Result<(), OutputWriteError> {
    let f = std::fs::File::create(path).map_err(|e| OutputWriteError::write(path, e))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(f), chart)
        .map_err(|e| OutputWriteError::write(path, e))
}

/// Compute, for each series from a perturbation experiment, its difference
/// from the reference experiment run of the same model.
///
/// The reference for a series is the one with the same short name and level
/// whose ensemble maps to the same model and to `reference_experiment`. Series
/// with no such reference are skipped with a warning. The result keeps the
/// perturbation series' metadata.
pub fn difference_series(series: &[ReducedVariable], ensembles: &EnsembleTable, reference_experiment: &str)
-> Result<Vec<ReducedVariable>, PlotError> {
    let mut differences = Vec::new();
    for pert in series {
        let meta = pert.metadata();
        let info = ensembles.lookup(&meta.ensemble)?;
        if info.experiment == reference_experiment {
            continue;
        }

        let mut reference = None;
        for cand in series {
            let cmeta = cand.metadata();
            if cmeta.short_name != meta.short_name || cmeta.level != meta.level {
                continue;
            }
            let cinfo = ensembles.lookup(&cmeta.ensemble)?;
            if cinfo.model == info.model && cinfo.experiment == reference_experiment {
                reference = Some(cand);
                break;
            }
        }

        let Some(reference) = reference else {
            log::warn!(
                "No {reference_experiment} run of {} found for {} from {} ({}), it will not be differenced",
                info.model, meta.short_name, meta.dataset, meta.ensemble
            );
            continue;
        };

        if reference.cube().shape() != pert.cube().shape() {
            return Err(ShapeMismatchError::new(pert.cube().shape(), reference.cube().shape()).into());
        }
        let mut cube = pert.cube().clone();
        cube.data.zip_mut_with(reference.cube().data(), |p, &r| *p -= r);
        differences.push(ReducedVariable::new(meta.clone(), cube));
    }
    Ok(differences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cube::Coord, ensemble::EnsembleInfo, metadata::tests::record};
    use ndarray::{array, Array1, Array3};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRenderer {
        charts: RefCell<Vec<(PathBuf, Chart)>>,
    }

    impl SeriesRenderer for RecordingRenderer {
        fn render(&self, chart: &Chart, path: &Path) -> Result<(), OutputWriteError> {
            self.charts.borrow_mut().push((path.to_owned(), chart.clone()));
            Ok(())
        }
    }

    fn series(dataset: &str, short_name: &str, ensemble: &str, values: Array1<f64>) -> ReducedVariable {
        let n = values.len();
        let time = Coord::new("time", Array1::from_iter((0..n).map(|i| 182.5 + 365.0 * i as f64)))
            .with_units("days since 2000-01-01")
            .with_calendar("noleap");
        let cube = Cube::new(short_name, "K", vec![time], values.into_dyn()).unwrap();
        ReducedVariable::new(record(dataset, short_name, ensemble), cube)
    }

    fn config(dir: &Path) -> PlotConfig {
        let mut config = PlotConfig::new(dir.to_owned());
        config.write_data = false;
        config
    }

    #[test]
    fn test_one_chart_per_short_name() {
        let tmp = tempfile::tempdir().unwrap();
        let emitter = PlotEmitter::with_renderer(config(tmp.path()), RecordingRenderer::default());
        let input = vec![
            series("GISS-E2-1-G", "tas", "r1i1p5f101", array![280.0, 281.0, 282.0]),
            series("GISS-E2-1-G", "pr", "r1i1p5f101", array![1.0, 2.0, 3.0]),
            series("CESM2", "tas", "r1i1p1f1", array![279.0, 280.0, 281.0]),
        ];

        let paths = emitter.emit(&input).unwrap();
        assert_eq!(paths, vec![tmp.path().join("time_series-tas.html"), tmp.path().join("time_series-pr.html")]);

        let charts = emitter.renderer().charts.borrow();
        assert_eq!(charts.len(), 2);
        let (_, tas) = &charts[0];
        assert_eq!(tas.title, "Annual Average - tas");
        assert_eq!(tas.y_label, "Area average (K)");
        assert_eq!(tas.x_label, "Years");
        let labels: Vec<_> = tas.series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["GISS-E2-1-G", "CESM2"]);
        assert_eq!(tas.series[0].x, vec![2000.0, 2001.0, 2002.0]);
        assert_eq!(tas.series[1].y, vec![279.0, 280.0, 281.0]);
        assert_eq!(charts[1].1.series.len(), 1);
    }

    #[test]
    fn test_experiment_labels() {
        let tmp = tempfile::tempdir().unwrap();
        let emitter = PlotEmitter::with_renderer(config(tmp.path()), RecordingRenderer::default())
            .label_by(SeriesLabel::Experiment, EnsembleTable::default());
        let input = vec![
            series("GISS-E2-1-G", "tas", "r1i1p5f101", array![280.0, 281.0]),
            series("GISS-E2-1-G", "tas", "r1i1p5f103", array![279.0, 280.0]),
        ];
        emitter.emit(&input).unwrap();
        let charts = emitter.renderer().charts.borrow();
        let labels: Vec<_> = charts[0].1.series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["GISS-E2-1-G_season-so2", "GISS-E2-1-G-nudge_reference"]);

        let unknown = vec![series("CESM2", "tas", "r1i1p1f1", array![1.0])];
        assert!(matches!(emitter.emit(&unknown), Err(PlotError::Label(_))));
    }

    #[test]
    fn test_plotly_writes_html_and_data() {
        let tmp = tempfile::tempdir().unwrap();
        let out_dir = tmp.path().join("plots").join("nested");
        let mut config = PlotConfig::new(out_dir.clone());
        config.filename_template = "{}_timeseries.html".to_string();
        let emitter = PlotEmitter::new(config);

        let paths = emitter.emit(&[series("GISS-E2-1-G", "tas", "r1i1p5f101", array![280.0, f64::NAN])]).unwrap();
        assert_eq!(paths, vec![out_dir.join("tas_timeseries.html")]);
        let html = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(html.contains("Annual Average - tas"));

        let data: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(out_dir.join("tas_timeseries.json")).unwrap()
        ).unwrap();
        assert_eq!(data["series"][0]["label"], "GISS-E2-1-G");
        assert_eq!(data["series"][0]["y"][0], 280.0);
        assert!(data["series"][0]["y"][1].is_null());
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.filename_template = "time_series-{}.bmp".to_string();
        let err = PlotEmitter::new(config)
            .emit(&[series("GISS-E2-1-G", "tas", "r1i1p5f101", array![280.0])])
            .unwrap_err();
        assert!(matches!(err, PlotError::Write(OutputWriteError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_output_directory_not_creatable() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        std::fs::write(&blocker, "").unwrap();
        let out_dir = blocker.join("plots");

        let err = PlotEmitter::with_renderer(config(&out_dir), RecordingRenderer::default())
            .emit(&[series("GISS-E2-1-G", "tas", "r1i1p5f101", array![280.0])])
            .unwrap_err();
        assert!(matches!(err, PlotError::Write(OutputWriteError::CreateDir { ref path, .. }) if path == &out_dir));
    }

    #[test]
    fn test_data_file_not_writable() {
        let tmp = tempfile::tempdir().unwrap();
        let data_path = tmp.path().join("time_series-tas.json");
        std::fs::create_dir(&data_path).unwrap();
        let mut config = config(tmp.path());
        config.write_data = true;

        let err = PlotEmitter::with_renderer(config, RecordingRenderer::default())
            .emit(&[series("GISS-E2-1-G", "tas", "r1i1p5f101", array![280.0])])
            .unwrap_err();
        assert!(matches!(err, PlotError::Write(OutputWriteError::Write { ref path, .. }) if path == &data_path));
    }

    #[test]
    fn test_not_a_time_series() {
        let tmp = tempfile::tempdir().unwrap();
        let cube = crate::cube::tests::tll_cube("tas", Array3::zeros((2, 2, 2)));
        let var = ReducedVariable::new(record("GISS-E2-1-G", "tas", "r1i1p5f101"), cube);
        let err = PlotEmitter::with_renderer(config(tmp.path()), RecordingRenderer::default())
            .emit(&[var])
            .unwrap_err();
        assert!(matches!(err, PlotError::NotATimeSeries { ref shape, .. } if shape == &[2, 2, 2]));
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let out_dir = tmp.path().join("never");
        let emitter = PlotEmitter::with_renderer(config(&out_dir), RecordingRenderer::default());
        assert!(emitter.emit(&[]).unwrap().is_empty());
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_difference_series() {
        let table = EnsembleTable::default();
        let input = vec![
            series("GISS-E2-1-G", "tas", "r1i1p5f101", array![281.0, 283.0]),
            series("GISS-E2-1-G", "tas", "r1i1p5f102", array![280.0, 280.5]),
            // nudged season-so2 run has no nudged reference here
            series("GISS-E2-1-G", "tas", "r1i1p5f104", array![290.0, 290.0]),
        ];
        let diffs = difference_series(&input, &table, "reference").unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].metadata().ensemble, "r1i1p5f101");
        assert_eq!(diffs[0].cube().data(), &array![1.0, 2.5].into_dyn());
        // inputs untouched
        assert_eq!(input[0].cube().data(), &array![281.0, 283.0].into_dyn());
    }

    #[test]
    fn test_difference_errors() {
        let mut table = EnsembleTable::empty();
        table.insert("r1", EnsembleInfo::new("M", "reference"));
        table.insert("r2", EnsembleInfo::new("M", "perturbed"));

        let input = vec![
            series("M", "tas", "r2", array![1.0, 2.0, 3.0]),
            series("M", "tas", "r1", array![1.0, 2.0]),
        ];
        let err = difference_series(&input, &table, "reference").unwrap_err();
        assert!(matches!(err, PlotError::Shape(_)));

        let unknown = vec![series("M", "tas", "r3", array![1.0])];
        assert!(matches!(difference_series(&unknown, &table, "reference"), Err(PlotError::Label(_))));
    }

    #[test]
    fn test_templates() {
        assert_eq!(fill_template("time_series-{}.html", "cVeg_grid"), "time_series-cVeg_grid.html");
        assert_eq!(fill_template("Annual Average - {}", "tas"), "Annual Average - tas");
    }
}
