//! Run configuration for the diagnostic pipeline.
//!
//! The configuration is a [TOML](https://toml.io/en/) file. Only two keys are
//! required, the directory to write plots to and the metadata document listing
//! the input files:
//!
//! ```toml
//! plot_dir = "plots"
//! metadata_file = "work/metadata.json"
//! ```
//!
//! Every other key has a default; see `docs/configuration.md` for the full list.
//! After the file is read, any environment variable starting with `EMIP_`
//! overrides the key of the same (lower case) name, e.g. `EMIP_WRITE_DATA=false`.
//! Nested keys use a double underscore: `EMIP_GRID_CORRECTION__FRACTION_SHORT_NAME`.
//!
//! Unknown keys are an error, as are file name and title templates that do not
//! contain exactly one `{}` placeholder for the variable short name.
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::{
    ensemble::EnsembleTable,
    plotting::{
        PlotConfig, SeriesLabel, DEFAULT_DIFFERENCE_FILENAME_TEMPLATE, DEFAULT_DIFFERENCE_TITLE_TEMPLATE,
        DEFAULT_FILENAME_TEMPLATE, DEFAULT_TITLE_TEMPLATE,
    },
    stats::Statistic,
};

/// Prefix of environment variables that override configuration keys
pub const ENV_PREFIX: &str = "EMIP_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("Could not load configuration: {0}")]
    Figment(#[from] figment::Error),
    #[error("'{field}' must contain exactly one '{{}}' placeholder for the variable name, got '{value}'")]
    BadTemplate { field: &'static str, value: String },
    #[error("grid_correction.variables is empty, remove the [grid_correction] section to disable correction")]
    NoCorrectedVariables,
}

/// Whether plotted series are annual or at the input time resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimeInterval {
    #[default]
    Annual,
    Monthly,
}

impl TimeInterval {
    pub fn default_axis_label(&self) -> &'static str {
        match self {
            Self::Annual => "Years",
            Self::Monthly => "Time",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridCorrectionConfig {
    /// Short names of the variables to multiply by the land area fraction.
    pub variables: Vec<String>,
    /// Short name of the land area fraction variable among the inputs.
    #[serde(default = "default_fraction_short_name")]
    pub fraction_short_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticConfig {
    pub plot_dir: PathBuf,
    pub metadata_file: PathBuf,
    /// File to copy log messages into, in addition to stderr.
    #[serde(default)]
    pub run_log: Option<PathBuf>,

    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    #[serde(default = "default_title_template")]
    pub title_template: String,
    #[serde(default)]
    pub time_interval: TimeInterval,
    #[serde(default)]
    pub time_axis_label: Option<String>,
    #[serde(default = "default_true")]
    pub write_data: bool,

    #[serde(default)]
    pub statistic: Statistic,
    #[serde(default)]
    pub label_by: SeriesLabel,

    #[serde(default)]
    pub difference_plots: bool,
    #[serde(default = "default_difference_filename_template")]
    pub difference_filename_template: String,
    #[serde(default = "default_difference_title_template")]
    pub difference_title_template: String,
    #[serde(default = "default_reference_experiment")]
    pub reference_experiment: String,

    #[serde(default)]
    pub grid_correction: Option<GridCorrectionConfig>,

    #[serde(default)]
    pub ensembles: Option<EnsembleTable>,
}

impl DiagnosticConfig {
    /// Load the configuration from a TOML file, apply `EMIP_` environment overrides and validate it.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_owned()));
        }
        let figment = Figment::from(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Parse and validate a configuration from a TOML string. Environment
    /// overrides are not applied.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::from(Toml::string(s)))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_template("filename_template", &self.filename_template)?;
        check_template("title_template", &self.title_template)?;
        if self.difference_plots {
            check_template("difference_filename_template", &self.difference_filename_template)?;
            check_template("difference_title_template", &self.difference_title_template)?;
        }
        if self.grid_correction.as_ref().is_some_and(|gc| gc.variables.is_empty()) {
            return Err(ConfigError::NoCorrectedVariables);
        }
        Ok(())
    }

    pub fn time_axis_label(&self) -> &str {
        self.time_axis_label.as_deref()
            .unwrap_or_else(|| self.time_interval.default_axis_label())
    }

    /// The ensemble table to use, falling back to the built-in table if none
    /// (or an empty one) was configured.
    pub fn ensemble_table(&self) -> EnsembleTable {
        match &self.ensembles {
            Some(table) if !table.is_empty() => table.clone(),
            _ => EnsembleTable::default(),
        }
    }

    pub fn plot_config(&self) -> PlotConfig {
        PlotConfig {
            output_directory: self.plot_dir.clone(),
            filename_template: self.filename_template.clone(),
            title_template: self.title_template.clone(),
            time_axis_label: self.time_axis_label().to_string(),
            write_data: self.write_data,
        }
    }

    pub fn difference_plot_config(&self) -> PlotConfig {
        PlotConfig {
            filename_template: self.difference_filename_template.clone(),
            title_template: self.difference_title_template.clone(),
            ..self.plot_config()
        }
    }
}

fn check_template(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.matches("{}").count() == 1 {
        Ok(())
    } else {
        Err(ConfigError::BadTemplate { field, value: value.to_string() })
    }
}

/// Helper function for serde default attributes
fn default_true() -> bool {
    true
}

fn default_filename_template() -> String {
    DEFAULT_FILENAME_TEMPLATE.to_string()
}

fn default_title_template() -> String {
    DEFAULT_TITLE_TEMPLATE.to_string()
}

fn default_difference_filename_template() -> String {
    DEFAULT_DIFFERENCE_FILENAME_TEMPLATE.to_string()
}

fn default_difference_title_template() -> String {
    DEFAULT_DIFFERENCE_TITLE_TEMPLATE.to_string()
}

fn default_reference_experiment() -> String {
    "reference".to_string()
}

fn default_fraction_short_name() -> String {
    "sftlf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fenced_blocks;

    const MINIMAL: &str = r#"
        plot_dir = "plots"
        metadata_file = "metadata.json"
    "#;

    #[test]
    fn test_defaults() {
        let cfg = DiagnosticConfig::from_toml_str(MINIMAL).expect("deserialization should not fail");
        assert_eq!(cfg.plot_dir, PathBuf::from("plots"));
        assert_eq!(cfg.filename_template, "time_series-{}.html");
        assert_eq!(cfg.title_template, "Annual Average - {}");
        assert_eq!(cfg.time_interval, TimeInterval::Annual);
        assert_eq!(cfg.time_axis_label(), "Years");
        assert!(cfg.write_data);
        assert_eq!(cfg.statistic, Statistic::Mean);
        assert_eq!(cfg.label_by, SeriesLabel::Dataset);
        assert!(!cfg.difference_plots);
        assert_eq!(cfg.reference_experiment, "reference");
        assert!(cfg.grid_correction.is_none());
        assert!(cfg.run_log.is_none());
        assert_eq!(cfg.ensemble_table(), EnsembleTable::default());

        let plot = cfg.plot_config();
        assert_eq!(plot.chart_path("tas"), PathBuf::from("plots").join("time_series-tas.html"));
        assert_eq!(cfg.difference_plot_config().chart_path("tas"), PathBuf::from("plots").join("time_series-difference-tas.html"));
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
            plot_dir = "/tmp/plots"
            metadata_file = "/tmp/metadata.json"
            run_log = "/tmp/emip.log"
            filename_template = "{}.png"
            title_template = "{} (monthly)"
            time_interval = "monthly"
            write_data = false
            statistic = "median"
            label_by = "experiment"

            [grid_correction]
            variables = ["cVeg", "cSoil"]

            [ensembles]
            r1i1p1f1 = { model = "CESM2", experiment = "reference" }
        "#;
        let cfg = DiagnosticConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(cfg.time_axis_label(), "Time");
        assert_eq!(cfg.statistic, Statistic::Median);
        assert_eq!(cfg.label_by, SeriesLabel::Experiment);
        assert!(!cfg.plot_config().write_data);
        let gc = cfg.grid_correction.as_ref().unwrap();
        assert_eq!(gc.variables, ["cVeg", "cSoil"]);
        assert_eq!(gc.fraction_short_name, "sftlf");
        let table = cfg.ensemble_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("r1i1p1f1").unwrap().model, "CESM2");
    }

    #[test]
    fn test_empty_ensembles_use_builtin() {
        let cfg = DiagnosticConfig::from_toml_str(&format!("{MINIMAL}\n[ensembles]\n")).unwrap();
        assert_eq!(cfg.ensemble_table(), EnsembleTable::default());
    }

    #[test]
    fn test_invalid_configs() {
        let missing = DiagnosticConfig::from_toml_str(r#"plot_dir = "plots""#);
        assert!(matches!(missing, Err(ConfigError::Figment(_))));

        let unknown = DiagnosticConfig::from_toml_str(&format!("{MINIMAL}\nplot_type = \"bar\""));
        assert!(matches!(unknown, Err(ConfigError::Figment(_))));

        let no_slot = DiagnosticConfig::from_toml_str(&format!("{MINIMAL}\nfilename_template = \"series.html\""));
        assert!(matches!(no_slot, Err(ConfigError::BadTemplate { field: "filename_template", .. })));

        let two_slots = DiagnosticConfig::from_toml_str(&format!("{MINIMAL}\ntitle_template = \"{{}} and {{}}\""));
        assert!(matches!(two_slots, Err(ConfigError::BadTemplate { field: "title_template", .. })));

        let bad_stat = DiagnosticConfig::from_toml_str(&format!("{MINIMAL}\nstatistic = \"mode\""));
        assert!(matches!(bad_stat, Err(ConfigError::Figment(_))));

        let no_vars = DiagnosticConfig::from_toml_str(&format!("{MINIMAL}\n[grid_correction]\nvariables = []"));
        assert!(matches!(no_vars, Err(ConfigError::NoCorrectedVariables)));

        let not_found = DiagnosticConfig::from_toml_file(Path::new("/does/not/exist/emip.toml"));
        assert!(matches!(not_found, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_environment_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("emip.toml", MINIMAL)?;
            jail.set_env("EMIP_WRITE_DATA", "false");
            jail.set_env("EMIP_PLOT_DIR", "elsewhere");
            let cfg = DiagnosticConfig::from_toml_file(Path::new("emip.toml"))
                .map_err(|e| e.to_string())?;
            assert!(!cfg.write_data);
            assert_eq!(cfg.plot_dir, PathBuf::from("elsewhere"));
            Ok(())
        });
    }

    #[test]
    fn test_documentation_examples() {
        let doc = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("docs").join("configuration.md");
        let blocks = fenced_blocks("toml", &doc);
        assert!(!blocks.is_empty());
        for (i, block) in blocks.iter().enumerate() {
            if let Err(e) = DiagnosticConfig::from_toml_str(block) {
                panic!("TOML example #{} in {} is not a valid configuration: {e}", i + 1, doc.display());
            }
        }
    }
}
