//! Reading cubes from disk, and writing them back out.
//!
//! Two formats are supported, chosen by file extension:
//!
//! - `.json`: a self-describing JSON document (see [`CubeDocument`]), always available.
//!   Missing values are written as `null` and read back as NaN.
//! - `.nc`/`.nc4`: netCDF files, only when the crate is built with the `netcdf` feature.
//!
//! A JSON cube looks like:
//!
//! ```json
//! {
//!   "var_name": "tas",
//!   "standard_name": "air_temperature",
//!   "units": "K",
//!   "coords": [
//!     {"name": "time", "units": "days since 2000-01-01", "calendar": "standard", "points": [15.5, 45.0]},
//!     {"name": "latitude", "units": "degrees_north", "points": [-45.0, 45.0]},
//!     {"name": "longitude", "units": "degrees_east", "points": [0.0, 180.0]}
//!   ],
//!   "data": [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
//! }
//! ```
//!
//! `data` is the flattened array in row-major order, with the axes in the order
//! of `coords`.
use std::path::Path;

use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::{
    cube::{Coord, Cube},
    error::{DataLoadError, OutputWriteError},
};

/// The on-disk formats a cube can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFormat {
    Json,
    NetCdf,
}

impl CubeFormat {
    /// Infer the format from a file's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "nc" | "nc4" => Some(Self::NetCdf),
            _ => None,
        }
    }
}

/// Serialized form of a [`Cube`]
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CubeDocument {
    pub var_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    pub units: String,
    pub coords: Vec<CoordDocument>,
    pub data: Vec<Option<f64>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
    pub points: Vec<f64>,
}

impl CubeDocument {
    fn into_cube(self, path: &Path) -> Result<Cube, DataLoadError> {
        let shape: Vec<usize> = self.coords.iter().map(|c| c.points.len()).collect();
        let values: Vec<f64> = self.data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let nvalues = values.len();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
            DataLoadError::malformed(path, format!("{nvalues} data values do not fill a grid of shape {shape:?}"))
        })?;

        let coords = self.coords.into_iter().map(|c| Coord {
            name: c.name,
            units: c.units,
            calendar: c.calendar,
            points: Array1::from(c.points),
        }).collect();

        let mut cube = Cube::new(self.var_name, self.units, coords, data)
            .map_err(|e| DataLoadError::malformed(path, e))?;
        if let Some(name) = self.standard_name {
            cube = cube.with_standard_name(name);
        }
        if let Some(name) = self.long_name {
            cube = cube.with_long_name(name);
        }
        Ok(cube)
    }
}

impl From<&Cube> for CubeDocument {
    fn from(cube: &Cube) -> Self {
        Self {
            var_name: cube.var_name().to_string(),
            standard_name: cube.standard_name().map(|s| s.to_string()),
            long_name: cube.long_name().map(|s| s.to_string()),
            units: cube.units().to_string(),
            coords: cube.coords().iter().map(|c| CoordDocument {
                name: c.name.clone(),
                units: c.units.clone(),
                calendar: c.calendar.clone(),
                points: c.points.to_vec(),
            }).collect(),
            data: cube.data().iter().map(|&v| if v.is_nan() { None } else { Some(v) }).collect(),
        }
    }
}

/// Load a cube from `path`.
///
/// `var_name` selects which variable to read from formats that can hold
/// several (netCDF). If it is `None`, or no variable has that name, the
/// file's main data variable is used.
pub fn load_cube(path: &Path, var_name: Option<&str>) -> Result<Cube, DataLoadError> {
    let format = CubeFormat::from_path(path).ok_or_else(|| {
        DataLoadError::unsupported(path, "file extension is not one of .json, .nc, or .nc4")
    })?;

    let cube = match format {
        CubeFormat::Json => load_json_cube(path)?,
        CubeFormat::NetCdf => load_netcdf_cube(path, var_name)?,
    };
    log::debug!("Loaded {} from {}, shape = {:?}", cube.name(), path.display(), cube.shape());
    Ok(cube)
}

/// Parse a JSON cube document; `path` is only used in error messages.
pub fn cube_from_json_str(s: &str, path: &Path) -> Result<Cube, DataLoadError> {
    let doc: CubeDocument = serde_json::from_str(s)
        .map_err(|e| DataLoadError::malformed(path, e))?;
    doc.into_cube(path)
}

fn load_json_cube(path: &Path) -> Result<Cube, DataLoadError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DataLoadError::could_not_read(path, e))?;
    cube_from_json_str(&contents, path)
}

#[cfg(feature = "netcdf")]
fn load_netcdf_cube(path: &Path, var_name: Option<&str>) -> Result<Cube, DataLoadError> {
    nc::load(path, var_name)
}

#[cfg(not(feature = "netcdf"))]
fn load_netcdf_cube(path: &Path, _var_name: Option<&str>) -> Result<Cube, DataLoadError> {
    Err(DataLoadError::unsupported(path, "this build does not include netCDF support (enable the `netcdf` feature)"))
}

/// Write `cube` as a JSON cube document.
pub fn save_cube(cube: &Cube, path: &Path) -> Result<(), OutputWriteError> {
    if CubeFormat::from_path(path) != Some(CubeFormat::Json) {
        return Err(OutputWriteError::UnsupportedFormat {
            path: path.to_owned(),
            reason: "cubes can only be saved as .json".to_string(),
        });
    }

    let doc = CubeDocument::from(cube);
    let f = std::fs::File::create(path).map_err(|e| OutputWriteError::write(path, e))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(f), &doc)
        .map_err(|e| OutputWriteError::write(path, e))?;
    Ok(())
}

#[cfg(feature = "netcdf")]
mod nc {
    use std::path::Path;

    use ndarray::{Array1, ArrayD};
    use netcdf::{AttributeValue, Extents};

    use crate::{cube::{Coord, Cube}, error::DataLoadError};

    pub(super) fn load(path: &Path, var_name: Option<&str>) -> Result<Cube, DataLoadError> {
        let file = netcdf::open(path).map_err(|e| DataLoadError::could_not_read(path, e))?;

        let var = match var_name.and_then(|name| file.variable(name)) {
            Some(v) => v,
            None => find_data_variable(&file, path)?,
        };

        let mut data: ArrayD<f64> = var.get::<f64, _>(Extents::All)
            .map_err(|e| DataLoadError::malformed(path, format!("could not read variable {}: {e}", var.name())))?;
        apply_fill_and_scaling(&var, &mut data);

        let mut coords = Vec::with_capacity(var.dimensions().len());
        for dim in var.dimensions() {
            let dim_name = dim.name();
            let coord = match file.variable(&dim_name) {
                Some(cvar) => {
                    let points = cvar.get::<f64, _>(Extents::All)
                        .map_err(|e| DataLoadError::malformed(path, format!("could not read coordinate {dim_name}: {e}")))?;
                    let points = points.into_shape(dim.len())
                        .map_err(|e| DataLoadError::malformed(path, format!("coordinate {dim_name} is not 1-D: {e}")))?;
                    Coord {
                        name: string_attr(&cvar, "standard_name").unwrap_or(dim_name),
                        units: string_attr(&cvar, "units"),
                        calendar: string_attr(&cvar, "calendar"),
                        points,
                    }
                },
                None => Coord::new(dim_name, Array1::from_iter((0..dim.len()).map(|i| i as f64))),
            };
            coords.push(coord);
        }

        let units = string_attr(&var, "units").unwrap_or_else(|| "1".to_string());
        let mut cube = Cube::new(var.name(), units, coords, data)
            .map_err(|e| DataLoadError::malformed(path, e))?;
        if let Some(name) = string_attr(&var, "standard_name") {
            cube = cube.with_standard_name(name);
        }
        if let Some(name) = string_attr(&var, "long_name") {
            cube = cube.with_long_name(name);
        }
        Ok(cube)
    }

    /// Pick the variable with the most dimensions that is not a coordinate or bounds variable.
    fn find_data_variable<'f>(file: &'f netcdf::File, path: &Path) -> Result<netcdf::Variable<'f>, DataLoadError> {
        let dim_names: Vec<String> = file.dimensions().map(|d| d.name()).collect();
        let mut candidates: Vec<netcdf::Variable<'f>> = file.variables()
            .filter(|v| {
                let name = v.name();
                !dim_names.contains(&name)
                    && !name.ends_with("_bnds")
                    && !name.ends_with("_bounds")
                    && !v.dimensions().is_empty()
            })
            .collect();

        let max_ndim = candidates.iter().map(|v| v.dimensions().len()).max()
            .ok_or_else(|| DataLoadError::malformed(path, "no data variable found"))?;
        candidates.retain(|v| v.dimensions().len() == max_ndim);
        if candidates.len() > 1 {
            let names: Vec<String> = candidates.iter().map(|v| v.name()).collect();
            return Err(DataLoadError::malformed(path, format!("several candidate data variables: {}", names.join(", "))));
        }
        candidates.pop().ok_or_else(|| DataLoadError::malformed(path, "no data variable found"))
    }

    fn apply_fill_and_scaling(var: &netcdf::Variable, data: &mut ArrayD<f64>) {
        let fills: Vec<f64> = ["_FillValue", "missing_value"].iter()
            .filter_map(|a| float_attr(var, a))
            .collect();
        let scale = float_attr(var, "scale_factor").unwrap_or(1.0);
        let offset = float_attr(var, "add_offset").unwrap_or(0.0);
        data.mapv_inplace(|v| {
            if fills.contains(&v) { f64::NAN } else { v * scale + offset }
        });
    }

    fn string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
        match var.attribute_value(name) {
            Some(Ok(AttributeValue::Str(s))) => Some(s),
            _ => None,
        }
    }

    fn float_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
        match var.attribute_value(name)? {
            Ok(AttributeValue::Double(v)) => Some(v),
            Ok(AttributeValue::Float(v)) => Some(v as f64),
            Ok(AttributeValue::Doubles(v)) => v.first().copied(),
            Ok(AttributeValue::Floats(v)) => v.first().map(|&x| x as f64),
            Ok(AttributeValue::Int(v)) => Some(v as f64),
            Ok(AttributeValue::Short(v)) => Some(v as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cube::{LATITUDE_NAMES, TIME_NAMES}, test_utils::test_data_dir};
    use approx::assert_abs_diff_eq;
    use std::path::PathBuf;

    #[test]
    fn test_load_json_fixture() {
        let path = test_data_dir().join("inputs").join("cubes").join("cVeg_grid_input.json");
        let cube = load_cube(&path, None).unwrap();
        assert_eq!(cube.name(), "vegetation_carbon_content");
        assert_eq!(cube.var_name(), "cVeg");
        assert_eq!(cube.units(), "kg m-2");
        assert_eq!(cube.shape(), &[1, 2, 2]);
        assert_eq!(cube.axis_of(TIME_NAMES), Some(0));
        assert_eq!(cube.coord(LATITUDE_NAMES).unwrap().units.as_deref(), Some("degrees_north"));
        assert_abs_diff_eq!(cube.data()[[0, 1, 1]], 40.0);
    }

    #[test]
    fn test_missing_values_become_nan() {
        let doc = r#"{"var_name": "x", "units": "1",
                      "coords": [{"name": "lat", "points": [0.0, 1.0]}],
                      "data": [1.5, null]}"#;
        let cube = cube_from_json_str(doc, Path::new("x.json")).unwrap();
        assert_abs_diff_eq!(cube.data()[[0]], 1.5);
        assert!(cube.data()[[1]].is_nan());
    }

    #[test]
    fn test_malformed_documents() {
        let p = Path::new("bad.json");
        let wrong_count = r#"{"var_name": "x", "units": "1",
                              "coords": [{"name": "lat", "points": [0.0, 1.0]}],
                              "data": [1.0, 2.0, 3.0]}"#;
        assert!(matches!(cube_from_json_str(wrong_count, p), Err(DataLoadError::Malformed { .. })));
        assert!(matches!(cube_from_json_str("[1, 2, 3]", p), Err(DataLoadError::Malformed { .. })));
    }

    #[test]
    fn test_unreadable_paths() {
        let missing = test_data_dir().join("does_not_exist.json");
        assert!(matches!(load_cube(&missing, None), Err(DataLoadError::CouldNotRead { .. })));

        let wrong_ext = PathBuf::from("cube.grib");
        assert!(matches!(load_cube(&wrong_ext, None), Err(DataLoadError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_save_and_reload() {
        let src = test_data_dir().join("inputs").join("cubes").join("cVeg_grid_input.json");
        let cube = load_cube(&src, None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("copy.json");
        save_cube(&cube, &out).unwrap();
        assert_eq!(load_cube(&out, None).unwrap(), cube);

        assert!(save_cube(&cube, &dir.path().join("copy.nc")).is_err());
    }
}
