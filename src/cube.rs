//! A minimal labeled array ("cube") for gridded model output.
//!
//! A [`Cube`] holds an N-dimensional `f64` array along with one coordinate per
//! axis (time, latitude, longitude and possibly a vertical level) and the
//! variable's names and units. It only carries what the reductions and the
//! grid-area correction need; anything else in the source file is dropped
//! on load.
use ndarray::{Array1, ArrayD};
use tabled::{settings::Style, Table, Tabled};

/// Names recognized as the latitude axis
pub const LATITUDE_NAMES: &[&str] = &["latitude", "lat"];
/// Names recognized as the longitude axis
pub const LONGITUDE_NAMES: &[&str] = &["longitude", "lon"];
/// Names recognized as the time axis
pub const TIME_NAMES: &[&str] = &["time"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CubeError {
    #[error("Cube '{name}' has {ndim} dimensions but {ncoord} coordinates were given")]
    CoordCountMismatch { name: String, ndim: usize, ncoord: usize },
    #[error("Coordinate '{coord}' has {npoints} points, but axis {axis} of cube '{name}' has length {len}")]
    CoordLengthMismatch { name: String, coord: String, axis: usize, npoints: usize, len: usize },
}

/// The coordinate values along one axis of a cube.
#[derive(Debug, Clone, PartialEq)]
pub struct Coord {
    pub name: String,
    pub units: Option<String>,
    /// CF calendar, only meaningful for time coordinates.
    pub calendar: Option<String>,
    pub points: Array1<f64>,
}

impl Coord {
    pub fn new<S: ToString>(name: S, points: Array1<f64>) -> Self {
        Self { name: name.to_string(), units: None, calendar: None, points }
    }

    pub fn with_units<S: ToString>(mut self, units: S) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn with_calendar<S: ToString>(mut self, calendar: S) -> Self {
        self.calendar = Some(calendar.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether this coordinate's name matches any of `aliases`, ignoring case.
    pub fn is_named(&self, aliases: &[&str]) -> bool {
        aliases.iter().any(|a| self.name.eq_ignore_ascii_case(a))
    }
}

/// A gridded field with one coordinate per axis plus name and units.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    var_name: String,
    standard_name: Option<String>,
    long_name: Option<String>,
    units: String,
    coords: Vec<Coord>,
    pub(crate) data: ArrayD<f64>,
}

impl Cube {
    /// Create a new cube, checking that there is exactly one coordinate per
    /// axis of `data` and that each has as many points as its axis is long.
    pub fn new<S: ToString, U: ToString>(var_name: S, units: U, coords: Vec<Coord>, data: ArrayD<f64>) -> Result<Self, CubeError> {
        let var_name = var_name.to_string();
        check_coords(&var_name, &coords, data.shape())?;
        Ok(Self { var_name, standard_name: None, long_name: None, units: units.to_string(), coords, data })
    }

    pub fn with_standard_name<S: ToString>(mut self, standard_name: S) -> Self {
        self.standard_name = Some(standard_name.to_string());
        self
    }

    pub fn with_long_name<S: ToString>(mut self, long_name: S) -> Self {
        self.long_name = Some(long_name.to_string());
        self
    }

    pub fn with_var_name<S: ToString>(mut self, var_name: S) -> Self {
        self.var_name = var_name.to_string();
        self
    }

    /// The best available name: the standard name, else the long name, else the variable name.
    pub fn name(&self) -> &str {
        self.standard_name.as_deref()
            .or(self.long_name.as_deref())
            .unwrap_or(&self.var_name)
    }

    pub fn var_name(&self) -> &str {
        &self.var_name
    }

    pub fn standard_name(&self) -> Option<&str> {
        self.standard_name.as_deref()
    }

    pub fn long_name(&self) -> Option<&str> {
        self.long_name.as_deref()
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Index of the first axis whose coordinate matches one of `aliases`.
    pub fn axis_of(&self, aliases: &[&str]) -> Option<usize> {
        self.coords.iter().position(|c| c.is_named(aliases))
    }

    /// The coordinate for the first axis matching one of `aliases`.
    pub fn coord(&self, aliases: &[&str]) -> Option<&Coord> {
        self.coords.iter().find(|c| c.is_named(aliases))
    }

    /// Calendar year of each time step, decoded from the time coordinate's units and calendar.
    pub fn years(&self) -> Result<Vec<i32>, crate::stats::ReduceError> {
        crate::stats::time_years(self)
    }

    /// Build a cube sharing this one's names and units, but with new coordinates and data.
    pub(crate) fn derived(&self, coords: Vec<Coord>, data: ArrayD<f64>) -> Result<Self, CubeError> {
        check_coords(&self.var_name, &coords, data.shape())?;
        Ok(Self {
            var_name: self.var_name.clone(),
            standard_name: self.standard_name.clone(),
            long_name: self.long_name.clone(),
            units: self.units.clone(),
            coords,
            data,
        })
    }

    /// Return a human readable summary of the cube: its name, shape and a table of coordinates.
    pub fn summary(&self) -> String {
        let rows = self.coords.iter().map(|c| CoordRow {
            name: c.name.clone(),
            length: c.len(),
            units: c.units.clone().unwrap_or_default(),
            first: c.points.iter().next().map(|v| format!("{v}")).unwrap_or_default(),
            last: c.points.iter().next_back().map(|v| format!("{v}")).unwrap_or_default(),
        });
        let mut table = Table::new(rows);
        table.with(Style::blank());
        format!("{} / ({}) {:?}\n{table}", self.name(), self.units, self.shape())
    }
}

#[derive(Tabled)]
struct CoordRow {
    #[tabled(rename = "coordinate")]
    name: String,
    length: usize,
    units: String,
    first: String,
    last: String,
}

fn check_coords(name: &str, coords: &[Coord], shape: &[usize]) -> Result<(), CubeError> {
    if coords.len() != shape.len() {
        return Err(CubeError::CoordCountMismatch { name: name.to_string(), ndim: shape.len(), ncoord: coords.len() });
    }

    for (axis, (coord, &len)) in coords.iter().zip(shape).enumerate() {
        if coord.len() != len {
            return Err(CubeError::CoordLengthMismatch {
                name: name.to_string(),
                coord: coord.name.clone(),
                axis,
                npoints: coord.len(),
                len,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("No cube named '{0}' was found")]
    NotFound(String),
    #[error("{n} cubes named '{name}' were found, expected one")]
    Ambiguous { name: String, n: usize },
}

/// An ordered collection of cubes that can be searched by name.
#[derive(Debug, Clone, Default)]
pub struct CubeList(Vec<Cube>);

impl CubeList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, cube: Cube) {
        self.0.push(cube)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cube> {
        self.0.iter()
    }

    /// Find the single cube whose [`Cube::name`] or variable name is `name`.
    ///
    /// Returns `Ok(None)` if there is no such cube and an error if there are several.
    pub fn find(&self, name: &str) -> Result<Option<&Cube>, ExtractError> {
        let mut matches = self.0.iter().filter(|c| c.name() == name || c.var_name() == name);
        let first = matches.next();
        let n_more = matches.count();
        if n_more > 0 {
            return Err(ExtractError::Ambiguous { name: name.to_string(), n: n_more + 1 });
        }
        Ok(first)
    }

    /// Like [`CubeList::find`], but a missing cube is also an error.
    pub fn extract_strict(&self, name: &str) -> Result<&Cube, ExtractError> {
        self.find(name)?.ok_or_else(|| ExtractError::NotFound(name.to_string()))
    }
}

impl From<Vec<Cube>> for CubeList {
    fn from(value: Vec<Cube>) -> Self {
        Self(value)
    }
}

impl FromIterator<Cube> for CubeList {
    fn from_iter<T: IntoIterator<Item = Cube>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
