//! Statistical reductions of cubes over their spatial and temporal axes.
use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, ArrayView1, Axis, IxDyn};
use serde::Deserialize;

use crate::{
    cube::{Coord, Cube, CubeError, LATITUDE_NAMES, LONGITUDE_NAMES, TIME_NAMES},
    time_units::{decode_years, TimeUnitsError},
};

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("Cube '{cube}' has no {axis} axis")]
    MissingAxis { cube: String, axis: &'static str },
    #[error("Cube '{cube}' has {ndim} axes, cannot collapse axis {axis}")]
    AxisOutOfRange { cube: String, axis: usize, ndim: usize },
    #[error("Cannot compute a statistic over the empty {axis} axis of cube '{cube}'")]
    EmptyAxis { cube: String, axis: String },
    #[error("Could not decode the time axis: {0}")]
    Time(#[from] TimeUnitsError),
    #[error("Could not rearrange the data of cube '{cube}': {reason}")]
    Layout { cube: String, reason: String },
    #[error(transparent)]
    Cube(#[from] CubeError),
}

/// The statistics that can be used to collapse one or more axes of a cube.
///
/// `std_dev` and `variance` are sample statistics (one degree of freedom is
/// removed), so they are NaN for a single value. Any NaN among the inputs
/// makes the result NaN.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize,
    strum::EnumString, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Statistic {
    #[default]
    Mean,
    Median,
    Min,
    Max,
    Sum,
    StdDev,
    Variance,
}

impl Statistic {
    /// Compute this statistic over `values`.
    pub fn compute(&self, values: ArrayView1<f64>) -> f64 {
        let n = values.len();
        match self {
            Statistic::Sum => values.sum(),
            _ if n == 0 => f64::NAN,
            Statistic::Mean => values.sum() / n as f64,
            Statistic::Min => values.iter().copied().fold(f64::INFINITY, nan_min),
            Statistic::Max => values.iter().copied().fold(f64::NEG_INFINITY, nan_max),
            Statistic::Median => median(values),
            Statistic::Variance => sample_variance(values),
            Statistic::StdDev => sample_variance(values).sqrt(),
        }
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

fn median(values: ArrayView1<f64>) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

fn sample_variance(values: ArrayView1<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.sum() / n as f64;
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    ss / (n - 1) as f64
}

/// Collapse the latitude and longitude axes of `cube` with `stat`.
///
/// The statistic is taken over the whole latitude/longitude plane at once, so
/// e.g. the median is the median of all grid cells, not a median of medians.
/// Every other axis (time, vertical level) is kept, as are the cube's name
/// and units. Grid cells are weighted equally.
pub fn area_statistics(cube: &Cube, stat: Statistic) -> Result<Cube, ReduceError> {
    let lat = cube.axis_of(LATITUDE_NAMES)
        .ok_or_else(|| ReduceError::MissingAxis { cube: cube.name().to_string(), axis: "latitude" })?;
    let lon = cube.axis_of(LONGITUDE_NAMES)
        .ok_or_else(|| ReduceError::MissingAxis { cube: cube.name().to_string(), axis: "longitude" })?;
    collapse_axes(cube, &[lat, lon], stat)
}

/// Collapse the given axes of `cube` together with `stat`, keeping the others in order.
pub fn collapse_axes(cube: &Cube, axes: &[usize], stat: Statistic) -> Result<Cube, ReduceError> {
    for &ax in axes {
        if ax >= cube.ndim() {
            return Err(ReduceError::AxisOutOfRange { cube: cube.name().to_string(), axis: ax, ndim: cube.ndim() });
        }
        if cube.shape()[ax] == 0 {
            return Err(ReduceError::EmptyAxis { cube: cube.name().to_string(), axis: cube.coords()[ax].name.clone() });
        }
    }

    let keep: Vec<usize> = (0..cube.ndim()).filter(|i| !axes.contains(i)).collect();
    let mut perm = keep.clone();
    perm.extend_from_slice(axes);

    let mut flat_shape: Vec<usize> = keep.iter().map(|&i| cube.shape()[i]).collect();
    flat_shape.push(axes.iter().map(|&i| cube.shape()[i]).product());

    let flat = cube.data()
        .view()
        .permuted_axes(perm)
        .as_standard_layout()
        .into_owned()
        .into_shape(IxDyn(&flat_shape))
        .map_err(|e| ReduceError::Layout { cube: cube.name().to_string(), reason: e.to_string() })?;
    let reduced = flat.map_axis(Axis(keep.len()), |lane| stat.compute(lane));

    let coords = keep.iter().map(|&i| cube.coords()[i].clone()).collect();
    Ok(cube.derived(coords, reduced)?)
}

/// Collapse the time axis of `cube` to one value per calendar year with `stat`.
///
/// Years are decoded from the time coordinate's CF units and calendar. Each
/// year's new time point is the mean of the time points that fell in it, and
/// years are ordered by their first appearance along the time axis.
pub fn annual_statistics(cube: &Cube, stat: Statistic) -> Result<Cube, ReduceError> {
    let t = cube.axis_of(TIME_NAMES)
        .ok_or_else(|| ReduceError::MissingAxis { cube: cube.name().to_string(), axis: "time" })?;
    let time = &cube.coords()[t];
    if time.is_empty() {
        return Err(ReduceError::EmptyAxis { cube: cube.name().to_string(), axis: time.name.clone() });
    }

    let mut years: IndexMap<i32, Vec<usize>> = IndexMap::new();
    for (i, year) in decode_years(time)?.into_iter().enumerate() {
        years.entry(year).or_default().push(i);
    }
    log::debug!("Collapsing {} time steps of {} into {} years", time.len(), cube.name(), years.len());

    let mut annual: Vec<ArrayD<f64>> = Vec::with_capacity(years.len());
    let mut points = Vec::with_capacity(years.len());
    for indices in years.values() {
        let subset = cube.data().select(Axis(t), indices);
        annual.push(subset.map_axis(Axis(t), |lane| stat.compute(lane)));
        points.push(indices.iter().map(|&i| time.points[i]).sum::<f64>() / indices.len() as f64);
    }

    let views: Vec<_> = annual.iter().map(|a| a.view()).collect();
    let data = ndarray::stack(Axis(t), &views)
        .map_err(|e| ReduceError::Layout { cube: cube.name().to_string(), reason: e.to_string() })?;

    let mut coords = cube.coords().to_vec();
    coords[t] = Coord { points: Array1::from(points), ..time.clone() };
    Ok(cube.derived(coords, data)?)
}

/// The calendar year of each point on the cube's time axis.
pub fn time_years(cube: &Cube) -> Result<Vec<i32>, ReduceError> {
    let time = cube.coord(TIME_NAMES)
        .ok_or_else(|| ReduceError::MissingAxis { cube: cube.name().to_string(), axis: "time" })?;
    Ok(decode_years(time)?)
}
