//! Grid-area correction of carbon pools given per unit land area.
//!
//! Carbon mass in vegetation, soil and litter (`cVeg`, `cSoil`, `cLitter`) is
//! reported relative to the land area of a grid cell. Multiplying by the land
//! area fraction (`sftlf`, in percent) makes the quantity relative to the whole
//! grid cell area, which is what spatial integration needs. This only changes
//! coastal cells.
//!
//! If no land area fraction is available the quantity is returned unchanged.
//! That is the only case handled leniently: a land area fraction on a different
//! grid is an error, as is failing to read a land area fraction file that was given.
use std::path::Path;

use crate::{
    cube::{Cube, CubeList, ExtractError},
    error::{DataLoadError, ShapeMismatchError},
    loader::load_cube,
};

/// Standard name of the land area fraction cube
pub const LAND_AREA_FRACTION: &str = "land_area_fraction";

#[derive(Debug, thiserror::Error)]
pub enum DeriveError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Shape(#[from] ShapeMismatchError),
    #[error(transparent)]
    Load(#[from] DataLoadError),
}

/// Multiply `mass` by `land_fraction / 100`, returning a new cube.
///
/// `land_fraction` must either have the same shape as `mass` or the shape of
/// its trailing (spatial) axes, in which case it is applied to every time step.
/// If `land_fraction` is `None`, the result is a copy of `mass`. The result keeps
/// the names and units of `mass`.
pub fn correct(mass: &Cube, land_fraction: Option<&Cube>) -> Result<Cube, ShapeMismatchError> {
    let mut corrected = mass.clone();
    correct_in_place(&mut corrected, land_fraction)?;
    Ok(corrected)
}

/// Same as [`correct`], but modifies `mass` directly.
///
/// On error `mass` is left unchanged.
pub fn correct_in_place(mass: &mut Cube, land_fraction: Option<&Cube>) -> Result<(), ShapeMismatchError> {
    let Some(fraction) = land_fraction else {
        return Ok(());
    };

    // Only whole leading axes may be broadcast; size-1 spatial axes must not stretch.
    let mismatch = || ShapeMismatchError::new(mass.shape(), fraction.shape());
    let (mass_shape, frac_shape) = (mass.shape(), fraction.shape());
    if frac_shape.len() > mass_shape.len() || frac_shape != &mass_shape[mass_shape.len() - frac_shape.len()..] {
        return Err(mismatch());
    }
    let fraction_data = fraction.data()
        .broadcast(mass.data.raw_dim())
        .ok_or_else(mismatch)?;
    mass.data.zip_mut_with(&fraction_data, |m, &f| *m *= f / 100.0);
    Ok(())
}

/// Derived variables that are a carbon pool corrected to grid cell area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
pub enum GridCorrectedVariable {
    #[strum(serialize = "cVeg_grid")]
    CVegGrid,
    #[strum(serialize = "cSoil_grid")]
    CSoilGrid,
    #[strum(serialize = "cLitter_grid")]
    CLitterGrid,
}

impl GridCorrectedVariable {
    /// Short name of the per-land-area variable this is derived from.
    pub fn mass_short_name(&self) -> &'static str {
        match self {
            Self::CVegGrid => "cVeg",
            Self::CSoilGrid => "cSoil",
            Self::CLitterGrid => "cLitter",
        }
    }

    /// Standard name of the per-land-area variable this is derived from.
    pub fn mass_standard_name(&self) -> &'static str {
        match self {
            Self::CVegGrid => "vegetation_carbon_content",
            Self::CSoilGrid => "soil_carbon_content",
            Self::CLitterGrid => "litter_carbon_content",
        }
    }

    /// Compute this variable from the cubes in `cubes`.
    ///
    /// The carbon pool is looked up by standard name, then by short name, and
    /// must be present exactly once. The land area fraction may be missing, in
    /// which case the carbon pool is returned as is (renamed).
    pub fn calculate(&self, cubes: &CubeList) -> Result<Cube, DeriveError> {
        let mass = match cubes.find(self.mass_standard_name())? {
            Some(cube) => cube,
            None => cubes.extract_strict(self.mass_short_name())?,
        };

        let fraction = cubes.find(LAND_AREA_FRACTION)?;
        if fraction.is_none() {
            log::info!("No {LAND_AREA_FRACTION} cube available, {self} will not be corrected to grid cell area");
        }

        let corrected = correct(mass, fraction)?;
        Ok(corrected.with_var_name(self.to_string()))
    }

    /// Load the carbon pool and, if given, the land area fraction from files, then compute this variable.
    pub fn calculate_from_files(&self, mass_file: &Path, fraction_file: Option<&Path>) -> Result<Cube, DeriveError> {
        let mut cubes = CubeList::new();
        cubes.push(load_cube(mass_file, Some(self.mass_short_name()))?);
        if let Some(p) = fraction_file {
            cubes.push(load_cube(p, Some("sftlf"))?);
        }
        self.calculate(&cubes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cube::Coord, test_utils::test_data_dir};
    use ndarray::{array, Array1, Array2};
    use rstest::rstest;
    use std::str::FromStr;

    fn grid_cube(name: &str, data: Array2<f64>) -> Cube {
        let (ny, nx) = data.dim();
        let coords = vec![
            Coord::new("latitude", Array1::linspace(-45.0, 45.0, ny)),
            Coord::new("longitude", Array1::linspace(0.0, 180.0, nx)),
        ];
        Cube::new(name, "kg m-2", coords, data.into_dyn()).unwrap()
    }

    #[test]
    fn test_correct_elementwise() {
        let mass = grid_cube("cVeg", array![[10.0, 20.0], [30.0, 40.0]]);
        let frac = grid_cube("sftlf", array![[50.0, 100.0], [0.0, 100.0]]);
        let result = correct(&mass, Some(&frac)).unwrap();
        assert_eq!(result.data(), &array![[5.0, 20.0], [0.0, 40.0]].into_dyn());
        assert_eq!(result.units(), "kg m-2");
        assert_eq!(result.var_name(), "cVeg");
        // the input is not modified
        assert_eq!(mass.data(), &array![[10.0, 20.0], [30.0, 40.0]].into_dyn());
    }

    #[test]
    fn test_correct_absent_is_identity() {
        let mass = grid_cube("cVeg", array![[10.0, 20.0], [30.0, 40.0]]);
        let result = correct(&mass, None).unwrap();
        assert_eq!(result, mass);
    }

    #[test]
    fn test_correct_shape_mismatch() {
        let mass = grid_cube("cVeg", array![[10.0, 20.0], [30.0, 40.0]]);
        let frac = grid_cube("sftlf", Array2::from_elem((3, 3), 50.0));
        let err = correct(&mass, Some(&frac)).unwrap_err();
        assert_eq!(err, ShapeMismatchError::new(&[2, 2], &[3, 3]));

        let mut in_place = mass.clone();
        assert!(correct_in_place(&mut in_place, Some(&frac)).is_err());
        assert_eq!(in_place, mass);
    }

    #[rstest]
    #[case::single_cell(array![[50.0]])]
    #[case::single_column(array![[50.0], [100.0]])]
    #[case::single_row(array![[50.0, 100.0]])]
    fn test_correct_does_not_stretch_spatial_axes(#[case] frac: Array2<f64>) {
        let mass = grid_cube("cVeg", array![[10.0, 20.0], [30.0, 40.0]]);
        let frac_shape = frac.shape().to_vec();
        let frac = grid_cube("sftlf", frac);
        let err = correct(&mass, Some(&frac)).unwrap_err();
        assert_eq!(err, ShapeMismatchError::new(&[2, 2], &frac_shape));
    }

    #[test]
    fn test_correct_in_place() {
        let mut mass = grid_cube("cVeg", array![[10.0, 20.0], [30.0, 40.0]]);
        let frac = grid_cube("sftlf", array![[50.0, 100.0], [0.0, 100.0]]);
        correct_in_place(&mut mass, Some(&frac)).unwrap();
        assert_eq!(mass.data(), &array![[5.0, 20.0], [0.0, 40.0]].into_dyn());
    }

    #[test]
    fn test_calculate_from_files_broadcasts_over_time() {
        let inputs = test_data_dir().join("inputs").join("cubes");
        let cube = GridCorrectedVariable::CVegGrid
            .calculate_from_files(&inputs.join("cVeg_grid_input.json"), Some(&inputs.join("sftlf_input.json")))
            .unwrap();
        assert_eq!(cube.shape(), &[1, 2, 2]);
        assert_eq!(cube.var_name(), "cVeg_grid");
        assert_eq!(cube.name(), "vegetation_carbon_content");
        assert_eq!(cube.data(), &array![[[5.0, 20.0], [0.0, 40.0]]].into_dyn());
    }

    #[test]
    fn test_calculate_without_fraction() {
        let inputs = test_data_dir().join("inputs").join("cubes");
        let mass = load_cube(&inputs.join("cVeg_grid_input.json"), None).unwrap();
        let cubes = CubeList::from(vec![mass.clone()]);
        let cube = GridCorrectedVariable::CVegGrid.calculate(&cubes).unwrap();
        assert_eq!(cube.data(), mass.data());
        assert_eq!(cube.var_name(), "cVeg_grid");
    }

    #[test]
    fn test_calculate_errors() {
        let inputs = test_data_dir().join("inputs").join("cubes");
        let frac = load_cube(&inputs.join("sftlf_input.json"), None).unwrap();
        let err = GridCorrectedVariable::CSoilGrid.calculate(&CubeList::from(vec![frac])).unwrap_err();
        assert!(matches!(err, DeriveError::Extract(ExtractError::NotFound(_))));

        // A fraction file that was given but cannot be read is an error, not a silent identity.
        let err = GridCorrectedVariable::CVegGrid
            .calculate_from_files(&inputs.join("cVeg_grid_input.json"), Some(&inputs.join("missing_sftlf.json")))
            .unwrap_err();
        assert!(matches!(err, DeriveError::Load(DataLoadError::CouldNotRead { .. })));
    }

    #[test]
    fn test_variable_names() {
        assert_eq!(GridCorrectedVariable::from_str("cLitter_grid").unwrap(), GridCorrectedVariable::CLitterGrid);
        assert_eq!(GridCorrectedVariable::CVegGrid.to_string(), "cVeg_grid");
        assert!(GridCorrectedVariable::from_str("cVeg").is_err());
    }
}
