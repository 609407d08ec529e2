//! Variables: a metadata record paired with the cube it describes.
use crate::{
    cube::Cube,
    error::DataLoadError,
    loader::load_cube,
    metadata::VariableMetadata,
    stats::{annual_statistics, area_statistics, ReduceError, Statistic},
};

#[derive(Debug, thiserror::Error)]
pub enum VariableError {
    #[error(transparent)]
    Load(#[from] DataLoadError),
    #[error("Could not reduce {short_name} from {dataset} ({ensemble}): {source}")]
    Reduce {
        dataset: String,
        short_name: String,
        ensemble: String,
        source: ReduceError,
    },
}

impl VariableError {
    fn reduce(meta: &VariableMetadata, source: ReduceError) -> Self {
        Self::Reduce {
            dataset: meta.dataset.clone(),
            short_name: meta.short_name.clone(),
            ensemble: meta.ensemble.clone(),
            source,
        }
    }
}

/// Load the cube described by `metadata` from its `filename`.
pub fn load(metadata: &VariableMetadata) -> Result<Cube, DataLoadError> {
    load_cube(&metadata.filename, Some(&metadata.short_name))
}

/// Collapse the spatial axes of `cube` with `stat`. The input is left untouched.
pub fn reduce(cube: &Cube, stat: Statistic) -> Result<Cube, ReduceError> {
    area_statistics(cube, stat)
}

/// Load the variable described by `metadata` and collapse its spatial axes with `stat`.
pub fn wrap_and_reduce(metadata: &VariableMetadata, stat: Statistic) -> Result<ReducedVariable, VariableError> {
    EsmVariable::load(metadata.clone())?.area_statistic(stat)
}

/// A metadata record together with its loaded, unreduced cube.
#[derive(Debug, Clone)]
pub struct EsmVariable {
    metadata: VariableMetadata,
    cube: Cube,
}

impl EsmVariable {
    pub fn new(metadata: VariableMetadata, cube: Cube) -> Self {
        Self { metadata, cube }
    }

    pub fn load(metadata: VariableMetadata) -> Result<Self, DataLoadError> {
        let cube = load(&metadata)?;
        Ok(Self { metadata, cube })
    }

    pub fn metadata(&self) -> &VariableMetadata {
        &self.metadata
    }

    pub fn cube(&self) -> &Cube {
        &self.cube
    }

    /// Replace the cube, e.g. with a grid-area corrected version of itself.
    pub fn map_cube<F, E>(self, f: F) -> Result<Self, E>
    where F: FnOnce(Cube) -> Result<Cube, E>
    {
        let cube = f(self.cube)?;
        Ok(Self { metadata: self.metadata, cube })
    }

    pub fn area_statistic(&self, stat: Statistic) -> Result<ReducedVariable, VariableError> {
        let cube = reduce(&self.cube, stat)
            .map_err(|e| VariableError::reduce(&self.metadata, e))?;
        Ok(ReducedVariable { metadata: self.metadata.clone(), cube })
    }

    pub fn annual_statistic(&self, stat: Statistic) -> Result<ReducedVariable, VariableError> {
        let cube = annual_statistics(&self.cube, stat)
            .map_err(|e| VariableError::reduce(&self.metadata, e))?;
        Ok(ReducedVariable { metadata: self.metadata.clone(), cube })
    }
}

/// A metadata record paired with a reduced cube.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedVariable {
    metadata: VariableMetadata,
    cube: Cube,
}

impl ReducedVariable {
    pub fn new(metadata: VariableMetadata, cube: Cube) -> Self {
        Self { metadata, cube }
    }

    pub fn metadata(&self) -> &VariableMetadata {
        &self.metadata
    }

    pub fn cube(&self) -> &Cube {
        &self.cube
    }

    /// Further collapse the time axis to annual values.
    pub fn annual_statistic(self, stat: Statistic) -> Result<ReducedVariable, VariableError> {
        let cube = annual_statistics(&self.cube, stat)
            .map_err(|e| VariableError::reduce(&self.metadata, e))?;
        Ok(ReducedVariable { metadata: self.metadata, cube })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::InputCollection, test_utils::test_data_dir};
    use approx::assert_abs_diff_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn emip_records() -> Vec<VariableMetadata> {
        let path = test_data_dir().join("inputs").join("emip").join("metadata.json");
        InputCollection::from_json_file(&path).unwrap().into_records()
    }

    #[rstest]
    fn test_wrap_and_reduce(emip_records: Vec<VariableMetadata>) {
        let meta = &emip_records[0];
        let reduced = wrap_and_reduce(meta, Statistic::Mean).unwrap();
        assert_eq!(reduced.metadata(), meta);
        assert_eq!(reduced.cube().shape(), &[24]);
        assert_eq!(reduced.cube().var_name(), "tas");
        assert_eq!(reduced.cube().units(), "K");

        // tas for r1i1p5f101 is 282.8 K plus small monthly and per-cell offsets.
        let expected_first = 282.8 + 0.028 * 1.5;
        assert_abs_diff_eq!(reduced.cube().data()[[0]], expected_first, epsilon = 1e-9);

        let annual = reduced.annual_statistic(Statistic::Mean).unwrap();
        assert_eq!(annual.cube().shape(), &[2]);
    }

    #[rstest]
    fn test_variable_keeps_input(emip_records: Vec<VariableMetadata>) {
        let var = EsmVariable::load(emip_records[1].clone()).unwrap();
        let before = var.cube().clone();
        let _ = var.area_statistic(Statistic::Max).unwrap();
        let _ = var.annual_statistic(Statistic::Mean).unwrap();
        assert_eq!(var.cube(), &before);
        assert_eq!(var.annual_statistic(Statistic::Mean).unwrap().cube().shape(), &[2, 2, 2]);
    }

    #[test]
    fn test_reduce_mean_per_time_step() {
        let cube = crate::cube::tests::tll_cube("tas", ndarray::array![[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 9.0]]]);
        let before = cube.clone();
        let reduced = reduce(&cube, Statistic::Mean).unwrap();
        assert_eq!(reduced.shape(), &[2]);
        assert_abs_diff_eq!(reduced.data()[[0]], 2.5);
        assert_abs_diff_eq!(reduced.data()[[1]], 6.75);
        assert_eq!(cube, before);

        let flat = Cube::new("x", "1", vec![crate::cube::Coord::new("time", ndarray::array![0.0])], ndarray::array![1.0].into_dyn()).unwrap();
        assert!(matches!(reduce(&flat, Statistic::Mean), Err(ReduceError::MissingAxis { .. })));
    }

    #[rstest]
    fn test_load_failure(emip_records: Vec<VariableMetadata>) {
        let mut meta = emip_records[0].clone();
        meta.filename = test_data_dir().join("inputs").join("emip").join("missing.json");
        let err = wrap_and_reduce(&meta, Statistic::Mean).unwrap_err();
        assert!(matches!(err, VariableError::Load(DataLoadError::CouldNotRead { .. })));
    }
}
