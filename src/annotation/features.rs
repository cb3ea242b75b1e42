//! Feature extraction: map a classifier's feature list onto expression matrix
//! columns and gather the dense block for the cells being evaluated.

use crate::dataset::SingleCellDataset;
use crate::error::{AnnotationError, Result};
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use single_utilities::traits::FloatOpsTS;

/// Gather a cells × features block of `f64` values for the given cell rows.
///
/// Feature names are resolved through the dataset's canonical feature index,
/// so separator and case differences between the classifier and the matrix do
/// not matter. A feature with no matching column fails the run with a feature
/// mismatch naming the classifier; no imputation is attempted.
pub(crate) fn extract_feature_block<T>(
    dataset: &SingleCellDataset<T>,
    assay: &CsrMatrix<T>,
    features: &[String],
    cell_type: &str,
    rows: &[usize],
) -> Result<Array2<f64>>
where
    T: FloatOpsTS,
{
    let columns: Vec<usize> = features
        .iter()
        .map(|feature| {
            dataset
                .feature_column(feature)
                .ok_or_else(|| AnnotationError::FeatureMismatch {
                    feature: feature.clone(),
                    cell_type: cell_type.to_string(),
                })
        })
        .collect::<Result<Vec<usize>>>()?;

    let gathered: Vec<Vec<f64>> = rows
        .par_iter()
        .map(|&row| {
            columns
                .iter()
                .map(|&col| match assay.get_entry(row, col) {
                    Some(entry) => {
                        let value = entry.into_value();
                        num_traits::ToPrimitive::to_f64(&value).unwrap_or(0.0)
                    }
                    None => 0.0,
                })
                .collect()
        })
        .collect();

    let flat: Vec<f64> = gathered.into_iter().flatten().collect();
    Array2::from_shape_vec((rows.len(), columns.len()), flat).map_err(|e| {
        AnnotationError::Load(format!("feature block has an inconsistent shape: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn dataset() -> SingleCellDataset<f64> {
        let mut ds = SingleCellDataset::new(
            vec!["c1".into(), "c2".into(), "c3".into()],
            vec!["CD19".into(), "HLA-DRA".into()],
        )
        .unwrap();
        let mut coo = CooMatrix::new(3, 2);
        coo.push(0, 0, 2.0);
        coo.push(0, 1, 1.0);
        coo.push(2, 1, 3.0);
        ds.add_assay("lognorm", CsrMatrix::from(&coo)).unwrap();
        ds
    }

    #[test]
    fn gathers_dense_values_with_implicit_zeros() {
        let ds = dataset();
        let assay = ds.assay("lognorm").unwrap();
        let block = extract_feature_block(
            &ds,
            assay,
            &["CD19".to_string(), "HLA_DRA".to_string()],
            "B cells",
            &[0, 2],
        )
        .unwrap();
        assert_eq!(block.shape(), &[2, 2]);
        assert_eq!(block[[0, 0]], 2.0);
        assert_eq!(block[[0, 1]], 1.0);
        assert_eq!(block[[1, 0]], 0.0);
        assert_eq!(block[[1, 1]], 3.0);
    }

    #[test]
    fn missing_feature_is_a_feature_mismatch() {
        let ds = dataset();
        let assay = ds.assay("lognorm").unwrap();
        let err = extract_feature_block(&ds, assay, &["CD3D".to_string()], "T cells", &[0])
            .unwrap_err();
        match err {
            AnnotationError::FeatureMismatch { feature, cell_type } => {
                assert_eq!(feature, "CD3D");
                assert_eq!(cell_type, "T cells");
            }
            other => panic!("expected FeatureMismatch, got {:?}", other),
        }
    }
}
