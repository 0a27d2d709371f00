//! Per-column statistics fitted once over a corpus and frozen afterwards.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{MotionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NormalizationMode {
    /// `(x - mean) / std`
    #[default]
    ZScore,
    /// Maps `[min, max]` onto `[-1, 1]`.
    MinMax,
}

impl FromStr for NormalizationMode {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zscore" => Ok(NormalizationMode::ZScore),
            "minmax" => Ok(NormalizationMode::MinMax),
            _ => Err(MotionError::UnsupportedNormalizationMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for NormalizationMode {
    type Error = MotionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NormalizationMode> for String {
    fn from(mode: NormalizationMode) -> String {
        mode.to_string()
    }
}

impl fmt::Display for NormalizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NormalizationMode::ZScore => "zscore",
            NormalizationMode::MinMax => "minmax",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationStats {
    pub mode: NormalizationMode,
    pub mean: Array1<f32>,
    /// Zero deviations are stored as 1.0.
    pub std: Array1<f32>,
    pub min: Array1<f32>,
    pub max: Array1<f32>,
}

fn floor_zero(values: Array1<f32>) -> Array1<f32> {
    values.mapv_into(|v| if v.abs() < f32::EPSILON { 1.0 } else { v })
}

impl NormalizationStats {
    /// Fits statistics over all rows of `data`. Standard deviations are
    /// population deviations.
    pub fn fit(data: &Array2<f32>, mode: NormalizationMode) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(MotionError::InvalidInput(
                "cannot fit normalization on an empty matrix".to_string(),
            ));
        }
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| MotionError::InvalidInput("empty matrix".to_string()))?;
        let std = floor_zero(data.std_axis(Axis(0), 0.0));
        let min = data.fold_axis(Axis(0), f32::INFINITY, |acc, v| acc.min(*v));
        let max = data.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, v| acc.max(*v));
        Ok(NormalizationStats {
            mode,
            mean,
            std,
            min,
            max,
        })
    }

    /// Assembles stats from stored columns, e.g. a cache bundle.
    pub fn from_columns(
        mode: NormalizationMode,
        mean: Array1<f32>,
        std: Array1<f32>,
        min: Array1<f32>,
        max: Array1<f32>,
    ) -> Result<Self> {
        let width = mean.len();
        for (what, column) in [("std", &std), ("min", &min), ("max", &max)] {
            if column.len() != width {
                return Err(MotionError::shape(format!("normalization {what}"), width, column.len()));
            }
        }
        Ok(NormalizationStats {
            mode,
            mean,
            std: floor_zero(std),
            min,
            max,
        })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    fn check(&self, actual: usize) -> Result<()> {
        if actual != self.width() {
            return Err(MotionError::shape("normalized frame", self.width(), actual));
        }
        Ok(())
    }

    fn range(&self, i: usize) -> f32 {
        let range = self.max[i] - self.min[i];
        if range.abs() < f32::EPSILON { 1.0 } else { range }
    }

    fn apply_row(&self, mut row: ArrayViewMut1<f32>) {
        for (i, v) in row.iter_mut().enumerate() {
            *v = match self.mode {
                NormalizationMode::ZScore => (*v - self.mean[i]) / self.std[i],
                NormalizationMode::MinMax => 2.0 * (*v - self.min[i]) / self.range(i) - 1.0,
            };
        }
    }

    fn invert_row(&self, mut row: ArrayViewMut1<f32>) {
        for (i, v) in row.iter_mut().enumerate() {
            *v = match self.mode {
                NormalizationMode::ZScore => *v * self.std[i] + self.mean[i],
                NormalizationMode::MinMax => (*v + 1.0) * 0.5 * self.range(i) + self.min[i],
            };
        }
    }

    pub fn apply_frame(&self, frame: ArrayView1<f32>) -> Result<Array1<f32>> {
        self.check(frame.len())?;
        let mut out = frame.to_owned();
        self.apply_row(out.view_mut());
        Ok(out)
    }

    pub fn invert_frame(&self, frame: ArrayView1<f32>) -> Result<Array1<f32>> {
        self.check(frame.len())?;
        let mut out = frame.to_owned();
        self.invert_row(out.view_mut());
        Ok(out)
    }

    pub fn apply(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        self.check(data.ncols())?;
        let mut out = data.clone();
        for row in out.rows_mut() {
            self.apply_row(row);
        }
        Ok(out)
    }

    pub fn invert(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        self.check(data.ncols())?;
        let mut out = data.clone();
        for row in out.rows_mut() {
            self.invert_row(row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample() -> Array2<f32> {
        array![[1.0, 5.0, -2.0], [3.0, 5.0, 0.0], [5.0, 5.0, 8.0]]
    }

    #[test]
    fn fit_floors_constant_columns() {
        let stats = NormalizationStats::fit(&sample(), NormalizationMode::ZScore).unwrap();
        assert_abs_diff_eq!(stats.mean[0], 3.0);
        assert_abs_diff_eq!(stats.std[1], 1.0);
        assert_abs_diff_eq!(stats.min[2], -2.0);
        assert_abs_diff_eq!(stats.max[2], 8.0);
    }

    #[test]
    fn zscore_round_trip() {
        let data = sample();
        let stats = NormalizationStats::fit(&data, NormalizationMode::ZScore).unwrap();
        let normalized = stats.apply(&data).unwrap();
        assert_abs_diff_eq!(normalized.column(0).mean().unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(normalized[[0, 1]], 0.0);
        let restored = stats.invert(&normalized).unwrap();
        for (a, b) in restored.iter().zip(data.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn minmax_maps_to_unit_interval() {
        let data = sample();
        let stats = NormalizationStats::fit(&data, NormalizationMode::MinMax).unwrap();
        let normalized = stats.apply(&data).unwrap();
        assert_abs_diff_eq!(normalized[[0, 0]], -1.0);
        assert_abs_diff_eq!(normalized[[2, 0]], 1.0);
        let restored = stats.invert(&normalized).unwrap();
        for (a, b) in restored.iter().zip(data.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn frame_width_mismatch() {
        let stats = NormalizationStats::fit(&sample(), NormalizationMode::ZScore).unwrap();
        assert!(matches!(
            stats.apply_frame(array![1.0, 2.0].view()),
            Err(MotionError::ShapeMismatch { .. })
        ));
        let frame = stats.apply_frame(array![3.0, 5.0, 2.0].view()).unwrap();
        let back = stats.invert_frame(frame.view()).unwrap();
        assert_abs_diff_eq!(back[2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn mode_names() {
        assert_eq!("minmax".parse::<NormalizationMode>().unwrap(), NormalizationMode::MinMax);
        assert!(matches!(
            "robust".parse::<NormalizationMode>(),
            Err(MotionError::UnsupportedNormalizationMode(_))
        ));
        assert_eq!(serde_json::to_string(&NormalizationMode::ZScore).unwrap(), "\"zscore\"");
    }
}
