//! Linear algebra type system for the location fusion filter
//!
//! Fixed-size nalgebra aliases so the 5-state estimator gets compile-time
//! dimension checking.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const FUSION_STATE_DIM: usize = 5;

// ===== State Indices =====
pub const IDX_X: usize = 0; // east (m)
pub const IDX_Y: usize = 1; // north (m)
pub const IDX_VX: usize = 2;
pub const IDX_VY: usize = 3;
pub const IDX_HEADING: usize = 4; // rad, 0 = north, clockwise

// ===== 5-State Filter Types =====
pub type FusionStateVec = SVector<f64, FUSION_STATE_DIM>;
pub type FusionCovariance = SMatrix<f64, FUSION_STATE_DIM, FUSION_STATE_DIM>;
