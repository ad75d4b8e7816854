pub mod complementary;
pub mod kalman_1d;
pub mod location_fusion;
pub mod sensor_filter;
