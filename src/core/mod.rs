pub mod envelope;
pub mod material_properties;
pub(crate) mod solvers;
pub mod units;
