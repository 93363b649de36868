pub mod filters;
pub mod noise;
