//! Pure helpers consumed by the rewrite rules. Nothing here touches a graph.

pub mod fixed_point;
pub mod fold;
pub mod lut;
pub mod shape;
mod tables;
