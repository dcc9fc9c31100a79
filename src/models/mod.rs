// src/models/mod.rs

pub mod lab_report;
pub mod parameter;
pub mod plant;
pub mod product;

pub use lab_report::*;
pub use parameter::*;
pub use plant::*;
pub use product::*;
