//! Renderings of an analysis report.

pub mod csv;
pub mod json;
pub mod text;
