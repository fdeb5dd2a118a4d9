//! Pest grammar parser for shape selections.

use pest_derive::Parser;

/// The shape selection parser.
#[derive(Parser)]
#[grammar = "shape/shape.pest"]
pub struct ShapeParser;
