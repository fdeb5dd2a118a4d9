//! Shape descriptors: the lookahead view of a query.
//!
//! A [`Shape`] is the tree of field names the executor will request beneath
//! a field, supplied before any data is resolved. Shapes are immutable and
//! carry names only. Arguments and aliases are not part of the shape.
//!
//! Shapes can be built directly or parsed from a selection:
//!
//! ```rust
//! use lookload_core::Shape;
//!
//! let built = Shape::node("comments", [
//!     Shape::leaf("id"),
//!     Shape::node("author", [Shape::leaf("name")]),
//! ]);
//!
//! let parsed = Shape::parse("comments { id author { name } }").unwrap();
//! assert_eq!(built, parsed);
//! assert!(parsed.child("author").is_some());
//! assert!(parsed.child("id").unwrap().is_leaf());
//! ```

mod grammar;

use std::fmt;

use pest::Parser;
use pest::iterators::Pair;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{LoadError, LoadResult};

pub use grammar::{Rule, ShapeParser};

/// A node of the lookahead tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    name: SmolStr,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Shape>,
}

impl Shape {
    /// Create a shape without sub-selections.
    pub fn leaf(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Create a shape with sub-selections.
    pub fn node(name: impl Into<SmolStr>, children: impl IntoIterator<Item = Shape>) -> Self {
        Self {
            name: name.into(),
            children: children.into_iter().collect(),
        }
    }

    /// Append a sub-selection.
    pub fn with(mut self, child: Shape) -> Self {
        self.children.push(child);
        self
    }

    /// Parse a selection such as `comments { id author { name } }`.
    pub fn parse(input: &str) -> LoadResult<Self> {
        let mut pairs = ShapeParser::parse(Rule::shape, input).map_err(|e| LoadError::ShapeSyntax {
            message: e.to_string(),
        })?;

        let field = pairs
            .next()
            .and_then(|shape| shape.into_inner().find(|p| p.as_rule() == Rule::field))
            .ok_or_else(|| LoadError::ShapeSyntax {
                message: "expected a field selection".to_string(),
            })?;

        Ok(parse_field(field))
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sub-selections in order.
    pub fn children(&self) -> &[Shape] {
        &self.children
    }

    /// Check if this node has no sub-selections.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// First sub-selection with the given name.
    pub fn child(&self, name: &str) -> Option<&Shape> {
        self.children.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.children.is_empty() {
            write!(f, " {{")?;
            for child in &self.children {
                write!(f, " {}", child)?;
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}

fn parse_field(pair: Pair<'_, Rule>) -> Shape {
    let mut shape = Shape::leaf("");
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::identifier => shape.name = SmolStr::new(item.as_str()),
            Rule::selection_set => {
                shape.children = item
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::field)
                    .map(parse_field)
                    .collect();
            }
            // Aliases and arguments do not affect what gets loaded.
            _ => {}
        }
    }
    shape
}
