//! The directive-aware parser (spec §4.1): recipe text to canonical entry
//! stream.

mod directive;
mod lexer;
mod parser;

pub use directive::Directive;
pub use lexer::DEFAULT_ESCAPE;
pub use parser::parse_recipe;
