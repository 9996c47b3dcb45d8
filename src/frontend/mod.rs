//! Interface to the front end. Lexing, parsing, name resolution and type
//! checking happen elsewhere; what arrives here is a fully typed tree.

pub mod ast;

/// Reads a typed tree serialized as JSON by the front end.
pub fn module_from_json(source: &str) -> Result<ast::Module, serde_json::Error> {
    serde_json::from_str(source)
}
