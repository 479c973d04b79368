//! The console's scripting language: an indentation-structured,
//! Python-flavoured interpreter.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod eval;
pub mod format;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod value;

pub use error::{ExcType, PyException, PyResult, SourceText, SyntaxError};
pub use eval::{Interpreter, DEFAULT_RECURSION_LIMIT};
pub use parser::parse_module;
pub use value::{Args, HostObject, Namespace, NativeFunction, Value};
