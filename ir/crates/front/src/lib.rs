use lalrpop_util::lalrpop_mod;
pub use module::{
    parse,
    Module,
    ParseError,
};

lalrpop_mod!(#[allow(clippy::all, unused)] grammar);

pub mod module;
