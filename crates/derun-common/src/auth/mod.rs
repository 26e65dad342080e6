//! Credential handling

mod token;

pub use token::Token;
