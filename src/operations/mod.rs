// Operations module - planning built on top of the typed client

pub mod navigation;

pub use navigation::*;
