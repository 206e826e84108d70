pub(crate) mod biff8;
pub mod budget;
pub(crate) mod cfb;
pub mod reader;
pub(crate) mod string;
pub(crate) mod xml;
pub(crate) mod zip;
