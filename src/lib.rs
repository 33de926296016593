#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod arrhenius;
pub mod changepoint;
pub mod circuit;
pub mod config;
pub mod eis;
pub mod error;
pub mod ingest;
pub mod kramers_kronig;
pub mod math;
pub(crate) mod minimisation;
pub mod peaks;
pub mod persist;
pub mod polyfit;
pub mod procedure;
pub mod smoothing;
pub mod spectrum;
pub mod voltammetry;
pub mod window;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
