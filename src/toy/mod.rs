//! Reference Collaborators
//!
//! A small logistic-regression model and a two-class Gaussian dataset, used
//! by the binary and the end-to-end tests.

pub mod data;
pub mod model;

pub use data::{Batch, GaussianBlobs};
pub use model::LogisticRegression;
