//! **dircol**: direct collocation NLP formulation for optimal control and
//! parameter identification.
//!
//! Given equations of motion `f(ẋ, x, u, p, t) = 0`, a uniform time grid and
//! known data, this crate builds the nonlinear program a gradient-based NLP
//! solver needs:
//!
//! 1. **Classification** (`symbols`): states, known / unknown parameters and trajectories.
//! 2. **Discretization** (`discretize`): backward Euler or midpoint stencil.
//! 3. **Layout** (`layout`): the flat free vector and its structured views.
//! 4. **Constraints** (`constraints`, `instance`): dynamics defects and instance constraints.
//! 5. **Jacobian** (`jacobian`): sparsity pattern and values.
//! 6. **Assembly** (`problem`): objective, bounds and the `NlpProblem` callbacks.
//! 7. **Driver** (`optimizer`): augmented Lagrangian + L-BFGS via `argmin`.
//!
//! Expressions reach the engine through the [`residual::Residual`] contract;
//! the bundled [`expr`] module is one implementation of it.

pub mod types;
pub mod residual;
pub mod expr;
pub mod symbols;
pub mod discretize;
pub mod layout;
pub mod constraints;
pub mod jacobian;
pub mod instance;
pub mod objective;
pub mod problem;
pub mod optimizer;

pub use discretize::Stencil;
pub use problem::{CollocationProblem, NlpProblem, ProblemBuilder};
pub use types::{CollocationError, Result};
