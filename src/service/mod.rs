//! CrudService: validation, connection routing and the CRUD orchestrator.

mod crud;
pub mod routing;
pub mod validation;

pub use crud::CrudService;
pub use routing::{ConnectionRequest, ConnectionStrategy, PrecedenceStrategy};
pub use validation::{DataValidator, FieldError, ValidationOutcome};
