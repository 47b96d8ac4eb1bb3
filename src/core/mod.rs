pub mod capacity;
pub mod relationship;
pub mod wizard;

pub use crate::domain::model::{AssociationResult, PatientRecord, PersonData, Plan};
pub use crate::domain::ports::{PersistencePort, PlanCatalog};
pub use crate::utils::error::Result;
