pub mod coordinator;
pub mod payloads;

pub use coordinator::{EndpointReport, FuzzCoordinator, Stage};
pub use payloads::{ProbeCatalog, ProbeCategory};
