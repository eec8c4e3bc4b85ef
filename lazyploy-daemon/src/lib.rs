//! lazyploy agent runtime: catalog polling, build sync and process
//! supervision behind a local control socket.

pub mod catalog;
mod error;
pub mod host;
pub mod orchestrator;
pub mod paths;
pub mod protocol;
pub mod reporter;
mod runtime;
pub mod supervisor;

pub use catalog::{BuildCatalog, HttpBuildCatalog};
pub use error::{CatalogError, DaemonError, SupervisorError};
pub use host::HostIdentity;
pub use orchestrator::{Orchestrator, SyncPhase, SyncSnapshot};
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use reporter::{HttpStatusReporter, StatusReport, StatusReporter};
pub use runtime::{run, run_with, start_blocking};
pub use supervisor::{LaunchSpec, ProcessExit, ProcessSupervisor, StopOutcome};
