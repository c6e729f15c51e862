pub mod routes;
pub mod server;
pub mod state;

pub use server::{run_scheduler, run_worker};
pub use state::{SchedulerAppState, WorkerAppState};
