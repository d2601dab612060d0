pub mod ram_job_store;
pub mod ram_state;

pub use ram_job_store::RamJobStore;
pub use ram_state::RamState;
