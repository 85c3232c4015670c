mod id;
mod key;
mod status;

pub use id::{AppId, ProjectId, COMMON_APP};
pub use key::{JobKey, RunKey, WorkflowType};
pub use status::JobStatus;
