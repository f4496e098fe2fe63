mod clock;
mod local_store;
mod remote_tasks;

pub use clock::*;
pub use local_store::*;
pub use remote_tasks::*;
