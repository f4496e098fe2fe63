mod ids;
mod task;
mod task_set;
mod time_tracking;

pub use ids::*;
pub use task::*;
pub use task_set::*;
pub use time_tracking::*;
