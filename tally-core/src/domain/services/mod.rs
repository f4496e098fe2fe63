mod sync;
mod task_engine;

pub use sync::*;
pub use task_engine::*;
