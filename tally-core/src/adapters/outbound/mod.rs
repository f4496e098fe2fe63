mod dev_remote;
mod file_store;
mod http;
mod memory_store;

pub use dev_remote::DevTaskService;
pub use file_store::FileStore;
pub use http::HttpTaskService;
pub use memory_store::MemoryStore;
