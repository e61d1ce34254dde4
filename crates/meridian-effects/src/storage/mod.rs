mod filesystem;
mod memory;
mod null;

pub use filesystem::FilesystemStorageHandler;
pub use memory::MemoryStorageHandler;
pub use null::NullStorageHandler;
