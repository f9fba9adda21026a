pub mod clipboard;
pub mod storage;
