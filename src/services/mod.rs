pub mod jobs;
pub mod provider;
pub mod storage;
pub mod worker;
