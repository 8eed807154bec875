pub mod git;
pub mod manager;
