pub mod iteration;
pub mod machine;
pub mod prompt;
pub mod restriction;
pub mod schemas;
pub mod task;
pub mod types;
pub mod validator;
