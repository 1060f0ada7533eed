pub mod acquire;
pub mod release;
pub mod run;
