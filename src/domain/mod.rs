pub mod activation;
pub mod churn;
pub mod engagement;
pub mod errors;
pub mod habit_loops;
pub mod lifecycle;
pub mod power_user;
pub mod records;
pub mod rules;
pub mod signals;
