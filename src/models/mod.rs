pub mod audit;
pub mod slot;
pub mod token;
pub mod vehicle;
