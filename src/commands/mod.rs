pub mod capture;
pub mod inputs;
