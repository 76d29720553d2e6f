pub mod batch;
pub mod controller;
pub mod diginorm;
pub mod exceptions;
pub mod parser;
pub mod queue;
pub mod stage;
pub mod worker;
pub mod writers;
