pub mod provision;
pub mod rotate;
pub mod status;
