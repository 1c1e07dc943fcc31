pub mod fs;
pub mod hostname;
