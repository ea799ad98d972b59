pub mod extract;
pub mod response;
