pub mod collaborators;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod records;
