pub mod func;
pub mod helpers;
