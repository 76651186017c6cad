//! The typed worker pools fed by the content-type router (C4/C5).

pub mod image;
pub mod placeholder;
