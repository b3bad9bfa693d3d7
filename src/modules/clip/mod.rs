pub mod error;
pub mod model;
pub mod service;
pub mod staging;
pub mod tagger;
pub mod transcoder;
