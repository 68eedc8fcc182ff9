//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (Challenge)
//! - Domain value objects (trajectory samples, reject reasons, tokens)
//! - Domain services (trajectory validation, token hashing)
//! - Repository traits (interfaces)

pub mod entities;
pub mod repository;
pub mod services;
pub mod trajectory;
pub mod value_objects;
