//! Domain model: value objects, aggregates and the events raised on commit.
pub mod aggregates;
pub mod events;
pub mod value_objects;
