// Pokemon Arena Schema - Shared type definitions
// This crate holds the plain data shared by the battle engine, the stores and
// the species data client: elemental types, battle enums, attacks and the raw
// species/move records returned by the data source.

// Re-export the main types
pub use battle_data::*;
pub use pokemon_types::*;
pub use species_data::*;

pub mod battle_data;
pub mod pokemon_types;
pub mod species_data;
