pub mod object;
pub mod playlist;
pub mod producers;
pub mod registry;
