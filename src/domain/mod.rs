//! Domain layer - entities, DTOs and the ports implemented by the board.

pub mod dto;
pub mod entity;
pub mod ports;
