pub mod dto;
pub mod engine_service;
