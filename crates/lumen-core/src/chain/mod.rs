//! Chain-specific method tables and node capability tiers.

pub mod solana;
