//! warden-storage: store adapters for the warden engines.
//!
//! Implements the reader/writer traits defined in `warden-domain`:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  warden-storage                   │
//! ├──────────────────────────────────────────────────┤
//! │  memory.rs  - in-memory MVCC relationship store  │
//! │  schema.rs  - write-once versioned schema store  │
//! │  circuit.rs - circuit-breaker reader decorator   │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod circuit;
pub mod memory;
pub mod schema;

// Re-export commonly used types
pub use circuit::{CircuitBreakerConfig, CircuitBreakerReader};
pub use memory::MemoryRelationshipStore;
pub use schema::MemorySchemaStore;
