//! Property-based tests for the tuple model.
