//! Shared fixtures for unit and integration tests.
