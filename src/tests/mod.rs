//! End-to-end tests that drive a fully assembled engine.
//!
//! The engine is wired with in-memory collaborators and a manual clock, so
//! every test controls record ages, disk usage and alert delivery.
