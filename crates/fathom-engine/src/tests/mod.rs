//! Tests for the fathom-engine crate.

mod helpers;

mod admin;
