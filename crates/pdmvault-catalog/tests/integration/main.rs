//! Integration tests for pdmvault-catalog
//!
//! Uses wiremock to simulate the record API and object storage and
//! verifies the REST adapter's request shapes and error mapping.

mod common;

mod test_content;
mod test_records;
