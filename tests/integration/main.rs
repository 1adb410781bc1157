//! Integration tests for the CADENCE backend.

mod mock_ledger;
mod withdrawal;
