//! Integration tests.
//!
//! Fleet coordination over real transports (an HTTP coordinator on an
//! ephemeral port, a shared document in a temp dir) and whole trading
//! cycles on the paper venue.

mod coordination;
mod trading_cycle;
