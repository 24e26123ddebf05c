//! Content-Defined Chunking (CDC) implementations.
//!
//! This module contains the rolling hash used to find piece boundaries from
//! content rather than from fixed offsets.
//!
//! - [`RabinKarp`] - Rabin-Karp rolling hash over a fixed window

mod rabin_karp;

pub use rabin_karp::RabinKarp;
